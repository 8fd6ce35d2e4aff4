// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

const CACHE_EVENT_COUNT_NAME: &str = "freshet.event.count";
const FETCH_DURATION_NAME: &str = "freshet.fetch.duration";
const CACHE_ENTRIES_NAME: &str = "freshet.entries";

pub(crate) fn create_event_counter(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter(CACHE_EVENT_COUNT_NAME)
        .with_description("Fetch cache events")
        .with_unit("{event}")
        .build()
}

pub(crate) fn create_fetch_duration_histogram(meter: &Meter) -> Histogram<f64> {
    meter
        .f64_histogram(FETCH_DURATION_NAME)
        .with_description("Duration of settled fetches and writes")
        .with_unit("s")
        .build()
}

pub(crate) fn create_entries_gauge(meter: &Meter) -> Gauge<u64> {
    meter
        .u64_gauge(CACHE_ENTRIES_NAME)
        .with_description("Number of entries in the fetch cache")
        .with_unit("{entry}")
        .build()
}

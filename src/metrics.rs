use axum::http::StatusCode;
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::cache::CacheStatus;

pub struct Metrics {
    registry: Registry,
    requests_total: CounterVec,
    cache_hits: Counter,
    cache_misses: Counter,
    request_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new(
                "gateway_requests_total",
                "Total number of aggregation requests",
            ),
            &["status", "cache_status"],
        )
        .unwrap();

        let cache_hits = Counter::new(
            "gateway_cache_hits_total",
            "Total response cache hits (including coalesced in-flight joins)",
        )
        .unwrap();

        let cache_misses =
            Counter::new("gateway_cache_misses_total", "Total response cache misses").unwrap();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Request duration in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["cache_status"],
        )
        .unwrap();

        registry.register(Box::new(requests_total.clone())).unwrap();
        registry.register(Box::new(cache_hits.clone())).unwrap();
        registry.register(Box::new(cache_misses.clone())).unwrap();
        registry
            .register(Box::new(request_duration.clone()))
            .unwrap();

        Self {
            registry,
            requests_total,
            cache_hits,
            cache_misses,
            request_duration,
        }
    }

    pub fn record_request(&self, status: StatusCode, cache_status: CacheStatus, duration: Duration) {
        let status_str = status.as_u16().to_string();
        let cache_str = cache_status.as_str();

        self.requests_total
            .with_label_values(&[&status_str, cache_str])
            .inc();

        self.request_duration
            .with_label_values(&[cache_str])
            .observe(duration.as_secs_f64());

        match cache_status {
            CacheStatus::Hit => self.cache_hits.inc(),
            CacheStatus::Miss => self.cache_misses.inc(),
        }
    }

    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the gallery server:
//! - HTTP request metrics (latency, counts)
//! - Stored albums by status (collected on scrape)
//! - Everything `gridforge_core::metrics` exports

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::warn;

use gridforge_core::JobStatus;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "gridforge_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gridforge_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "gridforge_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Album Metrics
// =============================================================================

/// Stored albums by status.
pub static ALBUMS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("gridforge_albums_by_status", "Stored albums by status"),
        &["status"],
    )
    .unwrap()
});

const STATUSES: [JobStatus; 5] = [
    JobStatus::Created,
    JobStatus::Running,
    JobStatus::PartiallyFinished,
    JobStatus::Finished,
    JobStatus::Cancelled,
];

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(ALBUMS_BY_STATUS.clone()))
        .unwrap();

    // Core metrics (correlator, bot operations, scheduler, jobs)
    for metric in gridforge_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Refresh gauges that mirror the album store.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let albums = match state.store().list() {
        Ok(albums) => albums,
        Err(e) => {
            warn!("Failed to list albums for metrics: {}", e);
            return;
        }
    };
    for status in STATUSES {
        let count = albums.iter().filter(|a| a.status == status).count();
        ALBUMS_BY_STATUS
            .with_label_values(&[status.as_str()])
            .set(count as i64);
    }
}

/// Normalize a path for metric labels (replace album ids with placeholders).
pub fn normalize_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/api/v1/albums/") {
        if !rest.is_empty() && !rest.contains('/') {
            return "/api/v1/albums/{id}".to_string();
        }
        return path.to_string();
    }
    if path.starts_with("/api/") || path == "/metrics" {
        return path.to_string();
    }
    // Gallery files: keep only the first segment shape.
    "/{album}/*".to_string()
}

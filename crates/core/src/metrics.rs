//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Correlator (dispatch outcomes)
//! - Bot adapters (operations, retries)
//! - Scheduler (skipped units, emitted images)
//! - Jobs (terminal status)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Correlator Metrics
// =============================================================================

/// Inbound events seen by correlators, by outcome.
pub static CORRELATOR_DISPATCH: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gridforge_correlator_dispatch_total",
            "Inbound events dispatched to correlators",
        ),
        &["outcome"], // "ignored", "duplicate", "delivered", "unmatched"
    )
    .unwrap()
});

// =============================================================================
// Bot Adapter Metrics
// =============================================================================

/// Bot operations by bot, operation and outcome.
pub static BOT_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gridforge_bot_operations_total", "Bot operations"),
        &["bot", "operation", "outcome"], // outcome: "success" or an error kind
    )
    .unwrap()
});

/// Bot operation duration in seconds.
pub static BOT_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "gridforge_bot_operation_duration_seconds",
            "Duration of bot operations",
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
        &["bot", "operation"],
    )
    .unwrap()
});

/// Retry attempts by operation.
pub static RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gridforge_retries_total", "Retried bot operations"),
        &["operation"], // "imagine", "upscale", "variation"
    )
    .unwrap()
});

// =============================================================================
// Scheduler Metrics
// =============================================================================

/// Units abandoned after retries, by unit and error kind.
pub static SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gridforge_skipped_total", "Prompts or images skipped"),
        &["unit", "kind"], // unit: "prompt", "image"
    )
    .unwrap()
});

/// Images emitted by the scheduler.
pub static IMAGES_EMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("gridforge_images_emitted_total", "Images emitted").unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Finished job runs by terminal status.
pub static JOBS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gridforge_jobs_total", "Job runs by terminal status"),
        &["status"], // "finished", "partially_finished", "cancelled"
    )
    .unwrap()
});

/// Asset downloads by result.
pub static ASSET_DOWNLOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gridforge_asset_downloads_total", "Image downloads"),
        &["result"], // "success", "failed"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(CORRELATOR_DISPATCH.clone()),
        Box::new(BOT_OPERATIONS.clone()),
        Box::new(BOT_OPERATION_DURATION.clone()),
        Box::new(RETRIES.clone()),
        Box::new(SKIPPED.clone()),
        Box::new(IMAGES_EMITTED.clone()),
        Box::new(JOBS.clone()),
        Box::new(ASSET_DOWNLOADS.clone()),
    ]
}

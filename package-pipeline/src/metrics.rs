//! Prometheus metrics for the package pipeline

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, CounterVec, Histogram,
};

lazy_static! {
    /// Total package events published
    pub static ref PACKAGE_PUBLISH_TOTAL: CounterVec = register_counter_vec!(
        "package_pipeline_publish_total",
        "Total package events published",
        &["status"]
    )
    .unwrap();

    /// Publish duration (including broker confirmation)
    pub static ref PACKAGE_PUBLISH_DURATION: Histogram = register_histogram!(
        "package_pipeline_publish_duration_seconds",
        "Package publish duration in seconds"
    )
    .unwrap();

    /// Total deliveries consumed, by outcome
    pub static ref PACKAGE_CONSUME_TOTAL: CounterVec = register_counter_vec!(
        "package_pipeline_consume_total",
        "Total package deliveries consumed",
        &["outcome"]
    )
    .unwrap();

    /// Processing duration for successful deliveries
    pub static ref PACKAGE_PROCESS_DURATION: Histogram = register_histogram!(
        "package_pipeline_process_duration_seconds",
        "Package processing duration in seconds"
    )
    .unwrap();
}

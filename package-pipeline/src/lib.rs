//! AMQP pipeline for asynchronous package delivery-cost computation
//!
//! Provides the broker side of the delivery-cost flow:
//! - Exchange/queue/dead-letter topology declaration
//! - Confirmed publishing of package-created events
//! - A prefetch-1 consumer with a retry/dead-letter state machine
//! - Prometheus metrics for publish/consume outcomes

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod retry;
pub mod topology;

pub use config::{MqConfig, PipelineConfig};
pub use consumer::{PackageConsumer, StopHandle};
pub use error::{Error, Result};
pub use producer::PackageProducer;
pub use retry::{DropReason, RetryAction, RetryPolicy};

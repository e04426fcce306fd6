//! Domain layer for the package delivery-cost pipeline
//!
//! Provides the pieces the broker pipeline computes with:
//! - Package records and the queue event payload
//! - The pure delivery-cost calculator
//! - A time-bounded, single-flight cached currency rate
//! - The storage collaborator port

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod cost;
pub mod currency;
pub mod error;
pub mod package;
pub mod storage;

pub use cost::compute_cost;
pub use currency::{CbrRateSource, CurrencyRateCache, RateSource};
pub use error::{Error, Result};
pub use package::{Package, PackageEvent};
pub use storage::{InMemoryPackageStore, PackageStore};

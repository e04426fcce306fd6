//! Cached currency rate with single-flight refresh
//!
//! The cache window and the refresh both sit inside one async mutex critical
//! section: concurrent callers arriving during a miss produce exactly one
//! external fetch, and nobody observes a half-updated cache. A failed refresh
//! leaves the cache untouched and propagates, so the caller knows freshness
//! was not honored.

use crate::error::{Error, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

/// External source of the USD exchange rate
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Fetch the current USD rate
    async fn fetch_usd_rate(&self) -> Result<Decimal>;
}

/// CBR daily-JSON rate source
pub struct CbrRateSource {
    url: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct DailyRates {
    #[serde(rename = "Valute")]
    valute: HashMap<String, CurrencyQuote>,
}

#[derive(Debug, Deserialize)]
struct CurrencyQuote {
    #[serde(rename = "Value")]
    value: Decimal,
}

impl CbrRateSource {
    /// Create a source with a bounded request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl RateSource for CbrRateSource {
    async fn fetch_usd_rate(&self) -> Result<Decimal> {
        let response = self.http_client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(Error::RateStatus(response.status().as_u16()));
        }

        let rates: DailyRates = response.json().await?;

        rates
            .valute
            .get("USD")
            .map(|quote| quote.value)
            .ok_or(Error::RateSchema)
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: Decimal,
    fetched_at: Instant,
}

/// Time-bounded cache over a [`RateSource`]
pub struct CurrencyRateCache {
    source: Arc<dyn RateSource>,
    cache_duration: Duration,
    cached: Mutex<Option<CachedRate>>,
}

impl CurrencyRateCache {
    /// Create an empty cache; the first `get_rate` call fetches
    pub fn new(source: Arc<dyn RateSource>, cache_duration: Duration) -> Self {
        Self {
            source,
            cache_duration,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached rate, refreshing it when the window has expired.
    ///
    /// Rate and timestamp update atomically together; on fetch failure the
    /// previous entry (stale or empty) is kept and the error is returned.
    pub async fn get_rate(&self) -> Result<Decimal> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = *cached {
            if entry.fetched_at.elapsed() < self.cache_duration {
                return Ok(entry.rate);
            }
        }

        let rate = self.source.fetch_usd_rate().await?;
        *cached = Some(CachedRate {
            rate,
            fetched_at: Instant::now(),
        });

        info!("Refreshed USD rate: {}", rate);
        Ok(rate)
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use aura_models::{Bar, DataConfig, MarketContext};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::MarketDataError;

/// The data-fetching collaborator. Mockable for testing.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_market_context(&self, instrument: &str) -> Result<MarketContext, MarketDataError>;

    /// Last context this source fetched successfully, if it keeps one.
    fn last_known(&self, _instrument: &str) -> Option<MarketContext> {
        None
    }
}

/// On-disk snapshot format: `{snapshot_dir}/{instrument}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub bars: Vec<Bar>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
}

/// Reads market snapshots written by an external data pipeline.
///
/// Remembers the last good context per instrument so a later failed
/// fetch can degrade to stale data instead of an empty context.
pub struct SnapshotSource {
    dir: PathBuf,
    last_good: Mutex<HashMap<String, MarketContext>>,
}

impl SnapshotSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_good: Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshot_path(&self, instrument: &str) -> PathBuf {
        snapshot_path(&self.dir, instrument)
    }
}

/// Instrument symbols may contain path separators (e.g. `EUR/USD`).
fn snapshot_path(dir: &Path, instrument: &str) -> PathBuf {
    let file_name: String = instrument
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    dir.join(format!("{file_name}.json"))
}

#[async_trait]
impl MarketDataSource for SnapshotSource {
    async fn fetch_market_context(&self, instrument: &str) -> Result<MarketContext, MarketDataError> {
        let path = self.snapshot_path(instrument);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MarketDataError::NotFound(instrument.to_string()));
            }
            Err(source) => {
                return Err(MarketDataError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        let snapshot: MarketSnapshot = serde_json::from_str(&raw)?;
        if snapshot.bars.is_empty() {
            return Err(MarketDataError::Empty {
                instrument: instrument.to_string(),
            });
        }

        let context = MarketContext::from_bars(instrument, snapshot.bars, snapshot.bid, snapshot.ask);
        debug!(instrument, price = %context.current_price, bars = context.bars.len(), "Loaded market snapshot");

        if let Ok(mut last_good) = self.last_good.lock() {
            last_good.insert(instrument.to_string(), context.clone());
        }
        Ok(context)
    }

    fn last_known(&self, instrument: &str) -> Option<MarketContext> {
        self.last_good
            .lock()
            .ok()
            .and_then(|last_good| last_good.get(instrument).cloned())
    }
}

/// Fetch a context with bounded exponential backoff.
///
/// Never fails: once every attempt has failed it returns the source's
/// last-known context marked stale, or an empty degraded context.
pub async fn fetch_with_retry(
    source: &dyn MarketDataSource,
    instrument: &str,
    config: &DataConfig,
) -> MarketContext {
    let attempts = config.fetch_attempts.max(1);
    let per_attempt = Duration::from_secs(config.fetch_timeout_seconds);
    let max_backoff = Duration::from_millis(config.fetch_backoff_max_ms);
    let mut backoff = Duration::from_millis(config.fetch_backoff_ms);

    for attempt in 1..=attempts {
        match tokio::time::timeout(per_attempt, source.fetch_market_context(instrument)).await {
            Ok(Ok(context)) => {
                if attempt > 1 {
                    info!(instrument, attempt, "Market data fetched after retry");
                }
                return context;
            }
            Ok(Err(e)) => {
                warn!(instrument, attempt, attempts, error = %e, "Market data fetch failed");
            }
            Err(_) => {
                warn!(
                    instrument,
                    attempt,
                    attempts,
                    timeout_secs = per_attempt.as_secs(),
                    "Market data fetch timed out"
                );
            }
        }

        if attempt < attempts {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    match source.last_known(instrument) {
        Some(context) => {
            warn!(instrument, as_of = %context.as_of, "Using last known market data");
            context.into_stale()
        }
        None => {
            warn!(instrument, "No market data available, continuing with degraded context");
            MarketContext::degraded(instrument)
        }
    }
}

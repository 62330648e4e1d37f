use std::collections::BTreeSet;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::opinion::ProducerId;

/// Top-level configuration for Aura.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuraConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Configuration for the workflow archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Path to the SQLite archive file.
    pub sqlite_path: String,
    /// Maximum number of records kept in the in-memory moka cache.
    pub memory_max_capacity: u64,
    /// TTL in seconds for cached record reads.
    pub memory_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/aura_archive.db".to_string(),
            memory_max_capacity: 10_000,
            memory_ttl_seconds: 300,
        }
    }
}

/// Configuration for the market-data collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataConfig {
    /// Directory holding one `{instrument}.json` snapshot per instrument.
    pub snapshot_dir: String,
    /// Total fetch attempts before degrading to stale data.
    pub fetch_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub fetch_backoff_max_ms: u64,
    /// Per-attempt timeout.
    pub fetch_timeout_seconds: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: "data/snapshots".to_string(),
            fetch_attempts: 3,
            fetch_backoff_ms: 500,
            fetch_backoff_max_ms: 5_000,
            fetch_timeout_seconds: 10,
        }
    }
}

/// Configuration for the opinion producers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentsConfig {
    /// Per-producer timeout in seconds.
    pub producer_timeout_seconds: u64,
    /// Default model for producers.
    pub producer_model: String,
    pub producers: Vec<ProducerConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            producer_timeout_seconds: 45,
            producer_model: "claude-3-5-haiku-latest".to_string(),
            producers: ProducerId::ALL
                .iter()
                .map(|id| ProducerConfig {
                    id: *id,
                    model: None,
                    enabled: true,
                })
                .collect(),
        }
    }
}

impl AgentsConfig {
    pub fn enabled_producers(&self) -> Vec<ProducerId> {
        self.producers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.id)
            .collect()
    }

    /// Model for `id`, falling back to `producer_model`.
    pub fn model_for(&self, id: ProducerId) -> &str {
        self.producers
            .iter()
            .find(|p| p.id == id)
            .and_then(|p| p.model.as_deref())
            .unwrap_or(&self.producer_model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerConfig {
    pub id: ProducerId,
    /// Override model for this producer.
    pub model: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Static per-producer weights. Need not sum to one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentWeights {
    pub technical: Decimal,
    #[serde(rename = "macro")]
    pub macroeconomic: Decimal,
    pub sentiment: Decimal,
}

impl AgentWeights {
    pub fn weight(&self, producer: ProducerId) -> Decimal {
        match producer {
            ProducerId::Technical => self.technical,
            ProducerId::Macro => self.macroeconomic,
            ProducerId::Sentiment => self.sentiment,
        }
    }
}

impl Default for AgentWeights {
    fn default() -> Self {
        Self {
            technical: dec!(0.4),
            macroeconomic: dec!(0.3),
            sentiment: dec!(0.3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceThresholds {
    pub strong_signal: Decimal,
    pub moderate_signal: Decimal,
    pub weak_signal: Decimal,
    /// Below this the direction is forced to HOLD.
    pub hold_threshold: Decimal,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            strong_signal: dec!(0.75),
            moderate_signal: dec!(0.65),
            weak_signal: dec!(0.55),
            hold_threshold: dec!(0.65),
        }
    }
}

/// Bands used to tier market, volatility and liquidity risk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskBands {
    /// Annualised volatility at or above which risk is MEDIUM.
    pub volatility_medium: Decimal,
    pub volatility_high: Decimal,
    /// Absolute max drawdown at or above which market risk is MEDIUM.
    pub drawdown_medium: Decimal,
    pub drawdown_high: Decimal,
    /// Volume ratio at or above which liquidity risk is LOW.
    pub volume_ratio_low: Decimal,
    /// Volume ratio at or above which liquidity risk is MEDIUM.
    pub volume_ratio_medium: Decimal,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            volatility_medium: dec!(0.14),
            volatility_high: dec!(0.20),
            drawdown_medium: dec!(0.10),
            drawdown_high: dec!(0.20),
            volume_ratio_low: dec!(1.5),
            volume_ratio_medium: dec!(1.0),
        }
    }
}

/// Stop and target placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeLevelPolicy {
    pub min_stop_pct: Decimal,
    pub max_stop_pct: Decimal,
    /// Stop distance per unit of annualised volatility.
    pub volatility_stop_multiplier: Decimal,
    /// Target distance as a multiple of stop distance.
    pub reward_multiple: Decimal,
    /// Decimal places for entry, stop and target.
    pub price_precision: u32,
}

impl Default for TradeLevelPolicy {
    fn default() -> Self {
        Self {
            min_stop_pct: dec!(0.02),
            max_stop_pct: dec!(0.10),
            volatility_stop_multiplier: dec!(0.1),
            reward_multiple: dec!(2),
            price_precision: 4,
        }
    }
}

/// Configuration for the aggregation engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub weights: AgentWeights,
    #[serde(default)]
    pub thresholds: ConfidenceThresholds,
    /// Confidence multiplier applied when market data is stale.
    #[serde(default = "default_staleness_discount")]
    pub staleness_discount: Decimal,
    #[serde(default)]
    pub risk_bands: RiskBands,
    #[serde(default)]
    pub trade_levels: TradeLevelPolicy,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            weights: AgentWeights::default(),
            thresholds: ConfidenceThresholds::default(),
            staleness_discount: default_staleness_discount(),
            risk_bands: RiskBands::default(),
            trade_levels: TradeLevelPolicy::default(),
        }
    }
}

fn default_staleness_discount() -> Decimal {
    dec!(0.8)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    /// Hard upper bound on the AWAITING_FEEDBACK wait. Zero skips the wait.
    pub feedback_timeout_seconds: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            feedback_timeout_seconds: 300,
        }
    }
}

impl AuraConfig {
    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let enabled = self.agents.enabled_producers();
        if enabled.is_empty() {
            return Err(ConfigError::NoProducers);
        }
        let mut seen = BTreeSet::new();
        for id in &enabled {
            if !seen.insert(*id) {
                return Err(ConfigError::DuplicateProducer(*id));
            }
        }

        self.synthesis.validate(&enabled)?;

        if self.data.fetch_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "data.fetch_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.data.fetch_backoff_ms > self.data.fetch_backoff_max_ms {
            return Err(ConfigError::Invalid {
                name: "data.fetch_backoff_ms",
                reason: "must not exceed fetch_backoff_max_ms".to_string(),
            });
        }
        Ok(())
    }
}

impl SynthesisConfig {
    pub fn validate(&self, enabled: &[ProducerId]) -> Result<(), ConfigError> {
        for producer in ProducerId::ALL {
            let weight = self.weights.weight(producer);
            if weight < Decimal::ZERO {
                return Err(ConfigError::NegativeWeight {
                    producer,
                    weight: weight.to_string(),
                });
            }
        }
        let total: Decimal = enabled.iter().map(|p| self.weights.weight(*p)).sum();
        if total <= Decimal::ZERO {
            return Err(ConfigError::NoPositiveWeight);
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("strong_signal", t.strong_signal),
            ("moderate_signal", t.moderate_signal),
            ("weak_signal", t.weak_signal),
            ("hold_threshold", t.hold_threshold),
            ("staleness_discount", self.staleness_discount),
        ] {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(ConfigError::ThresholdOutOfRange {
                    name,
                    value: value.to_string(),
                });
            }
        }
        if t.strong_signal < t.moderate_signal || t.moderate_signal < t.weak_signal {
            return Err(ConfigError::ThresholdOrder);
        }

        let bands = &self.risk_bands;
        if bands.volatility_medium > bands.volatility_high {
            return Err(ConfigError::Invalid {
                name: "risk_bands.volatility_medium",
                reason: "must not exceed volatility_high".to_string(),
            });
        }
        if bands.drawdown_medium > bands.drawdown_high {
            return Err(ConfigError::Invalid {
                name: "risk_bands.drawdown_medium",
                reason: "must not exceed drawdown_high".to_string(),
            });
        }
        if bands.volume_ratio_medium > bands.volume_ratio_low {
            return Err(ConfigError::Invalid {
                name: "risk_bands.volume_ratio_medium",
                reason: "must not exceed volume_ratio_low".to_string(),
            });
        }

        let levels = &self.trade_levels;
        if levels.min_stop_pct <= Decimal::ZERO || levels.max_stop_pct <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                name: "trade_levels.min_stop_pct",
                reason: "stop percentages must be positive".to_string(),
            });
        }
        if levels.max_stop_pct >= Decimal::ONE {
            return Err(ConfigError::Invalid {
                name: "trade_levels.max_stop_pct",
                reason: "must be below 1 so a LONG stop stays above zero".to_string(),
            });
        }
        if levels.min_stop_pct > levels.max_stop_pct {
            return Err(ConfigError::Invalid {
                name: "trade_levels.max_stop_pct",
                reason: "must be at least min_stop_pct".to_string(),
            });
        }
        if levels.reward_multiple <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                name: "trade_levels.reward_multiple",
                reason: "must be positive".to_string(),
            });
        }
        if levels.volatility_stop_multiplier < Decimal::ZERO {
            return Err(ConfigError::Invalid {
                name: "trade_levels.volatility_stop_multiplier",
                reason: "must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

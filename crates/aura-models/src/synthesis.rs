use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::opinion::{OpinionDirection, ProducerId};

/// Output direction vocabulary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    Long,
    Short,
    Hold,
}

impl From<OpinionDirection> for SignalDirection {
    fn from(direction: OpinionDirection) -> Self {
        match direction {
            OpinionDirection::Buy => SignalDirection::Long,
            OpinionDirection::Sell => SignalDirection::Short,
            OpinionDirection::Hold => SignalDirection::Hold,
        }
    }
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignalDirection::Long => "LONG",
            SignalDirection::Short => "SHORT",
            SignalDirection::Hold => "HOLD",
        };
        f.write_str(label)
    }
}

/// Discrete confidence bucket. Ordered weakest first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    None,
    Weak,
    Moderate,
    Strong,
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignalStrength::None => "NONE",
            SignalStrength::Weak => "WEAK",
            SignalStrength::Moderate => "MODERATE",
            SignalStrength::Strong => "STRONG",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskAssessment {
    pub market_risk: RiskLevel,
    pub volatility_risk: RiskLevel,
    pub liquidity_risk: RiskLevel,
}

impl RiskAssessment {
    pub fn uniform(level: RiskLevel) -> Self {
        Self {
            market_risk: level,
            volatility_risk: level,
            liquidity_risk: level,
        }
    }
}

/// When the signal should be looked at again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewHorizon {
    NextSession,
    WithinFourHours,
    WithinOneHour,
}

impl ReviewHorizon {
    pub fn for_strength(strength: SignalStrength) -> Self {
        match strength {
            SignalStrength::Strong => ReviewHorizon::NextSession,
            SignalStrength::Moderate => ReviewHorizon::WithinFourHours,
            SignalStrength::Weak | SignalStrength::None => ReviewHorizon::WithinOneHour,
        }
    }
}

impl fmt::Display for ReviewHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReviewHorizon::NextSession => "next market session",
            ReviewHorizon::WithinFourHours => "within 4 hours",
            ReviewHorizon::WithinOneHour => "within 1 hour",
        };
        f.write_str(label)
    }
}

/// The single calibrated decision produced from a set of opinions.
///
/// Trade levels and `risk_reward_ratio` are `None` exactly when
/// `direction` is HOLD. They serialize as explicit `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisResult {
    pub asset: String,
    pub direction: SignalDirection,
    /// 0.0 to 1.0 after staleness discount.
    pub confidence: Decimal,
    pub signal_strength: SignalStrength,
    pub entry_target: Option<Decimal>,
    pub stop_loss_target: Option<Decimal>,
    pub take_profit_target: Option<Decimal>,
    pub risk_reward_ratio: Option<Decimal>,
    /// Direction of each producer that returned a valid opinion.
    pub agent_consensus: BTreeMap<ProducerId, OpinionDirection>,
    pub confirming_factors: Vec<String>,
    pub conflicting_factors: Vec<String>,
    pub risk_assessment: RiskAssessment,
    pub reasoning: String,
    pub recommendations: Vec<String>,
    pub next_review: ReviewHorizon,
    /// Set when the market context was stale and the discount applied.
    pub data_stale: bool,
    /// Set when no producer returned a usable opinion.
    pub insufficient_data: bool,
}

impl SynthesisResult {
    pub fn has_trade_levels(&self) -> bool {
        self.entry_target.is_some()
            && self.stop_loss_target.is_some()
            && self.take_profit_target.is_some()
            && self.risk_reward_ratio.is_some()
    }

    pub fn has_no_trade_levels(&self) -> bool {
        self.entry_target.is_none()
            && self.stop_loss_target.is_none()
            && self.take_profit_target.is_none()
            && self.risk_reward_ratio.is_none()
    }

    /// Trade levels are present for LONG/SHORT and absent for HOLD.
    pub fn levels_consistent(&self) -> bool {
        match self.direction {
            SignalDirection::Hold => self.has_no_trade_levels(),
            SignalDirection::Long | SignalDirection::Short => self.has_trade_levels(),
        }
    }
}

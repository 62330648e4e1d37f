use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Error marker recorded on an opinion whose producer exceeded its timeout.
pub const TIMEOUT_ERROR: &str = "timeout";

/// The fixed set of opinion producers the core knows how to weigh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProducerId {
    Technical,
    Macro,
    Sentiment,
}

impl ProducerId {
    pub const ALL: [ProducerId; 3] = [ProducerId::Technical, ProducerId::Macro, ProducerId::Sentiment];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProducerId::Technical => "technical",
            ProducerId::Macro => "macro",
            ProducerId::Sentiment => "sentiment",
        }
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction vocabulary used by producers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpinionDirection {
    Buy,
    Sell,
    Hold,
}

impl OpinionDirection {
    /// Lenient mapping from free-form producer vocabulary.
    /// Anything that is not clearly bullish or bearish is HOLD.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" | "BULLISH" => OpinionDirection::Buy,
            "SELL" | "SHORT" | "BEARISH" => OpinionDirection::Sell,
            _ => OpinionDirection::Hold,
        }
    }
}

impl fmt::Display for OpinionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OpinionDirection::Buy => "BUY",
            OpinionDirection::Sell => "SELL",
            OpinionDirection::Hold => "HOLD",
        };
        f.write_str(label)
    }
}

/// A single producer's directional judgment.
///
/// When `error` is set the producer failed: direction is HOLD and
/// confidence is zero, and the opinion carries no vote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opinion {
    pub producer_id: ProducerId,
    pub direction: OpinionDirection,
    /// 0.0 to 1.0. Only meaningful when `error` is `None`.
    pub confidence: Decimal,
    pub supporting_factors: Vec<String>,
    pub conflicting_factors: Vec<String>,
    pub error: Option<String>,
    /// Free-text summary from the producer, if any.
    #[serde(default)]
    pub reasoning: String,
    /// Wall time the producer took to settle.
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl Opinion {
    /// Build a valid opinion. Confidence is clamped into [0, 1].
    pub fn new(producer_id: ProducerId, direction: OpinionDirection, confidence: Decimal) -> Self {
        Self {
            producer_id,
            direction,
            confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
            supporting_factors: Vec::new(),
            conflicting_factors: Vec::new(),
            error: None,
            reasoning: String::new(),
            elapsed_ms: 0,
        }
    }

    /// Build a failed opinion carrying `error`.
    pub fn failed(producer_id: ProducerId, error: impl Into<String>) -> Self {
        Self {
            producer_id,
            direction: OpinionDirection::Hold,
            confidence: Decimal::ZERO,
            supporting_factors: Vec::new(),
            conflicting_factors: Vec::new(),
            error: Some(error.into()),
            reasoning: String::new(),
            elapsed_ms: 0,
        }
    }

    pub fn timed_out(producer_id: ProducerId) -> Self {
        Self::failed(producer_id, TIMEOUT_ERROR)
    }

    pub fn with_supporting<I, S>(mut self, factors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supporting_factors = factors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_conflicting<I, S>(mut self, factors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conflicting_factors = factors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    /// No error and a confidence within [0, 1].
    pub fn is_valid(&self) -> bool {
        self.error.is_none() && self.confidence >= Decimal::ZERO && self.confidence <= Decimal::ONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_clamps_confidence() {
        let high = Opinion::new(ProducerId::Technical, OpinionDirection::Buy, dec!(1.7));
        assert_eq!(high.confidence, Decimal::ONE);

        let low = Opinion::new(ProducerId::Macro, OpinionDirection::Sell, dec!(-0.2));
        assert_eq!(low.confidence, Decimal::ZERO);
    }

    #[test]
    fn failed_opinion_defaults_to_hold_zero() {
        let opinion = Opinion::timed_out(ProducerId::Sentiment);
        assert!(!opinion.is_valid());
        assert_eq!(opinion.direction, OpinionDirection::Hold);
        assert_eq!(opinion.confidence, Decimal::ZERO);
        assert_eq!(opinion.error.as_deref(), Some(TIMEOUT_ERROR));
    }

    #[test]
    fn out_of_range_confidence_is_invalid() {
        let mut opinion = Opinion::new(ProducerId::Sentiment, OpinionDirection::Buy, dec!(0.5));
        assert!(opinion.is_valid());
        opinion.confidence = dec!(5);
        assert!(!opinion.is_valid());
        opinion.confidence = dec!(-0.01);
        assert!(!opinion.is_valid());
    }

    #[test]
    fn direction_labels_are_lenient() {
        assert_eq!(OpinionDirection::from_label("bullish"), OpinionDirection::Buy);
        assert_eq!(OpinionDirection::from_label(" LONG "), OpinionDirection::Buy);
        assert_eq!(OpinionDirection::from_label("Bearish"), OpinionDirection::Sell);
        assert_eq!(OpinionDirection::from_label("short"), OpinionDirection::Sell);
        assert_eq!(OpinionDirection::from_label("neutral"), OpinionDirection::Hold);
        assert_eq!(OpinionDirection::from_label(""), OpinionDirection::Hold);
    }

    #[test]
    fn wire_vocabulary() {
        assert_eq!(
            serde_json::to_string(&ProducerId::Technical).unwrap(),
            "\"technical\""
        );
        assert_eq!(
            serde_json::to_string(&OpinionDirection::Buy).unwrap(),
            "\"BUY\""
        );
    }

    #[test]
    fn opinion_parses_without_optional_fields() {
        let json = r#"{
            "producer_id": "macro",
            "direction": "SELL",
            "confidence": "0.85",
            "supporting_factors": ["Yield curve inversion"],
            "conflicting_factors": [],
            "error": null
        }"#;
        let opinion: Opinion = serde_json::from_str(json).unwrap();
        assert_eq!(opinion.producer_id, ProducerId::Macro);
        assert_eq!(opinion.confidence, dec!(0.85));
        assert!(opinion.reasoning.is_empty());
        assert_eq!(opinion.elapsed_ms, 0);
    }
}

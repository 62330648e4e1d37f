use std::collections::{BTreeMap, HashSet};

use aura_models::{
    MarketContext, Opinion, OpinionDirection, ProducerId, ReviewHorizon, RiskAssessment,
    RiskBands, RiskLevel, SignalDirection, SignalStrength, SynthesisConfig, SynthesisResult,
};
use rust_decimal::Decimal;

/// Turns a set of opinions and a market context into one SynthesisResult.
///
/// Pure and deterministic: no clocks, no I/O, no randomness. Degraded input
/// never panics or errors; it produces a conservative HOLD instead.
#[derive(Debug, Clone)]
pub struct SignalSynthesizer {
    config: SynthesisConfig,
}

/// Weighted vote totals over the valid opinions.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteTally {
    pub buy: Decimal,
    pub sell: Decimal,
    pub hold: Decimal,
    /// Sum of the weights of every valid opinion.
    pub weight: Decimal,
}

impl VoteTally {
    pub fn total(&self, direction: OpinionDirection) -> Decimal {
        match direction {
            OpinionDirection::Buy => self.buy,
            OpinionDirection::Sell => self.sell,
            OpinionDirection::Hold => self.hold,
        }
    }

    /// Direction with the highest total. Any tie for the lead goes to HOLD.
    pub fn winner(&self) -> OpinionDirection {
        let top = self.buy.max(self.sell).max(self.hold);
        let leaders: Vec<OpinionDirection> = [
            OpinionDirection::Buy,
            OpinionDirection::Sell,
            OpinionDirection::Hold,
        ]
        .into_iter()
        .filter(|d| self.total(*d) == top)
        .collect();
        match leaders.as_slice() {
            [single] => *single,
            _ => OpinionDirection::Hold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TradeLevels {
    entry: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    risk_reward: Decimal,
}

impl SignalSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    pub fn tally(&self, opinions: &BTreeMap<ProducerId, Opinion>) -> VoteTally {
        let mut tally = VoteTally {
            buy: Decimal::ZERO,
            sell: Decimal::ZERO,
            hold: Decimal::ZERO,
            weight: Decimal::ZERO,
        };
        for opinion in opinions.values().filter(|o| o.is_valid()) {
            let weight = self.config.weights.weight(opinion.producer_id);
            let contribution = weight * opinion.confidence;
            match opinion.direction {
                OpinionDirection::Buy => tally.buy += contribution,
                OpinionDirection::Sell => tally.sell += contribution,
                OpinionDirection::Hold => tally.hold += contribution,
            }
            tally.weight += weight;
        }
        tally
    }

    pub fn synthesize(
        &self,
        opinions: &BTreeMap<ProducerId, Opinion>,
        context: &MarketContext,
    ) -> SynthesisResult {
        let risk_assessment = classify_risk(context, &self.config.risk_bands);
        let tally = self.tally(opinions);
        let valid = opinions.values().filter(|o| o.is_valid()).count();

        if valid == 0 || tally.weight <= Decimal::ZERO {
            return self.insufficient_data(opinions, context, risk_assessment, valid);
        }

        let winner = tally.winner();
        let mut confidence = tally.total(winner) / tally.weight;
        if context.stale {
            confidence *= self.config.staleness_discount;
        }
        let confidence = confidence.clamp(Decimal::ZERO, Decimal::ONE);
        let signal_strength = self.strength(confidence);

        let mut reasoning = vec![vote_summary(opinions, &tally, winner, confidence)];
        if context.stale {
            reasoning.push(format!(
                "Market data is stale; confidence discounted by a factor of {}.",
                self.config.staleness_discount.normalize()
            ));
        }

        let mut direction = SignalDirection::from(winner);
        if direction != SignalDirection::Hold && confidence < self.config.thresholds.hold_threshold {
            reasoning.push(format!(
                "Confidence {} is below the hold threshold {}; direction forced to HOLD.",
                fmt_decimal(confidence),
                self.config.thresholds.hold_threshold.normalize()
            ));
            direction = SignalDirection::Hold;
        }

        let mut levels = None;
        if direction != SignalDirection::Hold {
            match self.trade_levels(direction, context) {
                Some(computed) => levels = Some(computed),
                None => {
                    reasoning.push(
                        "No usable entry price is available; direction forced to HOLD.".to_string(),
                    );
                    direction = SignalDirection::Hold;
                }
            }
        }

        let (confirming_factors, conflicting_factors) = partition_factors(opinions, winner);
        let next_review = ReviewHorizon::for_strength(signal_strength);
        let recommendations =
            recommendations(direction, signal_strength, &risk_assessment, next_review);

        SynthesisResult {
            asset: context.instrument.clone(),
            direction,
            confidence,
            signal_strength,
            entry_target: levels.as_ref().map(|l| l.entry),
            stop_loss_target: levels.as_ref().map(|l| l.stop_loss),
            take_profit_target: levels.as_ref().map(|l| l.take_profit),
            risk_reward_ratio: levels.as_ref().map(|l| l.risk_reward),
            agent_consensus: consensus(opinions),
            confirming_factors,
            conflicting_factors,
            risk_assessment,
            reasoning: reasoning.join(" "),
            recommendations,
            next_review,
            data_stale: context.stale,
            insufficient_data: false,
        }
    }

    /// Classify confidence against the configured thresholds, strongest first.
    pub fn strength(&self, confidence: Decimal) -> SignalStrength {
        let t = &self.config.thresholds;
        if confidence >= t.strong_signal {
            SignalStrength::Strong
        } else if confidence >= t.moderate_signal {
            SignalStrength::Moderate
        } else if confidence >= t.weak_signal {
            SignalStrength::Weak
        } else {
            SignalStrength::None
        }
    }

    /// Entry, stop and target for a LONG or SHORT call.
    ///
    /// Stop distance scales with volatility within the configured bounds;
    /// the target sits `reward_multiple` stop distances away. Levels are
    /// rounded first and the ratio is taken from the rounded levels.
    fn trade_levels(&self, direction: SignalDirection, context: &MarketContext) -> Option<TradeLevels> {
        if !context.has_usable_price() {
            return None;
        }
        let policy = &self.config.trade_levels;
        let quote = match direction {
            SignalDirection::Long => context.ask,
            SignalDirection::Short => context.bid,
            SignalDirection::Hold => return None,
        };
        let entry = quote
            .filter(|q| *q > Decimal::ZERO)
            .unwrap_or(context.current_price);

        let stop_pct = (context.volatility * policy.volatility_stop_multiplier)
            .clamp(policy.min_stop_pct, policy.max_stop_pct);
        let reward_pct = stop_pct * policy.reward_multiple;

        let (stop_loss, take_profit) = match direction {
            SignalDirection::Long => (
                entry * (Decimal::ONE - stop_pct),
                entry * (Decimal::ONE + reward_pct),
            ),
            _ => (
                entry * (Decimal::ONE + stop_pct),
                entry * (Decimal::ONE - reward_pct),
            ),
        };

        let precision = policy.price_precision;
        let entry = entry.round_dp(precision);
        let stop_loss = stop_loss.round_dp(precision);
        let take_profit = take_profit.round_dp(precision);

        let risk = (entry - stop_loss).abs();
        if risk.is_zero() {
            return None;
        }
        let risk_reward = (take_profit - entry).abs() / risk;

        Some(TradeLevels {
            entry,
            stop_loss,
            take_profit,
            risk_reward,
        })
    }

    fn insufficient_data(
        &self,
        opinions: &BTreeMap<ProducerId, Opinion>,
        context: &MarketContext,
        risk_assessment: RiskAssessment,
        valid: usize,
    ) -> SynthesisResult {
        let mut reasoning = if valid == 0 {
            format!(
                "Insufficient data: none of the {} producers returned a usable opinion.",
                opinions.len()
            )
        } else {
            "Insufficient data: the producers that responded carry no weight.".to_string()
        };
        let failures = failure_summary(opinions);
        if !failures.is_empty() {
            reasoning.push(' ');
            reasoning.push_str(&failures);
        }

        SynthesisResult {
            asset: context.instrument.clone(),
            direction: SignalDirection::Hold,
            confidence: Decimal::ZERO,
            signal_strength: SignalStrength::None,
            entry_target: None,
            stop_loss_target: None,
            take_profit_target: None,
            risk_reward_ratio: None,
            agent_consensus: consensus(opinions),
            confirming_factors: Vec::new(),
            conflicting_factors: Vec::new(),
            risk_assessment,
            reasoning,
            recommendations: vec![
                "Manual analysis recommended".to_string(),
                format!("Review signal {}", ReviewHorizon::WithinOneHour),
            ],
            next_review: ReviewHorizon::WithinOneHour,
            data_stale: context.stale,
            insufficient_data: true,
        }
    }
}

fn consensus(opinions: &BTreeMap<ProducerId, Opinion>) -> BTreeMap<ProducerId, OpinionDirection> {
    opinions
        .values()
        .filter(|o| o.is_valid())
        .map(|o| (o.producer_id, o.direction))
        .collect()
}

/// Confirming: supporting factors of opinions that agree with `winner`.
/// Conflicting: every factor reported by opinions that disagree.
fn partition_factors(
    opinions: &BTreeMap<ProducerId, Opinion>,
    winner: OpinionDirection,
) -> (Vec<String>, Vec<String>) {
    let mut confirming = Vec::new();
    let mut conflicting = Vec::new();
    for opinion in opinions.values().filter(|o| o.is_valid()) {
        if opinion.direction == winner {
            confirming.extend(opinion.supporting_factors.iter().cloned());
        } else {
            conflicting.extend(opinion.supporting_factors.iter().cloned());
            conflicting.extend(opinion.conflicting_factors.iter().cloned());
        }
    }
    (dedup(confirming), dedup(conflicting))
}

/// Drop repeats, keeping first occurrence order.
fn dedup(factors: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    factors
        .into_iter()
        .filter(|f| seen.insert(f.clone()))
        .collect()
}

fn classify_risk(context: &MarketContext, bands: &RiskBands) -> RiskAssessment {
    if !context.has_usable_price() {
        return RiskAssessment::uniform(RiskLevel::High);
    }

    let volatility_risk = band(context.volatility, bands.volatility_medium, bands.volatility_high);
    let market_risk = context
        .risk_metrics
        .as_ref()
        .map(|m| band(m.max_drawdown.abs(), bands.drawdown_medium, bands.drawdown_high))
        .unwrap_or(volatility_risk);
    let liquidity_risk = match context.volume_ratio() {
        Some(ratio) if ratio >= bands.volume_ratio_low => RiskLevel::Low,
        Some(ratio) if ratio >= bands.volume_ratio_medium => RiskLevel::Medium,
        Some(_) => RiskLevel::High,
        None => RiskLevel::Medium,
    };

    RiskAssessment {
        market_risk,
        volatility_risk,
        liquidity_risk,
    }
}

fn band(value: Decimal, medium: Decimal, high: Decimal) -> RiskLevel {
    if value >= high {
        RiskLevel::High
    } else if value >= medium {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn recommendations(
    direction: SignalDirection,
    strength: SignalStrength,
    risk: &RiskAssessment,
    next_review: ReviewHorizon,
) -> Vec<String> {
    let mut recs = Vec::new();
    if direction == SignalDirection::Hold {
        recs.push("Wait for clearer signals before entering position".to_string());
        recs.push("Monitor market conditions for better entry points".to_string());
    } else {
        recs.push(
            match strength {
                SignalStrength::Strong => "Consider taking position with full allocation",
                SignalStrength::Moderate => "Consider taking position with reduced allocation",
                SignalStrength::Weak | SignalStrength::None => {
                    "Consider taking position with minimal allocation"
                }
            }
            .to_string(),
        );
        if strength >= SignalStrength::Moderate {
            recs.push("Monitor position closely and trail the stop loss as price moves in your favor".to_string());
        } else {
            recs.push("Reduce position size until the signal strengthens".to_string());
        }
        if risk.market_risk == RiskLevel::High {
            recs.push("Use tight stop losses due to high market risk".to_string());
        }
        if risk.liquidity_risk == RiskLevel::High {
            recs.push("Consider smaller position size due to liquidity concerns".to_string());
        }
    }
    recs.push(format!("Review signal {next_review}"));
    recs
}

fn vote_summary(
    opinions: &BTreeMap<ProducerId, Opinion>,
    tally: &VoteTally,
    winner: OpinionDirection,
    confidence: Decimal,
) -> String {
    let valid = opinions.values().filter(|o| o.is_valid()).count();
    let mut summary = format!(
        "{valid} of {} producers returned opinions. Weighted vote BUY {}, SELL {}, HOLD {} over weight {}; {winner} leads with confidence {}.",
        opinions.len(),
        fmt_decimal(tally.buy),
        fmt_decimal(tally.sell),
        fmt_decimal(tally.hold),
        fmt_decimal(tally.weight),
        fmt_decimal(confidence),
    );
    let failures = failure_summary(opinions);
    if !failures.is_empty() {
        summary.push(' ');
        summary.push_str(&failures);
    }
    summary
}

fn failure_summary(opinions: &BTreeMap<ProducerId, Opinion>) -> String {
    opinions
        .values()
        .filter_map(|o| o.error.as_ref().map(|e| format!("{} failed ({e}).", o.producer_id)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn fmt_decimal(value: Decimal) -> String {
    value.round_dp(4).normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_models::{ConfidenceThresholds, RiskMetrics};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn context(price: Decimal, volatility: Decimal) -> MarketContext {
        MarketContext {
            instrument: "SPY".to_string(),
            current_price: price,
            bid: None,
            ask: None,
            bars: vec![],
            volume: Some(dec!(1200)),
            average_volume: Some(dec!(1000)),
            volatility,
            risk_metrics: None,
            stale: false,
            as_of: Utc::now(),
        }
    }

    fn opinions(list: Vec<Opinion>) -> BTreeMap<ProducerId, Opinion> {
        list.into_iter().map(|o| (o.producer_id, o)).collect()
    }

    fn buy(id: ProducerId, confidence: Decimal) -> Opinion {
        Opinion::new(id, OpinionDirection::Buy, confidence)
    }

    fn sell(id: ProducerId, confidence: Decimal) -> Opinion {
        Opinion::new(id, OpinionDirection::Sell, confidence)
    }

    fn hold(id: ProducerId, confidence: Decimal) -> Opinion {
        Opinion::new(id, OpinionDirection::Hold, confidence)
    }

    fn permissive() -> SignalSynthesizer {
        SignalSynthesizer::new(SynthesisConfig {
            thresholds: ConfidenceThresholds {
                strong_signal: dec!(0.75),
                moderate_signal: dec!(0.55),
                weak_signal: dec!(0.45),
                hold_threshold: dec!(0.50),
            },
            ..SynthesisConfig::default()
        })
    }

    #[test]
    fn all_failed_is_zero_confidence_hold() {
        let synth = SignalSynthesizer::new(SynthesisConfig::default());
        let set = opinions(vec![
            Opinion::timed_out(ProducerId::Technical),
            Opinion::failed(ProducerId::Macro, "claude exited 1"),
            Opinion::failed(ProducerId::Sentiment, "parse error"),
        ]);
        let result = synth.synthesize(&set, &context(dec!(100), dec!(0.15)));

        assert_eq!(result.direction, SignalDirection::Hold);
        assert_eq!(result.confidence, Decimal::ZERO);
        assert_eq!(result.signal_strength, SignalStrength::None);
        assert!(result.insufficient_data);
        assert!(result.has_no_trade_levels());
        assert!(result.agent_consensus.is_empty());
        assert!(result.reasoning.starts_with("Insufficient data"));
        assert!(result.reasoning.contains("technical failed (timeout)"));
        assert_eq!(result.recommendations[0], "Manual analysis recommended");
    }

    #[test]
    fn empty_opinion_set_is_insufficient() {
        let synth = SignalSynthesizer::new(SynthesisConfig::default());
        let result = synth.synthesize(&BTreeMap::new(), &context(dec!(100), dec!(0.1)));
        assert!(result.insufficient_data);
        assert_eq!(result.direction, SignalDirection::Hold);
    }

    #[test]
    fn weighted_vote_and_exact_confidence() {
        // BUY 0.4*0.9 + 0.3*0.8 = 0.60, HOLD 0.3*0.5 = 0.15, weight 1.0.
        let synth = permissive();
        let set = opinions(vec![
            buy(ProducerId::Technical, dec!(0.9)),
            buy(ProducerId::Macro, dec!(0.8)),
            hold(ProducerId::Sentiment, dec!(0.5)),
        ]);
        let tally = synth.tally(&set);
        assert_eq!(tally.buy, dec!(0.60));
        assert_eq!(tally.hold, dec!(0.15));
        assert_eq!(tally.weight, dec!(1.0));

        let result = synth.synthesize(&set, &context(dec!(100), dec!(0.15)));
        assert_eq!(result.direction, SignalDirection::Long);
        assert_eq!(result.confidence, dec!(0.6));
        assert_eq!(result.signal_strength, SignalStrength::Moderate);
        assert_eq!(result.next_review, ReviewHorizon::WithinFourHours);
    }

    #[test]
    fn below_hold_threshold_forces_hold_but_keeps_strength() {
        // Default hold threshold 0.65 overrides a 0.60 BUY lead.
        let synth = SignalSynthesizer::new(SynthesisConfig::default());
        let set = opinions(vec![
            buy(ProducerId::Technical, dec!(0.9)),
            buy(ProducerId::Macro, dec!(0.8)),
            hold(ProducerId::Sentiment, dec!(0.5)),
        ]);
        let result = synth.synthesize(&set, &context(dec!(100), dec!(0.15)));
        assert_eq!(result.direction, SignalDirection::Hold);
        assert_eq!(result.confidence, dec!(0.6));
        assert_eq!(result.signal_strength, SignalStrength::Weak);
        assert!(result.has_no_trade_levels());
        assert!(result.reasoning.contains("forced to HOLD"));
        assert_eq!(
            result.recommendations[0],
            "Wait for clearer signals before entering position"
        );
    }

    #[test]
    fn failed_producer_weight_is_excluded() {
        // SELL 0.3*0.9 + 0.3*0.85 = 0.525 over weight 0.6.
        let synth = SignalSynthesizer::new(SynthesisConfig::default());
        let set = opinions(vec![
            Opinion::timed_out(ProducerId::Technical),
            sell(ProducerId::Macro, dec!(0.9)),
            sell(ProducerId::Sentiment, dec!(0.85)),
        ]);
        let result = synth.synthesize(&set, &context(dec!(100), dec!(0.15)));
        assert_eq!(result.direction, SignalDirection::Short);
        assert_eq!(result.confidence, dec!(0.875));
        assert_eq!(result.signal_strength, SignalStrength::Strong);
        assert_eq!(result.agent_consensus.len(), 2);
        assert!(!result.agent_consensus.contains_key(&ProducerId::Technical));
    }

    #[test]
    fn ties_resolve_to_hold() {
        let synth = permissive();
        let set = opinions(vec![
            buy(ProducerId::Macro, dec!(0.8)),
            sell(ProducerId::Sentiment, dec!(0.8)),
        ]);
        let tally = synth.tally(&set);
        assert_eq!(tally.winner(), OpinionDirection::Hold);

        let result = synth.synthesize(&set, &context(dec!(100), dec!(0.15)));
        assert_eq!(result.direction, SignalDirection::Hold);
        // HOLD's own total is zero, so confidence is zero.
        assert_eq!(result.confidence, Decimal::ZERO);
    }

    #[test]
    fn stale_data_discounts_confidence() {
        let synth = SignalSynthesizer::new(SynthesisConfig::default());
        let set = opinions(vec![
            sell(ProducerId::Macro, dec!(0.9)),
            sell(ProducerId::Sentiment, dec!(0.85)),
        ]);
        let mut ctx = context(dec!(100), dec!(0.15));
        ctx.stale = true;
        let result = synth.synthesize(&set, &ctx);
        assert_eq!(result.confidence, dec!(0.7));
        assert!(result.data_stale);
        assert_eq!(result.signal_strength, SignalStrength::Moderate);
        assert_eq!(result.direction, SignalDirection::Short);
        assert!(result.reasoning.contains("stale"));
    }

    #[test]
    fn long_levels_use_ask_and_volatility_scaled_stop() {
        let synth = permissive();
        let set = opinions(vec![buy(ProducerId::Technical, dec!(0.9))]);
        let mut ctx = context(dec!(100), dec!(0.5));
        ctx.ask = Some(dec!(100.10));
        ctx.bid = Some(dec!(99.90));

        // stop_pct = clamp(0.5 * 0.1, 0.02, 0.10) = 0.05, target 0.10 away.
        let result = synth.synthesize(&set, &ctx);
        assert_eq!(result.direction, SignalDirection::Long);
        assert_eq!(result.entry_target, Some(dec!(100.10)));
        assert_eq!(result.stop_loss_target, Some(dec!(95.095)));
        assert_eq!(result.take_profit_target, Some(dec!(110.11)));
        assert_eq!(result.risk_reward_ratio, Some(dec!(2)));
        assert!(result.levels_consistent());
    }

    #[test]
    fn short_levels_mirror_and_use_bid() {
        let synth = permissive();
        let set = opinions(vec![sell(ProducerId::Macro, dec!(0.9))]);
        let mut ctx = context(dec!(200), dec!(0.05));
        ctx.bid = Some(dec!(199.5));

        // Low volatility clamps the stop to the 2% minimum.
        let result = synth.synthesize(&set, &ctx);
        assert_eq!(result.direction, SignalDirection::Short);
        assert_eq!(result.entry_target, Some(dec!(199.5)));
        assert_eq!(result.stop_loss_target, Some(dec!(203.49)));
        assert_eq!(result.take_profit_target, Some(dec!(191.52)));
        let entry = result.entry_target.unwrap();
        let expected = (result.take_profit_target.unwrap() - entry).abs()
            / (entry - result.stop_loss_target.unwrap()).abs();
        assert_eq!(result.risk_reward_ratio, Some(expected));
    }

    #[test]
    fn no_usable_price_forces_hold_and_high_risk() {
        let synth = permissive();
        let set = opinions(vec![buy(ProducerId::Technical, dec!(0.95))]);
        let result = synth.synthesize(&set, &MarketContext::degraded("SPY"));
        assert_eq!(result.direction, SignalDirection::Hold);
        assert!(result.has_no_trade_levels());
        assert_eq!(result.risk_assessment, RiskAssessment::uniform(RiskLevel::High));
        assert!(result.reasoning.contains("No usable entry price"));
    }

    #[test]
    fn factors_partition_around_winner() {
        let synth = permissive();
        let set = opinions(vec![
            buy(ProducerId::Technical, dec!(0.9))
                .with_supporting(["Uptrend", "Breakout"])
                .with_conflicting(["RSI overbought"]),
            buy(ProducerId::Macro, dec!(0.8)).with_supporting(["Dovish Fed", "Uptrend"]),
            hold(ProducerId::Sentiment, dec!(0.5))
                .with_supporting(["Mixed headlines"])
                .with_conflicting(["Dip buyers active"]),
        ]);
        let result = synth.synthesize(&set, &context(dec!(100), dec!(0.15)));
        assert_eq!(
            result.confirming_factors,
            vec!["Uptrend", "Breakout", "Dovish Fed"]
        );
        assert_eq!(
            result.conflicting_factors,
            vec!["Mixed headlines", "Dip buyers active"]
        );
        assert!(!result
            .conflicting_factors
            .contains(&"RSI overbought".to_string()));
    }

    #[test]
    fn out_of_range_confidence_is_not_counted() {
        let synth = SignalSynthesizer::new(SynthesisConfig::default());
        let mut rogue = buy(ProducerId::Sentiment, dec!(0.5));
        rogue.confidence = dec!(5);
        let set = opinions(vec![
            sell(ProducerId::Technical, dec!(0.95)),
            sell(ProducerId::Macro, dec!(0.95)),
            rogue,
        ]);

        let tally = synth.tally(&set);
        assert_eq!(tally.total(OpinionDirection::Buy), Decimal::ZERO);
        assert_eq!(tally.weight, dec!(0.7));

        let result = synth.synthesize(&set, &context(dec!(100), dec!(0.15)));
        assert_eq!(result.direction, SignalDirection::Short);
        assert_eq!(result.confidence, dec!(0.95));
        assert!(!result.agent_consensus.contains_key(&ProducerId::Sentiment));
    }

    #[test]
    fn risk_bands_classify_context() {
        let bands = RiskBands::default();

        let mut ctx = context(dec!(100), dec!(0.25));
        ctx.volume = Some(dec!(500));
        let risk = classify_risk(&ctx, &bands);
        assert_eq!(risk.volatility_risk, RiskLevel::High);
        assert_eq!(risk.market_risk, RiskLevel::High);
        assert_eq!(risk.liquidity_risk, RiskLevel::High);

        let mut ctx = context(dec!(100), dec!(0.05));
        ctx.volume = Some(dec!(2000));
        ctx.risk_metrics = Some(RiskMetrics {
            annualized_volatility: dec!(0.05),
            max_drawdown: dec!(-0.12),
            value_at_risk_95: dec!(-0.01),
            sharpe_ratio: dec!(1.1),
        });
        let risk = classify_risk(&ctx, &bands);
        assert_eq!(risk.volatility_risk, RiskLevel::Low);
        assert_eq!(risk.market_risk, RiskLevel::Medium);
        assert_eq!(risk.liquidity_risk, RiskLevel::Low);

        let mut ctx = context(dec!(100), dec!(0.15));
        ctx.average_volume = None;
        assert_eq!(classify_risk(&ctx, &bands).liquidity_risk, RiskLevel::Medium);
    }

    #[test]
    fn recommendations_follow_strength_and_risk() {
        let synth = SignalSynthesizer::new(SynthesisConfig::default());
        let set = opinions(vec![sell(ProducerId::Macro, dec!(0.9))]);
        let mut ctx = context(dec!(100), dec!(0.3));
        ctx.volume = Some(dec!(100));
        let result = synth.synthesize(&set, &ctx);
        assert_eq!(result.signal_strength, SignalStrength::Strong);
        assert_eq!(
            result.recommendations,
            vec![
                "Consider taking position with full allocation".to_string(),
                "Monitor position closely and trail the stop loss as price moves in your favor".to_string(),
                "Use tight stop losses due to high market risk".to_string(),
                "Consider smaller position size due to liquidity concerns".to_string(),
                "Review signal next market session".to_string(),
            ]
        );
    }

    #[test]
    fn synthesis_is_deterministic() {
        let synth = SignalSynthesizer::new(SynthesisConfig::default());
        let set = opinions(vec![
            buy(ProducerId::Technical, dec!(0.77)).with_supporting(["a", "b"]),
            sell(ProducerId::Macro, dec!(0.31)).with_supporting(["c"]),
            Opinion::timed_out(ProducerId::Sentiment),
        ]);
        let ctx = context(dec!(123.4567), dec!(0.18));
        let first = synth.synthesize(&set, &ctx);
        let second = synth.synthesize(&set, &ctx);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let weights = [dec!(0), dec!(0.01), dec!(1), dec!(7.5)];
        let confidences = [dec!(0), dec!(0.33), dec!(1)];
        let directions = [OpinionDirection::Buy, OpinionDirection::Sell, OpinionDirection::Hold];
        for w in weights {
            for c in confidences {
                for d in directions {
                    let mut config = SynthesisConfig::default();
                    config.weights.technical = w;
                    let synth = SignalSynthesizer::new(config);
                    let set = opinions(vec![
                        Opinion::new(ProducerId::Technical, d, c),
                        buy(ProducerId::Macro, dec!(0.6)),
                        sell(ProducerId::Sentiment, c),
                    ]);
                    let result = synth.synthesize(&set, &context(dec!(10), dec!(0.2)));
                    assert!(result.confidence >= Decimal::ZERO && result.confidence <= Decimal::ONE);
                    assert!(result.levels_consistent());
                    if result.confidence < synth.config().thresholds.hold_threshold {
                        assert_eq!(result.direction, SignalDirection::Hold);
                    }
                }
            }
        }
    }
}

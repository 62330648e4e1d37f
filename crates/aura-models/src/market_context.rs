use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Periods per year used to annualise per-bar statistics.
pub const PERIODS_PER_YEAR: f64 = 252.0;

/// Annual risk-free rate used by the Sharpe ratio.
pub const RISK_FREE_RATE: f64 = 0.02;

/// Number of trailing bars averaged for the volume baseline.
pub const AVERAGE_VOLUME_WINDOW: usize = 30;

/// One OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Risk statistics derived from a bar series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskMetrics {
    pub annualized_volatility: Decimal,
    /// Largest peak-to-trough decline, as a non-positive fraction.
    pub max_drawdown: Decimal,
    /// 5th percentile of per-bar returns.
    pub value_at_risk_95: Decimal,
    pub sharpe_ratio: Decimal,
}

impl RiskMetrics {
    /// Derive risk metrics from close-to-close returns.
    /// Returns `None` when fewer than two returns are available.
    pub fn from_bars(bars: &[Bar]) -> Option<Self> {
        let closes: Vec<f64> = bars.iter().filter_map(|b| b.close.to_f64()).collect();
        let returns: Vec<f64> = closes
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        if returns.len() < 2 {
            return None;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();

        let annualized_volatility = std_dev * PERIODS_PER_YEAR.sqrt();

        let sharpe_ratio = if std_dev > 0.0 {
            let excess_mean = mean - RISK_FREE_RATE / PERIODS_PER_YEAR;
            excess_mean / std_dev * PERIODS_PER_YEAR.sqrt()
        } else {
            0.0
        };

        let mut cumulative = 1.0;
        let mut peak = 1.0f64;
        let mut max_drawdown = 0.0f64;
        for r in &returns {
            cumulative *= 1.0 + r;
            peak = peak.max(cumulative);
            max_drawdown = max_drawdown.min((cumulative - peak) / peak);
        }

        Some(Self {
            annualized_volatility: to_decimal(annualized_volatility),
            max_drawdown: to_decimal(max_drawdown),
            value_at_risk_95: to_decimal(quantile(&returns, 0.05)),
            sharpe_ratio: to_decimal(sharpe_ratio),
        })
    }
}

/// Linear-interpolated quantile of an unsorted sample.
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(6))
        .unwrap_or(Decimal::ZERO)
}

/// Immutable market snapshot for one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketContext {
    pub instrument: String,
    pub current_price: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    /// Recent OHLCV series, oldest first.
    pub bars: Vec<Bar>,
    /// Volume of the most recent bar.
    pub volume: Option<Decimal>,
    pub average_volume: Option<Decimal>,
    /// Annualised volatility estimate (0.20 = 20%).
    pub volatility: Decimal,
    pub risk_metrics: Option<RiskMetrics>,
    /// Set when the data could not be freshly fetched.
    pub stale: bool,
    pub as_of: DateTime<Utc>,
}

impl MarketContext {
    /// Build a fresh context from a bar series. Price, volume baseline,
    /// volatility and risk metrics are all derived from `bars`.
    pub fn from_bars(
        instrument: impl Into<String>,
        bars: Vec<Bar>,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
    ) -> Self {
        let last = bars.last();
        let current_price = last.map(|b| b.close).unwrap_or(Decimal::ZERO);
        let volume = last.map(|b| b.volume);
        let as_of = last.map(|b| b.timestamp).unwrap_or_else(Utc::now);

        let window = &bars[bars.len().saturating_sub(AVERAGE_VOLUME_WINDOW)..];
        let average_volume = if window.is_empty() {
            None
        } else {
            let total: Decimal = window.iter().map(|b| b.volume).sum();
            Some(total / Decimal::from(window.len()))
        };

        let risk_metrics = RiskMetrics::from_bars(&bars);
        let volatility = risk_metrics
            .as_ref()
            .map(|m| m.annualized_volatility)
            .unwrap_or(Decimal::ZERO);

        Self {
            instrument: instrument.into(),
            current_price,
            bid,
            ask,
            bars,
            volume,
            average_volume,
            volatility,
            risk_metrics,
            stale: false,
            as_of,
        }
    }

    /// Empty placeholder used when no data could be obtained at all.
    pub fn degraded(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            current_price: Decimal::ZERO,
            bid: None,
            ask: None,
            bars: Vec::new(),
            volume: None,
            average_volume: None,
            volatility: Decimal::ZERO,
            risk_metrics: None,
            stale: true,
            as_of: Utc::now(),
        }
    }

    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }

    pub fn has_usable_price(&self) -> bool {
        self.current_price > Decimal::ZERO
    }

    /// Latest volume relative to its trailing average.
    pub fn volume_ratio(&self) -> Option<Decimal> {
        match (self.volume, self.average_volume) {
            (Some(volume), Some(avg)) if avg > Decimal::ZERO => Some(volume / avg),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(day: u32, close: Decimal, volume: Decimal) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 3, day, 16, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn from_bars_derives_price_and_volume() {
        let bars = vec![
            bar(3, dec!(100), dec!(1000)),
            bar(4, dec!(102), dec!(2000)),
            bar(5, dec!(101), dec!(3000)),
        ];
        let ctx = MarketContext::from_bars("SPY", bars, None, Some(dec!(101.05)));

        assert_eq!(ctx.current_price, dec!(101));
        assert_eq!(ctx.volume, Some(dec!(3000)));
        assert_eq!(ctx.average_volume, Some(dec!(2000)));
        assert_eq!(ctx.volume_ratio(), Some(dec!(1.5)));
        assert_eq!(ctx.ask, Some(dec!(101.05)));
        assert!(!ctx.stale);
        assert!(ctx.risk_metrics.is_some());
        assert!(ctx.volatility > Decimal::ZERO);
    }

    #[test]
    fn risk_metrics_need_two_returns() {
        let bars = vec![bar(3, dec!(100), dec!(1)), bar(4, dec!(101), dec!(1))];
        assert!(RiskMetrics::from_bars(&bars).is_none());
    }

    #[test]
    fn drawdown_tracks_peak_to_trough() {
        let bars = vec![
            bar(3, dec!(100), dec!(1)),
            bar(4, dec!(120), dec!(1)),
            bar(5, dec!(90), dec!(1)),
            bar(6, dec!(95), dec!(1)),
        ];
        let metrics = RiskMetrics::from_bars(&bars).unwrap();
        assert_eq!(metrics.max_drawdown, dec!(-0.25));
    }

    #[test]
    fn flat_series_has_zero_volatility() {
        let bars: Vec<Bar> = (3..8).map(|d| bar(d, dec!(50), dec!(10))).collect();
        let metrics = RiskMetrics::from_bars(&bars).unwrap();
        assert_eq!(metrics.annualized_volatility, Decimal::ZERO);
        assert_eq!(metrics.sharpe_ratio, Decimal::ZERO);
        assert_eq!(metrics.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn degraded_context_is_stale_without_price() {
        let ctx = MarketContext::degraded("ZAR=X");
        assert!(ctx.stale);
        assert!(!ctx.has_usable_price());
        assert_eq!(ctx.volume_ratio(), None);
    }
}

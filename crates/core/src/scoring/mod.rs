//! Sub-score calculators and the composite score.
//!
//! `smart_money (0-10) + ai (0-10) + quantitative (0-2)`, total in [0, 22]. Every sub-score is
//! checked against its declared range before summation and a value outside it is reported as
//! [`PipelineError::InvalidScore`] rather than clamped.

pub mod ai;
pub mod quantitative;
pub mod smart_money;

use crate::config::env_parse;
use crate::domain::signal::TickerSignalRecord;
use crate::error::{PipelineError, SubScoreKind};
use serde::{Deserialize, Serialize};

pub use quantitative::QuantBreakdown;
pub use smart_money::SmartMoneyBreakdown;

pub const COMPOSITE_MAX: f64 = 22.0;

/// Tunable thresholds and weights for the sub-score calculators.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub min_insider_buy_value: f64,

    /// Buy value (in multiples of `min_insider_buy_value`) at which the insider curve reaches
    /// ~63% of its weight.
    pub insider_saturation_multiple: f64,
    pub insider_weight: f64,

    /// Net funds accumulating at which the superinvestor curve reaches ~63% of its weight.
    pub superinvestor_saturation_funds: f64,
    pub superinvestor_weight: f64,

    /// Debt ratio must be strictly below this for the low-debt point.
    pub quant_max_debt_ratio: f64,

    /// Drop from 52-week high (percent) must reach this for the near-low point.
    pub quant_min_drop_pct: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_insider_buy_value: 100_000.0,
            insider_saturation_multiple: 2.0,
            insider_weight: 6.0,
            superinvestor_saturation_funds: 2.0,
            superinvestor_weight: 4.0,
            quant_max_debt_ratio: 0.5,
            quant_min_drop_pct: 30.0,
        }
    }
}

impl ScoringConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = Self::default();

        let fields: [(&str, &mut f64); 7] = [
            ("MIN_INSIDER_BUY_VALUE", &mut out.min_insider_buy_value),
            ("INSIDER_SATURATION_MULTIPLE", &mut out.insider_saturation_multiple),
            ("INSIDER_WEIGHT", &mut out.insider_weight),
            ("SUPERINVESTOR_SATURATION_FUNDS", &mut out.superinvestor_saturation_funds),
            ("SUPERINVESTOR_WEIGHT", &mut out.superinvestor_weight),
            ("QUANT_MAX_DEBT_RATIO", &mut out.quant_max_debt_ratio),
            ("QUANT_MIN_DROP_PCT", &mut out.quant_min_drop_pct),
        ];
        for (key, slot) in fields {
            if let Some(v) = env_parse::<f64>(key)? {
                *slot = v;
            }
        }

        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let named = [
            ("MIN_INSIDER_BUY_VALUE", self.min_insider_buy_value),
            ("INSIDER_SATURATION_MULTIPLE", self.insider_saturation_multiple),
            ("INSIDER_WEIGHT", self.insider_weight),
            ("SUPERINVESTOR_SATURATION_FUNDS", self.superinvestor_saturation_funds),
            ("SUPERINVESTOR_WEIGHT", self.superinvestor_weight),
            ("QUANT_MAX_DEBT_RATIO", self.quant_max_debt_ratio),
            ("QUANT_MIN_DROP_PCT", self.quant_min_drop_pct),
        ];
        for (key, v) in named {
            anyhow::ensure!(
                v.is_finite() && v >= 0.0,
                "{key} must be a non-negative number (got {v})"
            );
        }
        anyhow::ensure!(
            self.min_insider_buy_value > 0.0,
            "MIN_INSIDER_BUY_VALUE must be > 0"
        );
        let weights = self.insider_weight + self.superinvestor_weight;
        anyhow::ensure!(
            (weights - SubScoreKind::SmartMoney.max()).abs() < 1e-9,
            "INSIDER_WEIGHT + SUPERINVESTOR_WEIGHT must equal {} (got {weights})",
            SubScoreKind::SmartMoney.max()
        );
        anyhow::ensure!(
            self.quant_min_drop_pct <= 100.0,
            "QUANT_MIN_DROP_PCT must be <= 100 (got {})",
            self.quant_min_drop_pct
        );
        Ok(())
    }
}

/// Composite score with the intermediate values that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub smart_money: SmartMoneyBreakdown,
    pub ai: f64,
    pub quantitative: QuantBreakdown,
    pub total: f64,
}

impl CompositeScore {
    pub fn smart_money_total(&self) -> f64 {
        self.smart_money.total
    }
}

/// Runs all three calculators and sums them.
pub fn score(record: &TickerSignalRecord, cfg: &ScoringConfig) -> Result<CompositeScore, PipelineError> {
    let smart_money = smart_money::smart_money_score(record, cfg);
    let ai = ai::ai_score(record)?;
    let quantitative = quantitative::quantitative_score(record, cfg);

    check_range(&record.symbol, SubScoreKind::SmartMoney, smart_money.total)?;
    check_range(&record.symbol, SubScoreKind::Ai, ai)?;
    check_range(&record.symbol, SubScoreKind::Quantitative, quantitative.total)?;

    Ok(CompositeScore {
        smart_money,
        ai,
        quantitative,
        total: smart_money.total + ai + quantitative.total,
    })
}

fn check_range(symbol: &str, kind: SubScoreKind, value: f64) -> Result<(), PipelineError> {
    if (0.0..=kind.max()).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::InvalidScore {
            symbol: symbol.to_string(),
            kind,
            value,
        })
    }
}

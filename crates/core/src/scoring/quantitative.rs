use crate::domain::signal::TickerSignalRecord;
use crate::scoring::ScoringConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantBreakdown {
    pub low_debt: bool,
    pub near_low: bool,
    pub total: f64,
}

/// Quantitative sub-score in [0, 2]: one whole point per threshold met, no interpolation.
pub fn quantitative_score(record: &TickerSignalRecord, cfg: &ScoringConfig) -> QuantBreakdown {
    let low_debt = record
        .fundamentals
        .debt_ratio
        .is_some_and(|d| d < cfg.quant_max_debt_ratio);
    let near_low = record.price_metrics.drop_from_high_pct >= cfg.quant_min_drop_pct;

    QuantBreakdown {
        low_debt,
        near_low,
        total: f64::from(u8::from(low_debt) + u8::from(near_low)),
    }
}

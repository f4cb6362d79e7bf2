use crate::domain::signal::TickerSignalRecord;
use crate::scoring::ScoringConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmartMoneyBreakdown {
    /// Aggregate insider buy value as a multiple of `min_insider_buy_value`.
    pub insider_ratio: f64,
    pub insider_points: f64,
    /// Net superinvestor accumulation, floored at zero.
    pub superinvestor_net: u32,
    pub superinvestor_points: f64,
    pub total: f64,
}

/// Smart-money sub-score in [0, 10].
///
/// Each signal goes through a saturating curve `weight * (1 - exp(-x / scale))`: it grows with
/// its input, never decreases, and approaches but never exceeds its weight. Insider buying is
/// measured in multiples of the configured minimum buy value; superinvestor accumulation in
/// funds (adding minus exiting, zero when net negative).
pub fn smart_money_score(record: &TickerSignalRecord, cfg: &ScoringConfig) -> SmartMoneyBreakdown {
    let buy_value = record.insider_activity.buy_value.max(0.0);
    let insider_ratio = if cfg.min_insider_buy_value > 0.0 {
        buy_value / cfg.min_insider_buy_value
    } else if buy_value > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    let insider_points = saturate(insider_ratio, cfg.insider_saturation_multiple) * cfg.insider_weight;

    let superinvestor_net = record.superinvestor_activity.net_accumulation();
    let superinvestor_points = saturate(
        f64::from(superinvestor_net),
        cfg.superinvestor_saturation_funds,
    ) * cfg.superinvestor_weight;

    let total = (insider_points + superinvestor_points).clamp(0.0, 10.0);

    SmartMoneyBreakdown {
        insider_ratio,
        insider_points,
        superinvestor_net,
        superinvestor_points,
        total,
    }
}

fn saturate(x: f64, scale: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if scale <= 0.0 || x.is_infinite() {
        return 1.0;
    }
    1.0 - (-x / scale).exp()
}

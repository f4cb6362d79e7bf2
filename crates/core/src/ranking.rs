use crate::domain::signal::TickerSignalRecord;
use crate::scoring::CompositeScore;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTicker {
    pub record: TickerSignalRecord,
    pub score: CompositeScore,
}

/// Total order used for ranking:
/// composite desc, then smart-money desc, then superinvestor net change desc, then symbol asc.
/// The net change is compared signed, so net selling still separates otherwise equal tickers.
pub fn compare(a: &ScoredTicker, b: &ScoredTicker) -> Ordering {
    b.score
        .total
        .total_cmp(&a.score.total)
        .then_with(|| b.score.smart_money.total.total_cmp(&a.score.smart_money.total))
        .then_with(|| {
            b.record
                .superinvestor_activity
                .net_change
                .cmp(&a.record.superinvestor_activity.net_change)
        })
        .then_with(|| a.record.symbol.cmp(&b.record.symbol))
}

/// Returns the candidates best-first. The input is left untouched.
pub fn rank(scored: &[ScoredTicker]) -> Vec<ScoredTicker> {
    let mut out = scored.to_vec();
    out.sort_by(compare);
    out
}

use crate::domain::signal::{PriceMetrics, SuperinvestorActivity};
use crate::scoring::CompositeScore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One final pick, in rank order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub rank: u32,
    pub symbol: String,
    pub score: CompositeScore,
    pub price_metrics: PriceMetrics,
    pub superinvestor_activity: SuperinvestorActivity,
    pub narrative: Option<String>,
    pub reasons: Vec<String>,
    pub ai_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    FailedEligibilityGate,
    MissingData,
    DataUnavailable,
    InvalidScore,
    RecentlyRecommended,
    BelowMinimumScore,
    OverRecommendationLimit,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::FailedEligibilityGate => "failed_eligibility_gate",
            SkipReason::MissingData => "missing_data",
            SkipReason::DataUnavailable => "data_unavailable",
            SkipReason::InvalidScore => "invalid_score",
            SkipReason::RecentlyRecommended => "recently_recommended",
            SkipReason::BelowMinimumScore => "below_minimum_score",
            SkipReason::OverRecommendationLimit => "over_recommendation_limit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedTicker {
    pub symbol: String,
    pub reason: SkipReason,
    pub detail: String,
}

/// A scored ticker held back by the cooldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressedTicker {
    pub symbol: String,
    pub composite: f64,
    pub last_recommended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub recommendations: Vec<Recommendation>,
    pub suppressed: Vec<SuppressedTicker>,
    pub skipped: Vec<SkippedTicker>,
    pub skip_counts: BTreeMap<SkipReason, usize>,
}

impl RunReport {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            recommendations: Vec::new(),
            suppressed: Vec::new(),
            skipped: Vec::new(),
            skip_counts: BTreeMap::new(),
        }
    }

    pub fn skip(&mut self, symbol: &str, reason: SkipReason, detail: impl Into<String>) {
        *self.skip_counts.entry(reason).or_insert(0) += 1;
        self.skipped.push(SkippedTicker {
            symbol: symbol.to_string(),
            reason,
            detail: detail.into(),
        });
    }

    pub fn skipped_count(&self, reason: SkipReason) -> usize {
        self.skip_counts.get(&reason).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn skip_counts_accumulate_by_reason() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let mut report = RunReport::new(now);
        report.skip("AAA", SkipReason::DataUnavailable, "timeout");
        report.skip("BBB", SkipReason::DataUnavailable, "HTTP 503");
        report.skip("CCC", SkipReason::MissingData, "market_cap");

        assert_eq!(report.skipped.len(), 3);
        assert_eq!(report.skipped_count(SkipReason::DataUnavailable), 2);
        assert_eq!(report.skipped_count(SkipReason::MissingData), 1);
        assert_eq!(report.skipped_count(SkipReason::InvalidScore), 0);
    }

    #[test]
    fn skip_counts_serialize_with_snake_case_keys() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let mut report = RunReport::new(now);
        report.skip("AAA", SkipReason::FailedEligibilityGate, "market cap");
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["skip_counts"]["failed_eligibility_gate"], 1);
    }
}

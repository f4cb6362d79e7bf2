use crate::config::env_parse;
use crate::domain::recommendation::{Recommendation, RunReport, SkipReason, SuppressedTicker};
use crate::domain::signal::AiAssessment;
use crate::error::PipelineError;
use crate::ingest::provider::{InsiderActivityProvider, MarketDataProvider, SuperinvestorProvider};
use crate::llm::{ThesisProvider, ThesisRequest};
use crate::normalize::{check_required_fields, normalize, LookbackWindow, RawTickerPayload};
use crate::ranking::{rank, ScoredTicker};
use crate::report::ReportRenderer;
use crate::scoring::{score, ScoringConfig};
use crate::storage::history::{HistoryStore, RecordOutcome, DEFAULT_COOLDOWN_DAYS};
use crate::universe::{normalize_universe, EligibilityGate};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for day-valued settings (about a century).
const MAX_DAYS: i64 = 36_500;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub cooldown_days: i64,
    pub insider_lookback_days: i64,

    /// Upper bound for each collaborator call made on behalf of one ticker.
    pub ticker_timeout: Duration,

    /// `None` keeps every eligible candidate.
    pub max_recommendations: Option<usize>,
    pub min_composite_score: Option<f64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            cooldown_days: DEFAULT_COOLDOWN_DAYS,
            insider_lookback_days: 180,
            ticker_timeout: Duration::from_secs(30),
            max_recommendations: None,
            min_composite_score: None,
        }
    }
}

impl PipelineOptions {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = Self::default();

        if let Some(v) = env_parse::<i64>("COOLDOWN_DAYS")? {
            out.cooldown_days = v;
        }
        if let Some(v) = env_parse::<i64>("INSIDER_LOOKBACK_DAYS")? {
            out.insider_lookback_days = v;
        }
        if let Some(v) = env_parse::<u64>("TICKER_TIMEOUT_SECS")? {
            out.ticker_timeout = Duration::from_secs(v);
        }
        out.max_recommendations = env_parse::<usize>("MAX_RECOMMENDATIONS")?;
        out.min_composite_score = env_parse::<f64>("MIN_COMPOSITE_SCORE")?;

        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (0..=MAX_DAYS).contains(&self.cooldown_days),
            "COOLDOWN_DAYS must be within 0..={MAX_DAYS} (got {})",
            self.cooldown_days
        );
        anyhow::ensure!(
            (1..=MAX_DAYS).contains(&self.insider_lookback_days),
            "INSIDER_LOOKBACK_DAYS must be within 1..={MAX_DAYS} (got {})",
            self.insider_lookback_days
        );
        anyhow::ensure!(
            !self.ticker_timeout.is_zero(),
            "TICKER_TIMEOUT_SECS must be > 0"
        );
        if let Some(max) = self.max_recommendations {
            anyhow::ensure!(max >= 1, "MAX_RECOMMENDATIONS must be >= 1 when set");
        }
        if let Some(min) = self.min_composite_score {
            anyhow::ensure!(
                min.is_finite() && min >= 0.0,
                "MIN_COMPOSITE_SCORE must be a non-negative number (got {min})"
            );
        }
        Ok(())
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::days(self.cooldown_days)
    }
}

/// External services the coordinator pulls from.
#[derive(Clone)]
pub struct Collaborators {
    pub market: Arc<dyn MarketDataProvider>,
    pub insider: Arc<dyn InsiderActivityProvider>,
    pub superinvestor: Arc<dyn SuperinvestorProvider>,
    pub thesis: Arc<dyn ThesisProvider>,
}

enum Evaluation {
    Scored(ScoredTicker),
    Skipped(SkipReason, String),
}

pub struct Coordinator {
    collaborators: Collaborators,
    scoring: ScoringConfig,
    gate: EligibilityGate,
    options: PipelineOptions,
}

impl Coordinator {
    pub fn new(
        collaborators: Collaborators,
        scoring: ScoringConfig,
        gate: EligibilityGate,
        options: PipelineOptions,
    ) -> Self {
        Self {
            collaborators,
            scoring,
            gate,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// One screening pass over `universe` as of `now`.
    ///
    /// Per-ticker failures are recorded as skips and never abort the run. History is read once
    /// for the eligibility filter and appended to once, for the final picks only.
    pub async fn run(
        &self,
        universe: &[String],
        history: &HistoryStore,
        now: DateTime<Utc>,
    ) -> RunReport {
        let started = Instant::now();
        let symbols = normalize_universe(universe);
        let window = LookbackWindow::ending_at(now.date_naive(), self.options.insider_lookback_days);
        let mut report = RunReport::new(now);

        tracing::info!(
            universe = symbols.len(),
            market_provider = self.collaborators.market.provider_name(),
            thesis_provider = ?self.collaborators.thesis.provider(),
            %now,
            "screening run started"
        );

        let mut scored = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            match self.evaluate(symbol, window, now).await {
                Evaluation::Scored(s) => {
                    tracing::debug!(
                        %symbol,
                        composite = s.score.total,
                        smart_money = s.score.smart_money.total,
                        ai = s.score.ai,
                        quantitative = s.score.quantitative.total,
                        "ticker scored"
                    );
                    scored.push(s);
                }
                Evaluation::Skipped(reason, detail) => {
                    report.skip(symbol, reason, detail);
                }
            }
        }

        let ranked = rank(&scored);
        let selected = self.select(ranked, history, now, &mut report).await;

        // Record only after every filter has run.
        for pick in selected {
            let symbol = pick.record.symbol.clone();
            match history.record(&symbol, pick.score.total, now).await {
                RecordOutcome::Recorded => {
                    let rank = report.recommendations.len() as u32 + 1;
                    report.recommendations.push(into_recommendation(rank, pick));
                }
                RecordOutcome::AlreadyRecorded => {
                    tracing::warn!(%symbol, "recommendation already recorded at this instant; dropping");
                    report.skip(&symbol, SkipReason::RecentlyRecommended, "already recorded at this instant");
                }
                RecordOutcome::CoolingDown { last_recommended_at } => {
                    tracing::warn!(
                        %symbol,
                        %last_recommended_at,
                        "symbol recorded concurrently by another run; dropping"
                    );
                    report.suppressed.push(SuppressedTicker {
                        symbol: symbol.clone(),
                        composite: pick.score.total,
                        last_recommended_at: Some(last_recommended_at),
                    });
                    report.skip(&symbol, SkipReason::RecentlyRecommended, "recorded concurrently");
                }
            }
        }

        tracing::info!(
            recommendations = report.recommendations.len(),
            suppressed = report.suppressed.len(),
            skipped = report.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "screening run finished"
        );
        for (reason, count) in &report.skip_counts {
            tracing::info!(reason = reason.as_str(), count, "skipped tickers");
        }

        report
    }

    /// Hands the report to the renderer. Failure is logged only; history is already recorded.
    pub async fn render(&self, renderer: &dyn ReportRenderer, report: &RunReport) -> Option<PathBuf> {
        match renderer.render(report).await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "report written");
                Some(path)
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "report rendering failed");
                None
            }
        }
    }

    async fn evaluate(&self, symbol: &str, window: LookbackWindow, now: DateTime<Utc>) -> Evaluation {
        let c = &self.collaborators;

        let market = match self
            .bounded(symbol, "market data", c.market.market_snapshot(symbol))
            .await
        {
            Ok(m) => m,
            Err(err) => return skip(err),
        };

        if let Err(err) = check_required_fields(symbol, &market) {
            return skip(err);
        }

        if let Err(rejection) = self.gate.check(&market) {
            tracing::debug!(%symbol, %rejection, "failed eligibility gate");
            return Evaluation::Skipped(SkipReason::FailedEligibilityGate, rejection.to_string());
        }

        let insider_transactions = match self
            .bounded(symbol, "insider activity", c.insider.insider_transactions(symbol, window))
            .await
        {
            Ok(v) => v,
            Err(err) => return skip(err),
        };
        let superinvestor = match self
            .bounded(symbol, "superinvestor holdings", c.superinvestor.superinvestor_holdings(symbol))
            .await
        {
            Ok(v) => v,
            Err(err) => return skip(err),
        };

        let payload = RawTickerPayload {
            symbol: symbol.to_string(),
            market,
            insider_transactions,
            superinvestor,
        };
        let record = match normalize(&payload, window) {
            Ok(r) => r,
            Err(err) => return skip(err),
        };

        let request = ThesisRequest {
            as_of_date: now.date_naive(),
            summary: record.summary(),
        };
        let ai = match self
            .bounded(symbol, "AI thesis", c.thesis.generate_thesis(request))
            .await
        {
            Ok(thesis) => AiAssessment {
                subscore: thesis.subscore,
                narrative: Some(thesis.narrative),
                reasons: thesis.reasons,
                available: true,
            },
            Err(err) => {
                tracing::warn!(%symbol, error = %err, "AI thesis unavailable; scoring with 0");
                AiAssessment::unavailable()
            }
        };
        let record = record.with_ai(ai);

        match score(&record, &self.scoring) {
            Ok(score) => Evaluation::Scored(ScoredTicker { record, score }),
            Err(err) => skip(err),
        }
    }

    async fn select(
        &self,
        ranked: Vec<ScoredTicker>,
        history: &HistoryStore,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Vec<ScoredTicker> {
        let mut selected = Vec::new();
        for candidate in ranked {
            let symbol = candidate.record.symbol.as_str();
            let total = candidate.score.total;

            if !history.is_eligible(symbol, now).await {
                let last = history.last_recommendation(symbol).await.map(|e| e.recommended_at);
                tracing::info!(%symbol, composite = total, last_recommended_at = ?last, "suppressed by cooldown");
                report.suppressed.push(SuppressedTicker {
                    symbol: symbol.to_string(),
                    composite: total,
                    last_recommended_at: last,
                });
                let detail = match last {
                    Some(at) => format!("last recommended {}", at.format("%Y-%m-%d")),
                    None => "in cooldown".to_string(),
                };
                report.skip(symbol, SkipReason::RecentlyRecommended, detail);
                continue;
            }

            if let Some(min) = self.options.min_composite_score {
                if total < min {
                    report.skip(
                        symbol,
                        SkipReason::BelowMinimumScore,
                        format!("composite {total:.2} below {min:.2}"),
                    );
                    continue;
                }
            }

            if let Some(max) = self.options.max_recommendations {
                if selected.len() >= max {
                    report.skip(
                        symbol,
                        SkipReason::OverRecommendationLimit,
                        format!("limit of {max} reached"),
                    );
                    continue;
                }
            }

            selected.push(candidate);
        }
        selected
    }

    async fn bounded<T, F>(
        &self,
        symbol: &str,
        collaborator: &'static str,
        fut: F,
    ) -> Result<T, PipelineError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.options.ticker_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(err)) => Err(PipelineError::data_unavailable(symbol, collaborator, &err)),
            Err(_) => Err(PipelineError::DataUnavailable {
                symbol: symbol.to_string(),
                collaborator,
                detail: format!("timed out after {:?}", self.options.ticker_timeout),
            }),
        }
    }
}

fn skip(err: PipelineError) -> Evaluation {
    match &err {
        PipelineError::InvalidScore { symbol, kind, value } => {
            tracing::error!(%symbol, %kind, value, "sub-score out of range; ticker not scored");
        }
        _ => tracing::warn!(error = %err, "ticker skipped"),
    }
    let reason = err.skip_reason().unwrap_or(SkipReason::DataUnavailable);
    Evaluation::Skipped(reason, err.to_string())
}

fn into_recommendation(rank: u32, pick: ScoredTicker) -> Recommendation {
    let ScoredTicker { record, score } = pick;
    Recommendation {
        rank,
        symbol: record.symbol,
        score,
        price_metrics: record.price_metrics,
        superinvestor_activity: record.superinvestor_activity,
        narrative: record.ai.narrative,
        reasons: record.ai.reasons,
        ai_available: record.ai.available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixture::FixtureProvider;
    use crate::ingest::types::MarketSnapshot;
    use crate::storage::history::{HistoryLog, MemoryHistoryBackend};
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn aaa_like() -> serde_json::Value {
        json!({
            "market": {
                "current_price": 70.0, "52w_high": 100.0, "52w_low": 60.0,
                "market_cap": 5.0e9, "profitable": true, "debt_ratio": 0.3
            },
            "insider": [{"date": "2026-09-01", "value": 200000.0, "type": "buy"}],
            "superinvestor": {"funds_holding": 6, "net_change": 3},
            "thesis": {"subscore": 8.0, "narrative": "Insiders buying a cyclical trough.", "reasons": ["CEO buy"]}
        })
    }

    fn fixture() -> FixtureProvider {
        serde_json::from_value(json!({
            "symbols": {
                "AAA": aaa_like(),
                "BBB": aaa_like(),
                "CCC": {
                    "market": {
                        "current_price": 74.0, "52w_high": 100.0, "52w_low": 60.0,
                        "market_cap": 2.0e9, "profitable": true, "debt_ratio": 1.0
                    },
                    "thesis": {"subscore": 0.0, "narrative": "Nothing notable."}
                },
                "TINY": {
                    "market": {
                        "current_price": 5.0, "52w_high": 10.0, "52w_low": 4.0,
                        "market_cap": 1.0e8, "profitable": true, "debt_ratio": 0.1
                    }
                },
                "NOCAP": {
                    "market": {"current_price": 5.0, "52w_high": 10.0, "52w_low": 4.0, "profitable": true}
                },
                "NOHIST": {
                    "market": {"current_price": 40.0, "market_cap": 4.0e9, "profitable": true, "debt_ratio": 0.2}
                },
                "NOAI": {
                    "market": {
                        "current_price": 60.0, "52w_high": 100.0, "52w_low": 55.0,
                        "market_cap": 3.0e9, "profitable": true, "debt_ratio": 0.2
                    }
                },
                "WILD": {
                    "market": {
                        "current_price": 60.0, "52w_high": 100.0, "52w_low": 55.0,
                        "market_cap": 3.0e9, "profitable": true, "debt_ratio": 0.2
                    },
                    "thesis": {"subscore": 14.0, "narrative": "Off the scale."}
                }
            }
        }))
        .unwrap()
    }

    fn coordinator_with(f: FixtureProvider, options: PipelineOptions) -> Coordinator {
        let f = Arc::new(f);
        Coordinator::new(
            Collaborators {
                market: f.clone(),
                insider: f.clone(),
                superinvestor: f.clone(),
                thesis: f,
            },
            ScoringConfig::default(),
            EligibilityGate::default(),
            options,
        )
    }

    fn coordinator() -> Coordinator {
        coordinator_with(fixture(), PipelineOptions::default())
    }

    async fn store_with_bbb_recent() -> (HistoryStore, MemoryHistoryBackend) {
        let mut log = HistoryLog::default();
        log.record("BBB", 16.0, now() - chrono::Duration::days(10), chrono::Duration::days(60));
        let backend = MemoryHistoryBackend::with_log(log);
        let store = HistoryStore::load(Box::new(backend.clone()), chrono::Duration::days(60))
            .await
            .unwrap();
        (store, backend)
    }

    fn universe(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    fn symbols(report: &RunReport) -> Vec<&str> {
        report.recommendations.iter().map(|r| r.symbol.as_str()).collect()
    }

    #[tokio::test]
    async fn screens_scores_filters_and_records() {
        let (store, _) = store_with_bbb_recent().await;
        let report = coordinator()
            .run(
                &universe(&["aaa", "BBB", " CCC ", "TINY", "NOCAP", "NOAI", "WILD", "GONE"]),
                &store,
                now(),
            )
            .await;

        assert_eq!(symbols(&report), vec!["AAA", "NOAI", "CCC"]);

        let aaa = &report.recommendations[0];
        assert_eq!(aaa.rank, 1);
        assert_eq!(aaa.score.quantitative.total, 2.0);
        assert!(aaa.score.smart_money.total > 5.0 && aaa.score.smart_money.total <= 10.0);
        assert!((aaa.score.total - 16.9).abs() < 0.01, "{:?}", aaa.score);
        assert!(aaa.ai_available);
        assert_eq!(aaa.narrative.as_deref(), Some("Insiders buying a cyclical trough."));

        let noai = &report.recommendations[1];
        assert!(!noai.ai_available);
        assert_eq!(noai.score.ai, 0.0);

        let ccc = &report.recommendations[2];
        assert_eq!(ccc.score.total, 0.0);
        assert_eq!(ccc.rank, 3);

        assert_eq!(report.suppressed.len(), 1);
        assert_eq!(report.suppressed[0].symbol, "BBB");
        assert_eq!(report.skipped_count(SkipReason::RecentlyRecommended), 1);
        assert_eq!(report.skipped_count(SkipReason::FailedEligibilityGate), 1);
        assert_eq!(report.skipped_count(SkipReason::MissingData), 1);
        assert_eq!(report.skipped_count(SkipReason::InvalidScore), 1);
        assert_eq!(report.skipped_count(SkipReason::DataUnavailable), 1);

        assert!(!store.is_eligible("AAA", now()).await);
        assert!(!store.is_eligible("CCC", now()).await);
        assert!(store.is_eligible("WILD", now()).await);
        assert_eq!(store.entries("BBB").await.len(), 1);
    }

    #[tokio::test]
    async fn missing_cap_or_price_history_is_missing_data_not_a_gate_failure() {
        let (store, _) = store_with_bbb_recent().await;
        let report = coordinator()
            .run(&universe(&["NOCAP", "NOHIST", "TINY"]), &store, now())
            .await;

        assert!(report.recommendations.is_empty());
        assert_eq!(report.skipped_count(SkipReason::MissingData), 2);
        assert_eq!(report.skipped_count(SkipReason::FailedEligibilityGate), 1);

        let detail = |symbol: &str| {
            report
                .skipped
                .iter()
                .find(|s| s.symbol == symbol)
                .map(|s| s.detail.clone())
                .unwrap_or_default()
        };
        assert!(detail("NOCAP").contains("market_cap"), "{}", detail("NOCAP"));
        assert!(detail("NOHIST").contains("52w_high"), "{}", detail("NOHIST"));
    }

    #[tokio::test]
    async fn each_pick_is_recorded_once_and_a_rerun_recommends_nothing() {
        let (store, backend) = store_with_bbb_recent().await;
        let c = coordinator();
        let u = universe(&["AAA", "CCC"]);

        let first = c.run(&u, &store, now()).await;
        assert_eq!(first.recommendations.len(), 2);
        assert_eq!(store.entries("AAA").await.len(), 1);

        let later = now() + chrono::Duration::hours(1);
        let second = c.run(&u, &store, later).await;
        assert!(second.recommendations.is_empty());
        assert_eq!(second.suppressed.len(), 2);
        assert_eq!(store.entries("AAA").await.len(), 1);

        // Nothing is persisted by the coordinator itself.
        assert_eq!(backend.snapshot().await.entries("AAA").len(), 0);
    }

    #[tokio::test]
    async fn min_score_and_cap_are_applied_after_history() {
        let (store, _) = store_with_bbb_recent().await;
        let options = PipelineOptions {
            max_recommendations: Some(1),
            min_composite_score: Some(1.0),
            ..Default::default()
        };
        let report = coordinator_with(fixture(), options)
            .run(&universe(&["AAA", "BBB", "CCC", "NOAI"]), &store, now())
            .await;

        assert_eq!(symbols(&report), vec!["AAA"]);
        assert_eq!(report.skipped_count(SkipReason::RecentlyRecommended), 1);
        assert_eq!(report.skipped_count(SkipReason::BelowMinimumScore), 1);
        assert_eq!(report.skipped_count(SkipReason::OverRecommendationLimit), 1);
        assert!(store.is_eligible("NOAI", now()).await);
    }

    #[tokio::test]
    async fn output_does_not_depend_on_universe_order() {
        let u = universe(&["CCC", "NOAI", "AAA"]);
        let mut reversed = u.clone();
        reversed.reverse();

        let mut runs = Vec::new();
        for input in [u, reversed] {
            let (store, _) = store_with_bbb_recent().await;
            let report = coordinator().run(&input, &store, now()).await;
            runs.push(
                symbols(&report)
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(runs[0], runs[1]);
    }

    struct SlowMarket;

    #[async_trait::async_trait]
    impl MarketDataProvider for SlowMarket {
        fn provider_name(&self) -> &'static str {
            "slow"
        }

        async fn market_snapshot(&self, _symbol: &str) -> anyhow::Result<MarketSnapshot> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            anyhow::bail!("unreachable")
        }
    }

    #[tokio::test]
    async fn slow_collaborator_skips_ticker_instead_of_failing_run() {
        let f = Arc::new(fixture());
        let c = Coordinator::new(
            Collaborators {
                market: Arc::new(SlowMarket),
                insider: f.clone(),
                superinvestor: f.clone(),
                thesis: f,
            },
            ScoringConfig::default(),
            EligibilityGate::default(),
            PipelineOptions {
                ticker_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let (store, _) = store_with_bbb_recent().await;
        let report = c.run(&universe(&["AAA", "CCC"]), &store, now()).await;

        assert!(report.recommendations.is_empty());
        assert_eq!(report.skipped_count(SkipReason::DataUnavailable), 2);
        assert!(report.skipped[0].detail.contains("timed out"));
        assert!(store.is_eligible("AAA", now()).await);
    }

    struct FailingRenderer;

    #[async_trait::async_trait]
    impl ReportRenderer for FailingRenderer {
        async fn render(&self, _report: &RunReport) -> anyhow::Result<PathBuf> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn renderer_failure_keeps_recorded_history() {
        let (store, _) = store_with_bbb_recent().await;
        let c = coordinator();
        let report = c.run(&universe(&["AAA"]), &store, now()).await;

        assert!(c.render(&FailingRenderer, &report).await.is_none());
        assert!(!store.is_eligible("AAA", now()).await);
    }

    #[test]
    fn options_validation() {
        assert!(PipelineOptions::default().validate().is_ok());
        let bad = PipelineOptions {
            max_recommendations: Some(0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PipelineOptions {
            min_composite_score: Some(f64::NAN),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn oversized_day_settings_are_config_errors() {
        let bad = PipelineOptions {
            cooldown_days: i64::MAX / 2,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PipelineOptions {
            insider_lookback_days: i64::MAX / 2,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let edge = PipelineOptions {
            cooldown_days: MAX_DAYS,
            insider_lookback_days: MAX_DAYS,
            ..Default::default()
        };
        assert!(edge.validate().is_ok());
        assert_eq!(edge.cooldown().num_days(), MAX_DAYS);
    }
}

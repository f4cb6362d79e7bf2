use crate::domain::recommendation::{Recommendation, RunReport};
use crate::storage::file::write_atomic;
use anyhow::Context;
use std::fmt::Write as _;
use std::path::PathBuf;

#[async_trait::async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Persists the report and returns where it went.
    async fn render(&self, report: &RunReport) -> anyhow::Result<PathBuf>;
}

/// Writes `smartmoney_report_<date>.md` into a directory.
#[derive(Debug, Clone)]
pub struct MarkdownReportRenderer {
    dir: PathBuf,
}

impl MarkdownReportRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl ReportRenderer for MarkdownReportRenderer {
    async fn render(&self, report: &RunReport) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(format!(
            "smartmoney_report_{}.md",
            report.generated_at.format("%Y-%m-%d")
        ));
        let body = render_markdown(report);
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, body.as_bytes()))
            .await
            .context("report write task failed")??;
        Ok(path)
    }
}

pub fn render_markdown(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Smart-money screen, {}", report.generated_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} recommendation(s), {} suppressed by cooldown, {} skipped.",
        report.recommendations.len(),
        report.suppressed.len(),
        report.skipped.len()
    );

    if report.recommendations.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "No new candidates this run.");
    }

    for rec in &report.recommendations {
        render_recommendation(&mut out, rec);
    }

    if !report.suppressed.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Recently recommended (cooldown)");
        let _ = writeln!(out);
        for s in &report.suppressed {
            let last = s
                .last_recommended_at
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let _ = writeln!(out, "- {} (composite {:.2}, last recommended {last})", s.symbol, s.composite);
        }
    }

    if !report.skip_counts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Skipped tickers");
        let _ = writeln!(out);
        for (reason, count) in &report.skip_counts {
            let _ = writeln!(out, "- {}: {count}", reason.as_str());
        }
        let _ = writeln!(out);
        for s in &report.skipped {
            let _ = writeln!(out, "- {} [{}]: {}", s.symbol, s.reason.as_str(), s.detail);
        }
    }

    out
}

fn render_recommendation(out: &mut String, rec: &Recommendation) {
    let s = &rec.score;
    let p = &rec.price_metrics;
    let _ = writeln!(out);
    let _ = writeln!(out, "## {}. {} (composite {:.2} / 22)", rec.rank, rec.symbol, s.total);
    let _ = writeln!(out);
    let _ = writeln!(out, "| Component | Score | Detail |");
    let _ = writeln!(out, "|---|---|---|");
    let _ = writeln!(
        out,
        "| Smart money | {:.2} / 10 | insider {:.2} ({:.1}x threshold), superinvestor {:.2} (net +{}) |",
        s.smart_money.total,
        s.smart_money.insider_points,
        s.smart_money.insider_ratio,
        s.smart_money.superinvestor_points,
        s.smart_money.superinvestor_net
    );
    let ai_detail = if rec.ai_available { "model assessment" } else { "unavailable" };
    let _ = writeln!(out, "| AI | {:.2} / 10 | {ai_detail} |", s.ai);
    let _ = writeln!(
        out,
        "| Quantitative | {:.0} / 2 | low debt: {}, near low: {} |",
        s.quantitative.total,
        yes_no(s.quantitative.low_debt),
        yes_no(s.quantitative.near_low)
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Price {:.2}, 52-week range {:.2} to {:.2}: {:.1}% below the high, {:.1}% above the low.",
        p.current_price, p.low_52w, p.high_52w, p.drop_from_high_pct, p.above_low_pct
    );
    let _ = writeln!(out);
    match (&rec.narrative, rec.ai_available) {
        (Some(n), true) => {
            let _ = writeln!(out, "{n}");
        }
        _ => {
            let _ = writeln!(out, "_AI thesis unavailable._");
        }
    }
    if !rec.reasons.is_empty() {
        let _ = writeln!(out);
        for (i, r) in rec.reasons.iter().enumerate() {
            let _ = writeln!(out, "{}. {r}", i + 1);
        }
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

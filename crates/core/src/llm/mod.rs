pub mod anthropic;
pub mod error;
pub mod json;

use crate::domain::signal::SignalSummary;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct ThesisRequest {
    pub as_of_date: chrono::NaiveDate,
    pub summary: SignalSummary,
}

impl ThesisRequest {
    pub fn summary_json(&self) -> String {
        serde_json::to_string_pretty(&self.summary).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Qualitative assessment returned by a thesis provider. `subscore` is not range-checked here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiThesis {
    pub subscore: f64,
    pub narrative: String,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    Fixture,
    Disabled,
}

#[async_trait::async_trait]
pub trait ThesisProvider: Send + Sync {
    fn provider(&self) -> Provider;

    async fn generate_thesis(&self, request: ThesisRequest) -> anyhow::Result<AiThesis>;
}

/// Used when no model is configured: every thesis is reported unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledThesisProvider;

#[async_trait::async_trait]
impl ThesisProvider for DisabledThesisProvider {
    fn provider(&self) -> Provider {
        Provider::Disabled
    }

    async fn generate_thesis(&self, request: ThesisRequest) -> anyhow::Result<AiThesis> {
        anyhow::bail!(
            "AI thesis provider not configured (symbol={})",
            request.summary.symbol
        )
    }
}

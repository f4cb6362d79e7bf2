use crate::llm::AiThesis;
use anyhow::ensure;
use serde::{Deserialize, Serialize};

const MAX_REASONS: usize = 5;

/// Thesis shape the language model is asked to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmThesis {
    pub subscore: f64,
    pub narrative: String,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl LlmThesis {
    /// Structural validation only. The subscore is passed through unchecked, including non-finite
    /// values, so the AI calculator reports it as an invalid score instead of a missing thesis.
    pub fn validate_and_into_thesis(self) -> anyhow::Result<AiThesis> {
        let narrative = self.narrative.trim().to_string();
        ensure!(!narrative.is_empty(), "narrative must be non-empty");

        let reasons: Vec<String> = self
            .reasons
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        ensure!(
            reasons.len() <= MAX_REASONS,
            "at most {MAX_REASONS} reasons allowed (got {})",
            reasons.len()
        );

        Ok(AiThesis {
            subscore: self.subscore,
            narrative,
            reasons,
        })
    }
}

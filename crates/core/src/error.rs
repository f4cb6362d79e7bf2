use crate::domain::recommendation::SkipReason;
use std::fmt;

/// Which bounded sub-score a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubScoreKind {
    SmartMoney,
    Ai,
    Quantitative,
}

impl SubScoreKind {
    pub fn max(self) -> f64 {
        match self {
            SubScoreKind::SmartMoney => 10.0,
            SubScoreKind::Ai => 10.0,
            SubScoreKind::Quantitative => 2.0,
        }
    }
}

impl fmt::Display for SubScoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubScoreKind::SmartMoney => "smart_money",
            SubScoreKind::Ai => "ai",
            SubScoreKind::Quantitative => "quantitative",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A required upstream field is absent or unusable. The ticker is skipped.
    #[error("{symbol}: required field `{field}` is missing or unusable")]
    MissingData { symbol: String, field: &'static str },

    /// A sub-score left its declared range. This is a calculation defect, never clamped away.
    #[error("{symbol}: {kind} sub-score {value} is outside [0, {max}]", max = kind.max())]
    InvalidScore {
        symbol: String,
        kind: SubScoreKind,
        value: f64,
    },

    /// A collaborator could not deliver data for the ticker (failure or timeout).
    #[error("{symbol}: {collaborator} unavailable: {detail}")]
    DataUnavailable {
        symbol: String,
        collaborator: &'static str,
        detail: String,
    },

    /// The persisted recommendation history could not be read. Fatal for the run.
    #[error("recommendation history at {location} is unreadable: {detail}")]
    HistoryCorruption { location: String, detail: String },
}

impl PipelineError {
    pub fn data_unavailable(
        symbol: &str,
        collaborator: &'static str,
        err: &anyhow::Error,
    ) -> Self {
        PipelineError::DataUnavailable {
            symbol: symbol.to_string(),
            collaborator,
            detail: format!("{err:#}"),
        }
    }

    /// Store-level failures abort the run; everything else only skips one ticker.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::HistoryCorruption { .. })
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            PipelineError::MissingData { .. } => Some(SkipReason::MissingData),
            PipelineError::InvalidScore { .. } => Some(SkipReason::InvalidScore),
            PipelineError::DataUnavailable { .. } => Some(SkipReason::DataUnavailable),
            PipelineError::HistoryCorruption { .. } => None,
        }
    }
}

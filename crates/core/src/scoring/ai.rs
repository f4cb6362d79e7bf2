use crate::domain::signal::TickerSignalRecord;
use crate::error::{PipelineError, SubScoreKind};

/// The AI sub-score is passed through untouched; only its range is checked.
pub fn ai_score(record: &TickerSignalRecord) -> Result<f64, PipelineError> {
    let value = record.ai.subscore;
    if (0.0..=SubScoreKind::Ai.max()).contains(&value) {
        Ok(value)
    } else {
        Err(PipelineError::InvalidScore {
            symbol: record.symbol.clone(),
            kind: SubScoreKind::Ai,
            value,
        })
    }
}

use crate::error::PipelineError;
use crate::storage::history::{HistoryBackend, HistoryEntry, HistoryLog};
use anyhow::Context;
use chrono::{DateTime, Utc};

/// History in the `recommendation_history` table. Rows are append-only: persisting inserts any
/// entry the table does not have yet and never updates or deletes.
#[derive(Debug, Clone)]
pub struct PgHistoryBackend {
    pool: sqlx::PgPool,
}

impl PgHistoryBackend {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl HistoryBackend for PgHistoryBackend {
    fn location(&self) -> String {
        "postgres:recommendation_history".to_string()
    }

    async fn load(&self) -> Result<HistoryLog, PipelineError> {
        let corruption = |detail: String| PipelineError::HistoryCorruption {
            location: self.location(),
            detail,
        };

        let rows = sqlx::query_as::<_, (String, DateTime<Utc>, f64)>(
            "SELECT symbol, recommended_at, composite_score \
             FROM recommendation_history \
             ORDER BY symbol ASC, recommended_at ASC",
        )
        .persistent(false)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| corruption(format!("select recommendation_history failed: {e}")))?;

        let entries = rows
            .into_iter()
            .map(|(symbol, recommended_at, composite_score)| HistoryEntry {
                symbol,
                recommended_at,
                composite_score,
            })
            .collect();

        HistoryLog::from_entries(entries).map_err(corruption)
    }

    async fn persist(&self, log: &HistoryLog) -> anyhow::Result<()> {
        let entries: Vec<&HistoryEntry> = log.iter().collect();
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        let mut inserted: u64 = 0;
        for chunk in entries.chunks(200) {
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO recommendation_history (symbol, recommended_at, composite_score) ",
            );
            qb.push_values(chunk, |mut b, e| {
                b.push_bind(e.symbol.as_str())
                    .push_bind(e.recommended_at)
                    .push_bind(e.composite_score);
            });
            qb.push(" ON CONFLICT (symbol, recommended_at) DO NOTHING");

            let res = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("insert recommendation_history failed")?;
            inserted += res.rows_affected();
        }

        tx.commit().await.context("commit transaction failed")?;
        tracing::debug!(inserted, total = entries.len(), "recommendation_history rows inserted");
        Ok(())
    }
}

use crate::error::PipelineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_COOLDOWN_DAYS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub symbol: String,
    pub recommended_at: DateTime<Utc>,
    pub composite_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordOutcome {
    Recorded,
    /// An entry with the same symbol and timestamp already exists.
    AlreadyRecorded,
    /// The symbol is still inside its cooldown window.
    CoolingDown { last_recommended_at: DateTime<Utc> },
}

/// Every recommendation ever made, per symbol, oldest first. Entries are never removed; the most
/// recent one decides eligibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog {
    entries: BTreeMap<String, Vec<HistoryEntry>>,
}

impl HistoryLog {
    /// Builds a log from persisted entries in any order, rejecting inconsistent data such as two
    /// entries for one symbol at the same instant.
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Result<Self, String> {
        let mut log = Self::default();
        for e in entries {
            if e.symbol.trim().is_empty() {
                return Err("entry with empty symbol".to_string());
            }
            if !e.composite_score.is_finite() {
                return Err(format!("{}: non-finite composite score", e.symbol));
            }
            let symbol = e.symbol.clone();
            let at = e.recommended_at;
            if !log.insert(e) {
                return Err(format!("{symbol}: duplicate entry at {at}"));
            }
        }
        Ok(log)
    }

    /// Checks that every entry sits under its own symbol key.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (symbol, entries) in &self.entries {
            for e in entries {
                if &e.symbol != symbol {
                    return Err(format!("entry for {} stored under key {symbol}", e.symbol));
                }
                if !e.composite_score.is_finite() {
                    return Err(format!("{symbol}: non-finite composite score"));
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, entry: HistoryEntry) -> bool {
        let list = self.entries.entry(entry.symbol.clone()).or_default();
        if list.iter().any(|e| e.recommended_at == entry.recommended_at) {
            return false;
        }
        let pos = list.partition_point(|e| e.recommended_at < entry.recommended_at);
        list.insert(pos, entry);
        true
    }

    /// The entry that defines eligibility: the most recent one.
    pub fn active(&self, symbol: &str) -> Option<&HistoryEntry> {
        self.entries.get(symbol).and_then(|list| list.last())
    }

    /// Eligible once at least `cooldown` has elapsed since the active entry.
    /// Exactly `cooldown` ago counts as eligible.
    pub fn is_eligible(&self, symbol: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.active(symbol) {
            None => true,
            Some(e) => now.signed_duration_since(e.recommended_at) >= cooldown,
        }
    }

    pub fn record(
        &mut self,
        symbol: &str,
        composite_score: f64,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> RecordOutcome {
        if let Some(list) = self.entries.get(symbol) {
            if list.iter().any(|e| e.recommended_at == now) {
                return RecordOutcome::AlreadyRecorded;
            }
        }
        if let Some(active) = self.active(symbol) {
            if now.signed_duration_since(active.recommended_at) < cooldown {
                return RecordOutcome::CoolingDown {
                    last_recommended_at: active.recommended_at,
                };
            }
        }

        self.insert(HistoryEntry {
            symbol: symbol.to_string(),
            recommended_at: now,
            composite_score,
        });
        RecordOutcome::Recorded
    }

    pub fn excluded_symbols(&self, now: DateTime<Utc>, cooldown: Duration) -> Vec<String> {
        self.entries
            .keys()
            .filter(|s| !self.is_eligible(s, now, cooldown))
            .cloned()
            .collect()
    }

    pub fn entries(&self, symbol: &str) -> &[HistoryEntry] {
        self.entries.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Durable home for the history log.
#[async_trait::async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Human-readable location for logs and errors.
    fn location(&self) -> String;

    /// Loads the full log. Unreadable state is [`PipelineError::HistoryCorruption`].
    async fn load(&self) -> Result<HistoryLog, PipelineError>;

    /// Replaces the durable state with `log`. Must never leave previously committed entries
    /// corrupted if interrupted.
    async fn persist(&self, log: &HistoryLog) -> anyhow::Result<()>;
}

/// Owns the in-memory history for a run and its backend. Eligibility checks and appends share a
/// single lock, so two callers cannot both record the same symbol inside one cooldown.
pub struct HistoryStore {
    backend: Box<dyn HistoryBackend>,
    log: tokio::sync::Mutex<HistoryLog>,
    cooldown: Duration,
}

impl HistoryStore {
    pub async fn load(
        backend: Box<dyn HistoryBackend>,
        cooldown: Duration,
    ) -> Result<Self, PipelineError> {
        let log = backend.load().await?;
        tracing::info!(
            location = %backend.location(),
            entries = log.len(),
            cooldown_days = cooldown.num_days(),
            "recommendation history loaded"
        );
        Ok(Self {
            backend,
            log: tokio::sync::Mutex::new(log),
            cooldown,
        })
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub async fn is_eligible(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.log.lock().await.is_eligible(symbol, now, self.cooldown)
    }

    pub async fn record(&self, symbol: &str, composite_score: f64, now: DateTime<Utc>) -> RecordOutcome {
        self.log
            .lock()
            .await
            .record(symbol, composite_score, now, self.cooldown)
    }

    pub async fn last_recommendation(&self, symbol: &str) -> Option<HistoryEntry> {
        self.log.lock().await.active(symbol).cloned()
    }

    pub async fn excluded_symbols(&self, now: DateTime<Utc>) -> Vec<String> {
        self.log.lock().await.excluded_symbols(now, self.cooldown)
    }

    pub async fn entries(&self, symbol: &str) -> Vec<HistoryEntry> {
        self.log.lock().await.entries(symbol).to_vec()
    }

    /// Writes the full log through the backend. The lock is held for the write so a concurrent
    /// `record` cannot slip in between snapshot and commit.
    pub async fn persist(&self) -> anyhow::Result<()> {
        let log = self.log.lock().await;
        self.backend.persist(&log).await?;
        tracing::info!(
            location = %self.backend.location(),
            entries = log.len(),
            "recommendation history persisted"
        );
        Ok(())
    }
}

/// In-process backend. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryBackend {
    state: Arc<tokio::sync::Mutex<HistoryLog>>,
}

impl MemoryHistoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: HistoryLog) -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(log)),
        }
    }

    pub async fn snapshot(&self) -> HistoryLog {
        self.state.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl HistoryBackend for MemoryHistoryBackend {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> Result<HistoryLog, PipelineError> {
        Ok(self.state.lock().await.clone())
    }

    async fn persist(&self, log: &HistoryLog) -> anyhow::Result<()> {
        *self.state.lock().await = log.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn cooldown() -> Duration {
        Duration::days(DEFAULT_COOLDOWN_DAYS)
    }

    #[test]
    fn unseen_symbol_is_eligible() {
        let log = HistoryLog::default();
        assert!(log.is_eligible("AAA", now(), cooldown()));
    }

    #[test]
    fn cooldown_boundary_is_inclusive_at_sixty_days() {
        let mut log = HistoryLog::default();
        log.record("SIXTY", 10.0, now() - Duration::days(60), cooldown());
        log.record("FIFTY9", 10.0, now() - Duration::days(59), cooldown());

        assert!(log.is_eligible("SIXTY", now(), cooldown()));
        assert!(!log.is_eligible("FIFTY9", now(), cooldown()));
        // One second short of the window is still cooling down.
        assert!(!log.is_eligible(
            "SIXTY",
            now() - Duration::seconds(1),
            cooldown()
        ));
    }

    #[test]
    fn recording_twice_at_same_instant_is_idempotent() {
        let mut log = HistoryLog::default();
        assert_eq!(log.record("AAA", 16.0, now(), cooldown()), RecordOutcome::Recorded);
        assert_eq!(
            log.record("AAA", 16.0, now(), cooldown()),
            RecordOutcome::AlreadyRecorded
        );
        assert_eq!(log.entries("AAA").len(), 1);
        assert!(!log.is_eligible("AAA", now(), cooldown()));
    }

    #[test]
    fn record_inside_cooldown_is_refused() {
        let mut log = HistoryLog::default();
        let earlier = now() - Duration::days(10);
        log.record("BBB", 12.0, earlier, cooldown());
        assert_eq!(
            log.record("BBB", 13.0, now(), cooldown()),
            RecordOutcome::CoolingDown {
                last_recommended_at: earlier
            }
        );
        assert_eq!(log.entries("BBB").len(), 1);
    }

    #[test]
    fn re_recommendation_keeps_old_entry_and_reactivates_cooldown() {
        let mut log = HistoryLog::default();
        let first = now() - Duration::days(90);
        log.record("CCC", 9.0, first, cooldown());
        assert!(log.is_eligible("CCC", now(), cooldown()));

        assert_eq!(log.record("CCC", 11.0, now(), cooldown()), RecordOutcome::Recorded);
        let entries = log.entries("CCC");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].recommended_at, first);
        assert_eq!(log.active("CCC").unwrap().composite_score, 11.0);
        assert!(!log.is_eligible("CCC", now(), cooldown()));
    }

    #[test]
    fn eligibility_follows_most_recent_entry_even_if_loaded_out_of_order() {
        let recent = HistoryEntry {
            symbol: "DDD".to_string(),
            recommended_at: now() - Duration::days(5),
            composite_score: 14.0,
        };
        let old = HistoryEntry {
            symbol: "DDD".to_string(),
            recommended_at: now() - Duration::days(200),
            composite_score: 8.0,
        };
        let log = HistoryLog::from_entries(vec![recent.clone(), old]).unwrap();
        assert_eq!(log.active("DDD"), Some(&recent));
        assert!(!log.is_eligible("DDD", now(), cooldown()));
    }

    #[test]
    fn excluded_symbols_lists_only_cooling_down() {
        let mut log = HistoryLog::default();
        log.record("OLD", 5.0, now() - Duration::days(61), cooldown());
        log.record("NEW", 5.0, now() - Duration::days(3), cooldown());
        assert_eq!(log.excluded_symbols(now(), cooldown()), vec!["NEW"]);
    }

    #[test]
    fn from_entries_rejects_bad_rows() {
        let bad = HistoryEntry {
            symbol: " ".to_string(),
            recommended_at: now(),
            composite_score: 1.0,
        };
        assert!(HistoryLog::from_entries(vec![bad]).is_err());
    }

    #[tokio::test]
    async fn store_round_trips_through_memory_backend() {
        let backend = MemoryHistoryBackend::new();
        let store = HistoryStore::load(Box::new(backend.clone()), cooldown())
            .await
            .unwrap();

        assert!(store.is_eligible("AAA", now()).await);
        assert_eq!(store.record("AAA", 16.9, now()).await, RecordOutcome::Recorded);
        assert!(!store.is_eligible("AAA", now()).await);

        // Nothing reaches the backend until persist.
        assert!(backend.snapshot().await.is_empty());
        store.persist().await.unwrap();
        assert_eq!(backend.snapshot().await.entries("AAA").len(), 1);

        let reloaded = HistoryStore::load(Box::new(backend.clone()), cooldown())
            .await
            .unwrap();
        assert!(!reloaded.is_eligible("AAA", now()).await);
        assert_eq!(
            reloaded.last_recommendation("AAA").await.map(|e| e.composite_score),
            Some(16.9)
        );
    }

    #[tokio::test]
    async fn concurrent_records_for_one_symbol_admit_exactly_one() {
        let store = Arc::new(
            HistoryStore::load(Box::new(MemoryHistoryBackend::new()), cooldown())
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .record("RACE", 10.0, now() + Duration::seconds(i))
                    .await
            }));
        }

        let mut recorded = 0;
        for h in handles {
            if h.await.unwrap() == RecordOutcome::Recorded {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 1);
        assert_eq!(store.entries("RACE").await.len(), 1);
    }
}

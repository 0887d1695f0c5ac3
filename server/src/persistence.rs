//! Match persistence as an injected capability.
//!
//! The orchestrator only knows two operations: write a finished match's
//! record and bump aggregate win/loss counters. Failures never propagate
//! into the scheduler; each write is retried once and then logged and
//! dropped, and room teardown proceeds regardless.

use log::{error, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Final result of one room, written exactly once at win detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub player1_id: u32,
    pub player2_id: u32,
    pub player1_score: u32,
    pub player2_score: u32,
    pub winner_id: u32,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

pub trait MatchStore: Send + Sync {
    fn record_match(&self, record: &MatchRecord) -> Result<(), StoreError>;
    fn adjust_stats(&self, user_id: u32, win_delta: i32, loss_delta: i32)
        -> Result<(), StoreError>;
}

/// Retries each store operation once before giving up. The match is over
/// either way; a second failure is an operational log line, not a crash.
pub fn record_match_resilient(store: &dyn MatchStore, record: &MatchRecord) {
    if let Err(first) = store.record_match(record) {
        warn!("record_match failed, retrying once: {}", first);
        if let Err(second) = store.record_match(record) {
            error!(
                "record_match failed twice, dropping record for {} vs {}: {}",
                record.player1_id, record.player2_id, second
            );
        }
    }
}

pub fn adjust_stats_resilient(store: &dyn MatchStore, user_id: u32, win_delta: i32, loss_delta: i32) {
    if let Err(first) = store.adjust_stats(user_id, win_delta, loss_delta) {
        warn!("adjust_stats for {} failed, retrying once: {}", user_id, first);
        if let Err(second) = store.adjust_stats(user_id, win_delta, loss_delta) {
            error!("adjust_stats for {} failed twice, dropping: {}", user_id, second);
        }
    }
}

/// In-memory store backing the default binary and the test suite.
pub struct MemoryStore {
    matches: Mutex<Vec<MatchRecord>>,
    stats: Mutex<HashMap<u32, (i32, i32)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            matches: Mutex::new(Vec::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn matches(&self) -> Vec<MatchRecord> {
        self.matches.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn stats_of(&self, user_id: u32) -> (i32, i32) {
        self.stats
            .lock()
            .ok()
            .and_then(|s| s.get(&user_id).copied())
            .unwrap_or((0, 0))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchStore for MemoryStore {
    fn record_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        self.matches
            .lock()
            .map_err(|_| StoreError("matches lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }

    fn adjust_stats(
        &self,
        user_id: u32,
        win_delta: i32,
        loss_delta: i32,
    ) -> Result<(), StoreError> {
        let mut stats = self
            .stats
            .lock()
            .map_err(|_| StoreError("stats lock poisoned".to_string()))?;
        let entry = stats.entry(user_id).or_insert((0, 0));
        entry.0 += win_delta;
        entry.1 += loss_delta;
        Ok(())
    }
}

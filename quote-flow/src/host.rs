//! Narrow interfaces to the environment hosting the flow: browser history,
//! page navigation, document metadata and the completion hook.
//!
//! The recording implementations keep everything in memory so the flow can
//! be driven without a browser; tests use them to script failures.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

use crate::flow::FlowStep;
use crate::models::{FormData, QuoteResult};

/// Payload attached to a history entry and handed back on back/forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub step: FlowStep,
    pub form_data: Option<FormData>,
    pub timestamp: i64,
}

impl HistoryEntry {
    pub fn new(step: FlowStep, form_data: Option<FormData>) -> Self {
        Self {
            step,
            form_data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

pub trait HistoryAdapter: Send + Sync {
    fn push_state(&self, entry: HistoryEntry);
    fn replace_state(&self, entry: HistoryEntry);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NavigateError(pub String);

#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), NavigateError>;
}

pub trait MetadataSink: Send + Sync {
    fn update_metadata(&self, title: &str, description: &str);
}

/// Called once per completed quote, before navigating away.
pub trait CompletionHandler: Send + Sync {
    fn on_complete(&self, result: &QuoteResult);
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOp {
    Push,
    Replace,
}

#[derive(Debug, Default)]
pub struct RecordingHistory {
    entries: Mutex<Vec<(HistoryOp, HistoryEntry)>>,
}

impl RecordingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(HistoryOp, HistoryEntry)> {
        lock(&self.entries).clone()
    }

    pub fn current(&self) -> Option<HistoryEntry> {
        lock(&self.entries).last().map(|(_, entry)| entry.clone())
    }
}

impl HistoryAdapter for RecordingHistory {
    fn push_state(&self, entry: HistoryEntry) {
        debug!(step = %entry.step, "History push");
        lock(&self.entries).push((HistoryOp::Push, entry));
    }

    fn replace_state(&self, entry: HistoryEntry) {
        debug!(step = %entry.step, "History replace");
        let mut entries = lock(&self.entries);
        match entries.last_mut() {
            Some(last) => *last = (HistoryOp::Replace, entry),
            None => entries.push((HistoryOp::Replace, entry)),
        }
    }
}

/// Records target URLs; the first `failures` calls are rejected.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn visited(&self) -> Vec<String> {
        lock(&self.visited).clone()
    }

    pub fn last_url(&self) -> Option<String> {
        lock(&self.visited).last().cloned()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Navigator for RecordingNavigator {
    async fn navigate(&self, url: &str) -> Result<(), NavigateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(NavigateError(format!("navigation to {url} was interrupted")));
        }
        lock(&self.visited).push(url.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingMetadata {
    latest: Mutex<Option<(String, String)>>,
}

impl RecordingMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<(String, String)> {
        lock(&self.latest).clone()
    }
}

impl MetadataSink for RecordingMetadata {
    fn update_metadata(&self, title: &str, description: &str) {
        *lock(&self.latest) = Some((title.to_string(), description.to_string()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingCompletion {
    results: Mutex<Vec<QuoteResult>>,
}

impl RecordingCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<QuoteResult> {
        lock(&self.results).clone()
    }
}

impl CompletionHandler for RecordingCompletion {
    fn on_complete(&self, result: &QuoteResult) {
        lock(&self.results).push(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_navigator_recovers() {
        let navigator = RecordingNavigator::failing(2);
        assert!(navigator.navigate("/cotacao?a=1").await.is_err());
        assert!(navigator.navigate("/cotacao?a=1").await.is_err());
        assert!(navigator.navigate("/cotacao?a=1").await.is_ok());
        assert_eq!(navigator.calls(), 3);
        assert_eq!(navigator.visited(), vec!["/cotacao?a=1".to_string()]);
    }

    #[test]
    fn test_replace_overwrites_current_entry() {
        let history = RecordingHistory::new();
        history.replace_state(HistoryEntry::new(FlowStep::InitialForm, None));
        history.push_state(HistoryEntry::new(FlowStep::CarDetailsConfirmation, None));
        history.replace_state(HistoryEntry::new(FlowStep::Loading, None));

        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0, HistoryOp::Replace);
        assert_eq!(history.current().unwrap().step, FlowStep::Loading);
    }
}

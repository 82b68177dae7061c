//! Step-up log: an append-only record of every step-up attempt (§3, §4.5).
//!
//! This sits alongside `store::AlertSink` rather than replacing it: the
//! step-up log is a queryable history for support/compliance, while alerts
//! are fire-and-forget notifications for paging/monitoring.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::profile::UserId;

/// Step-up method used for a given attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepUpMethod {
    Behavioral,
    TrustedDevice,
    MagicLink,
    Webauthn,
    Context,
    Ambient,
}

/// Outcome of a step-up attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepUpOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct StepUpLogEntry {
    pub id: String,
    pub user_id: UserId,
    pub method: StepUpMethod,
    pub outcome: StepUpOutcome,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Append-only log of step-up attempts, keyed by a generated entry id.
#[derive(Debug, Default)]
pub struct StepUpLog {
    entries: DashMap<String, StepUpLogEntry>,
}

impl StepUpLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt. Also emits a `tracing::info!` line so the entry is
    /// visible in structured logs even before anyone queries the store.
    pub fn record(
        &self,
        user_id: &UserId,
        method: StepUpMethod,
        outcome: StepUpOutcome,
        reasons: Vec<String>,
        metadata: HashMap<String, String>,
    ) {
        let entry = StepUpLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            method,
            outcome,
            reasons,
            timestamp: Utc::now(),
            metadata,
        };
        tracing::info!(
            user_id = %entry.user_id,
            method = ?entry.method,
            outcome = ?entry.outcome,
            "step-up attempt"
        );
        self.entries.insert(entry.id.clone(), entry);
    }

    /// Query recorded attempts, most filters optional.
    pub fn query(&self, filter: &StepUpLogQuery) -> Vec<StepUpLogEntry> {
        self.entries
            .iter()
            .filter(|e| filter.user_id.as_ref().map(|u| u == &e.user_id).unwrap_or(true))
            .filter(|e| filter.method.map(|m| m == e.method).unwrap_or(true))
            .filter(|e| filter.since.map(|since| e.timestamp >= since).unwrap_or(true))
            .map(|e| e.value().clone())
            .take(filter.limit)
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct StepUpLogQuery {
    pub user_id: Option<UserId>,
    pub method: Option<StepUpMethod>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl StepUpLogQuery {
    pub fn new() -> Self {
        Self { limit: 100, ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_queries_by_user() {
        let log = StepUpLog::new();
        log.record(&"alice".to_string(), StepUpMethod::Behavioral, StepUpOutcome::Success, vec![], HashMap::new());
        log.record(&"bob".to_string(), StepUpMethod::MagicLink, StepUpOutcome::Failure, vec!["expired".into()], HashMap::new());

        let mut query = StepUpLogQuery::new();
        query.user_id = Some("alice".to_string());
        let results = log.query(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, StepUpOutcome::Success);
    }

    #[test]
    fn filters_by_method() {
        let log = StepUpLog::new();
        log.record(&"alice".to_string(), StepUpMethod::Behavioral, StepUpOutcome::Success, vec![], HashMap::new());
        log.record(&"alice".to_string(), StepUpMethod::Webauthn, StepUpOutcome::Success, vec![], HashMap::new());

        let mut query = StepUpLogQuery::new();
        query.method = Some(StepUpMethod::Webauthn);
        assert_eq!(log.query(&query).len(), 1);
    }
}

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::provider::ErrorKind;
use crate::provider::FetchError;
use crate::provider::Payload;

/// Latest fetch outcome for every provider that has completed a fetch.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    outcomes: BTreeMap<String, Outcome>,
}

/// What is known about one provider.
///
/// A failure never clears the last success, so consumers can keep showing
/// a stale value with the failure attached.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub last_success: Option<Success>,
    pub last_error: Option<Failure>,
}

#[derive(Debug, Clone)]
pub struct Success {
    pub payload: Payload,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl Outcome {
    /// True when the most recent fetch failed but an older value is still held.
    pub fn is_stale(&self) -> bool {
        self.last_success.is_some() && self.last_error.is_some()
    }
}

impl Snapshot {
    pub fn get(&self, provider_id: &str) -> Option<&Outcome> {
        self.outcomes.get(provider_id)
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.outcomes.contains_key(provider_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Outcome)> {
        self.outcomes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub(super) fn record_success(&mut self, provider_id: &str, payload: Payload, at: DateTime<Utc>) {
        let outcome = self.outcomes.entry(provider_id.to_string()).or_default();
        outcome.last_success = Some(Success {
            payload,
            fetched_at: at,
        });
        outcome.last_error = None;
    }

    pub(super) fn record_failure(&mut self, provider_id: &str, error: &FetchError, at: DateTime<Utc>) {
        let outcome = self.outcomes.entry(provider_id.to_string()).or_default();
        outcome.last_error = Some(Failure {
            kind: error.kind(),
            message: error.to_string(),
            failed_at: at,
        });
    }

    pub(super) fn remove(&mut self, provider_id: &str) -> Option<Outcome> {
        self.outcomes.remove(provider_id)
    }
}

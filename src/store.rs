use std::collections::BTreeMap;

use serde_json::Value;

use crate::github::error::FetchError;
use crate::github::types::PullRequest;

/// Deduplicated collection of pull-request records keyed by number.
///
/// Owns the canonical record set for a run. Ingestion is idempotent: an
/// incoming observation of an already-known number replaces the stored
/// record wholesale, since the fetcher always re-requests open or
/// recently-touched records and the incoming state is at least as fresh.
#[derive(Debug, Default)]
pub struct PullRequestStore {
    records: BTreeMap<u64, PullRequest>,
}

impl PullRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalize one raw list payload, then merge it.
    /// `fingerprint` identifies the page the payload came from, for error
    /// reporting.
    pub fn ingest(&mut self, raw: &Value, fingerprint: &str) -> Result<u64, FetchError> {
        let record = PullRequest::from_list_item(raw, fingerprint)?;
        let number = record.number;
        self.merge(record);
        Ok(number)
    }

    /// Insert, or replace an existing record with the same number.
    pub fn merge(&mut self, record: PullRequest) {
        self.records.insert(record.number, record);
    }

    pub fn get(&self, number: u64) -> Option<&PullRequest> {
        self.records.get(&number)
    }

    /// All records, ordered by number.
    pub fn all(&self) -> impl Iterator<Item = &PullRequest> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::github::error::FetchError;

/// Lifecycle state of a pull request as derived from the API payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Merged,
    ClosedUnmerged,
}

impl PrState {
    /// Terminal states never change again (closed-PR edits are out of scope),
    /// so their cached payloads are permanently reusable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PrState::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrState::Open => "OPEN",
            PrState::Merged => "MERGED",
            PrState::ClosedUnmerged => "CLOSED_UNMERGED",
        }
    }
}

/// One pull request in the mirrored store. Identity is `number`; repeated
/// observations of the same number replace the record wholesale
/// (last-observed-wins).
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub url: String,
    pub state: PrState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub first_review_at: Option<DateTime<Utc>>,
    pub additions: u64,
    pub deletions: u64,
    pub commit_count: u64,
    pub review_count: u64,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

/// Shape shared by the list endpoint items and the single-PR detail payload.
/// The list items omit `additions`/`deletions`/`commits`.
#[derive(Debug, Deserialize)]
struct RawPull {
    number: u64,
    title: String,
    html_url: String,
    state: String,
    user: Option<RawUser>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    additions: Option<u64>,
    deletions: Option<u64>,
    commits: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    submitted_at: Option<DateTime<Utc>>,
}

fn derive_state(raw: &RawPull) -> PrState {
    if raw.merged_at.is_some() {
        PrState::Merged
    } else if raw.state == "closed" {
        PrState::ClosedUnmerged
    } else {
        PrState::Open
    }
}

fn malformed(fingerprint: &str, err: impl std::fmt::Display) -> FetchError {
    FetchError::MalformedResponse {
        fingerprint: fingerprint.to_string(),
        detail: err.to_string(),
    }
}

impl PullRequest {
    /// Normalize one item of a paginated list payload. Size and review fields
    /// start at zero; the detail pass fills them in.
    pub fn from_list_item(raw: &Value, fingerprint: &str) -> Result<Self, FetchError> {
        let raw: RawPull =
            serde_json::from_value(raw.clone()).map_err(|e| malformed(fingerprint, e))?;
        Ok(Self::from_raw(raw, &[]))
    }

    /// Normalize a single-PR detail payload plus its review list.
    pub fn from_detail(
        detail: &Value,
        reviews: &[Value],
        fingerprint: &str,
    ) -> Result<Self, FetchError> {
        let raw: RawPull =
            serde_json::from_value(detail.clone()).map_err(|e| malformed(fingerprint, e))?;
        let reviews: Vec<RawReview> = reviews
            .iter()
            .map(|r| serde_json::from_value(r.clone()))
            .collect::<Result<_, _>>()
            .map_err(|e| malformed(fingerprint, e))?;
        Ok(Self::from_raw(raw, &reviews))
    }

    fn from_raw(raw: RawPull, reviews: &[RawReview]) -> Self {
        let state = derive_state(&raw);
        let first_review_at = reviews.iter().filter_map(|r| r.submitted_at).min();
        PullRequest {
            state,
            number: raw.number,
            title: raw.title,
            author: raw.user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string()),
            url: raw.html_url,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            merged_at: raw.merged_at,
            closed_at: raw.closed_at,
            first_review_at,
            additions: raw.additions.unwrap_or(0),
            deletions: raw.deletions.unwrap_or(0),
            commit_count: raw.commits.unwrap_or(0),
            review_count: reviews.len() as u64,
        }
    }

    /// Calculate total size (additions + deletions)
    pub fn size(&self) -> u64 {
        self.additions + self.deletions
    }

    /// Creation-to-merge duration, when merged
    pub fn cycle_time(&self) -> Option<chrono::Duration> {
        self.merged_at.map(|m| m - self.created_at)
    }

    /// Latest instant at which anything happened to this record. Bounds the
    /// aggregation window.
    pub fn latest_activity(&self) -> DateTime<Utc> {
        [self.merged_at, self.closed_at, self.first_review_at]
            .into_iter()
            .flatten()
            .fold(self.created_at, |acc, t| acc.max(t))
    }
}

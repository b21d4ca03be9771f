use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by the GitHub client and fetch pipeline.
///
/// `RateLimited` and `TransientNetwork` are recoverable and handled inside
/// the fetcher (scheduled resume / bounded backoff). Everything else aborts
/// the run; previously cached complete pages stay intact for the next
/// attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("malformed response for {fingerprint}: {detail}")]
    MalformedResponse { fingerprint: String, detail: String },

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("GitHub API error: status {status}: {message}")]
    Api { status: u16, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_failing_fingerprint() {
        let err = FetchError::MalformedResponse {
            fingerprint: "page:o/r?cursor=first".to_string(),
            detail: "expected JSON array".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("page:o/r?cursor=first"));
        assert!(msg.contains("expected JSON array"));
    }

    #[test]
    fn test_rate_limited_reports_reset_instant() {
        let reset_at: DateTime<Utc> = "2024-03-01T10:00:00Z".parse().unwrap();
        let err = FetchError::RateLimited { reset_at };
        assert!(err.to_string().contains("2024-03-01 10:00:00 UTC"));
    }
}

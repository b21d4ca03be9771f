use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::Value;

use crate::github::error::FetchError;

const API_BASE: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;

/// One page of raw pull-request payloads plus the cursor to the next page.
/// The cursor is the `rel="next"` URL from the Link response header; `None`
/// means the remote reported no further pages.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
}

/// Seam between the fetcher and the network. Tests drive the fetcher with a
/// scripted source; production uses [`GithubClient`].
pub trait PageSource {
    fn fetch_page(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<Page, FetchError>> + Send;
    fn fetch_detail(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> impl std::future::Future<Output = Result<Value, FetchError>> + Send;
    fn fetch_reviews(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, FetchError>> + Send;
}

/// Authenticated GitHub REST client
pub struct GithubClient {
    http: reqwest::Client,
    token: String,
}

/// First-page URL for the paginated pull-request listing. Created-ascending
/// order keeps earlier pages stable as new PRs arrive, which is what makes
/// them safe to cache permanently. The pulls listing has no updated-since
/// query filter; the fetcher applies that bound client-side when merging.
pub fn list_url(owner: &str, repo: &str) -> String {
    format!(
        "{}/repos/{}/{}/pulls?state=all&sort=created&direction=asc&per_page={}",
        API_BASE, owner, repo, PER_PAGE
    )
}

/// Extract the `rel="next"` target from a Link header value, if any.
pub fn parse_next_cursor(headers: &HeaderMap) -> Option<String> {
    let link = headers.get("link")?.to_str().ok()?;
    for part in link.split(',') {
        let part = part.trim();
        if !part.ends_with("rel=\"next\"") {
            continue;
        }
        let start = part.find('<')? + 1;
        let end = part.find('>')?;
        return Some(part[start..end].to_string());
    }
    None
}

fn rate_limit_reset(headers: &HeaderMap) -> DateTime<Utc> {
    if let Some(secs) = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
    {
        return Utc::now() + Duration::seconds(secs);
    }
    headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|epoch| DateTime::from_timestamp(epoch, 0))
        .unwrap_or_else(|| Utc::now() + Duration::seconds(60))
}

impl GithubClient {
    pub fn new(token: &str) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| FetchError::TransientNetwork(e.to_string()))?;
        Ok(Self {
            http,
            token: token.to_string(),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("pr-metrics/0.1"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", self.token)) {
            headers.insert(AUTHORIZATION, val);
        }
        headers
    }

    /// Issue one GET and classify the response per the error policy.
    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let resp = self
            .http
            .get(url)
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| FetchError::TransientNetwork(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::Auth(
                "bad credentials; your token may be invalid or expired".to_string(),
            ));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(format!(
                "{} (check repo name and token permissions)",
                url
            )));
        }
        if status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return Err(FetchError::RateLimited {
                reset_at: rate_limit_reset(resp.headers()),
            });
        }
        if status.is_server_error() {
            return Err(FetchError::TransientNetwork(format!(
                "status {} for {}",
                status, url
            )));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    async fn get_json_array(&self, url: &str) -> Result<(Vec<Value>, Option<String>), FetchError> {
        let resp = self.get(url).await?;
        let next = parse_next_cursor(resp.headers());
        let items: Vec<Value> =
            resp.json()
                .await
                .map_err(|e| FetchError::MalformedResponse {
                    fingerprint: url.to_string(),
                    detail: format!("expected JSON array: {}", e),
                })?;
        Ok((items, next))
    }
}

impl PageSource for GithubClient {
    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        let (items, next_cursor) = self.get_json_array(url).await?;
        Ok(Page { items, next_cursor })
    }

    async fn fetch_detail(&self, owner: &str, repo: &str, number: u64) -> Result<Value, FetchError> {
        let url = format!("{}/repos/{}/{}/pulls/{}", API_BASE, owner, repo, number);
        let resp = self.get(&url).await?;
        resp.json()
            .await
            .map_err(|e| FetchError::MalformedResponse {
                fingerprint: url,
                detail: format!("expected JSON object: {}", e),
            })
    }

    async fn fetch_reviews(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<Value>, FetchError> {
        let mut url = format!(
            "{}/repos/{}/{}/pulls/{}/reviews?per_page={}",
            API_BASE, owner, repo, number, PER_PAGE
        );
        let mut reviews = Vec::new();
        loop {
            let (mut items, next) = self.get_json_array(&url).await?;
            reviews.append(&mut items);
            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }
        Ok(reviews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_next_cursor() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "link",
            HeaderValue::from_static(
                "<https://api.github.com/repositories/1/pulls?page=2>; rel=\"next\", \
                 <https://api.github.com/repositories/1/pulls?page=9>; rel=\"last\"",
            ),
        );
        assert_eq!(
            parse_next_cursor(&headers).as_deref(),
            Some("https://api.github.com/repositories/1/pulls?page=2")
        );
    }

    #[test]
    fn test_parse_next_cursor_last_page() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "link",
            HeaderValue::from_static(
                "<https://api.github.com/repositories/1/pulls?page=8>; rel=\"prev\", \
                 <https://api.github.com/repositories/1/pulls?page=1>; rel=\"first\"",
            ),
        );
        assert_eq!(parse_next_cursor(&headers), None);
        assert_eq!(parse_next_cursor(&HeaderMap::new()), None);
    }

    #[test]
    fn test_list_url_includes_filters() {
        let url = list_url("octo", "hello");
        assert!(url.contains("/repos/octo/hello/pulls"));
        assert!(url.contains("state=all"));
        assert!(url.contains("sort=created"));
        assert!(url.contains("direction=asc"));
    }

    #[test]
    fn test_rate_limit_reset_prefers_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("120"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("0"));
        let reset = rate_limit_reset(&headers);
        let wait = reset - Utc::now();
        assert!(wait > Duration::seconds(110) && wait <= Duration::seconds(120));
    }

    #[test]
    fn test_rate_limit_reset_from_epoch() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));
        let reset = rate_limit_reset(&headers);
        assert_eq!(reset, DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    }
}

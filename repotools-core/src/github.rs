//! GitHub REST API access
//!
//! The mirror only needs three remote operations, captured by [`IssueTracker`]:
//! an issue search, a fetch-by-number and the commit list of a pull request.
//! Paged endpoints are exposed page by page and turned into lazy streams by
//! [`search_issues`] and [`pull_request_commits`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::constants::USER_AGENT;
use crate::context::Context;
use crate::error::{RepoToolsError, Result};
use crate::repo::RepoHandle;
use crate::traffic::{CloneTraffic, TrafficPeriod};

/// One page of a paged GitHub endpoint
#[derive(Debug, Clone, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of the following page, `None` on the last one
    pub next: Option<u32>,
}

/// Issue summary as returned by the search endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct IssueSummary {
    pub id: i64,
    pub number: i64,
    pub updated_at: DateTime<Utc>,
    pub raw: Value,
}

impl IssueSummary {
    pub fn from_value(raw: Value) -> Result<Self> {
        let id = required_i64(&raw, "id")?;
        let number = required_i64(&raw, "number")?;
        let updated_at = raw
            .get("updated_at")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("updated_at"))?;
        let updated_at = DateTime::parse_from_rfc3339(updated_at)?.with_timezone(&Utc);
        Ok(Self {
            id,
            number,
            updated_at,
            raw,
        })
    }
}

/// Issue as returned by the fetch-by-number endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct LiveIssue {
    pub number: i64,
    pub pull_request_url: Option<String>,
    pub raw: Value,
}

impl LiveIssue {
    pub fn from_value(raw: Value) -> Result<Self> {
        let number = required_i64(&raw, "number")?;
        let pull_request_url = raw
            .get("pull_request")
            .and_then(|pr| pr.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            number,
            pull_request_url,
            raw,
        })
    }

    pub fn is_pull_request(&self) -> bool {
        self.pull_request_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

/// Commit summary from a pull request's commit list
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSummary {
    pub sha: String,
    pub raw: Value,
}

impl CommitSummary {
    pub fn from_value(raw: Value) -> Result<Self> {
        let sha = raw
            .get("sha")
            .and_then(Value::as_str)
            .filter(|sha| !sha.is_empty())
            .ok_or_else(|| missing("sha"))?
            .to_string();
        Ok(Self { sha, raw })
    }
}

fn missing(field: &str) -> RepoToolsError {
    RepoToolsError::GitHub(format!("payload has no '{}' field", field))
}

fn required_i64(raw: &Value, field: &str) -> Result<i64> {
    raw.get(field).and_then(Value::as_i64).ok_or_else(|| missing(field))
}

/// Remote issue tracker operations used by the issue mirror
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// One page of issue search results, raw payloads
    async fn search_issues_page(&self, query: &str, page: u32) -> Result<Page<Value>>;

    /// Live issue by number
    async fn issue(&self, repo: &RepoHandle, number: i64) -> Result<LiveIssue>;

    /// One page of a pull request's commits, raw payloads
    async fn pull_request_commits_page(&self, repo: &RepoHandle, number: i64, page: u32) -> Result<Page<Value>>;
}

struct Cursor {
    buffer: VecDeque<Value>,
    next: Option<u32>,
}

/// Flatten a paged endpoint into a lazy stream of items.
/// Pages are requested only once the previous one is drained; the first error ends the stream.
fn paged<'a, F, Fut>(fetch: F) -> impl Stream<Item = Result<Value>> + 'a
where
    F: Fn(u32) -> Fut + 'a,
    Fut: Future<Output = Result<Page<Value>>> + 'a,
{
    let cursor = Cursor {
        buffer: VecDeque::new(),
        next: Some(1),
    };
    stream::try_unfold(cursor, move |mut cursor| {
        let pending = if cursor.buffer.is_empty() {
            cursor.next.take().map(&fetch)
        } else {
            None
        };
        async move {
            if let Some(pending) = pending {
                let page = pending.await?;
                // an empty page ends the sequence even if a next link was sent
                if !page.items.is_empty() {
                    cursor.next = page.next;
                }
                cursor.buffer.extend(page.items);
            }
            Ok::<_, RepoToolsError>(cursor.buffer.pop_front().map(|item| (item, cursor)))
        }
    })
}

/// Lazy sequence of raw issue search results
pub fn search_issues<'a, T>(tracker: &'a T, query: &'a str) -> impl Stream<Item = Result<Value>> + 'a
where
    T: IssueTracker + ?Sized,
{
    paged(move |page| tracker.search_issues_page(query, page))
}

/// Lazy sequence of raw commit payloads of a pull request
pub fn pull_request_commits<'a, T>(
    tracker: &'a T,
    repo: &'a RepoHandle,
    number: i64,
) -> impl Stream<Item = Result<Value>> + 'a
where
    T: IssueTracker + ?Sized,
{
    paged(move |page| tracker.pull_request_commits_page(repo, number, page))
}

/// GitHub REST API client
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api: String,
    per_page: u32,
}

impl GitHubClient {
    pub fn new(ctx: &Context) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if ctx.has_token() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("token {}", ctx.github_oauth))?,
            );
        }
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(USER_AGENT),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(ctx.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api: ctx.github_api.clone(),
            per_page: ctx.per_page,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<(Value, Option<String>)> {
        let url = format!("{}{}", self.api, path);
        debug!("GET {} {:?}", url, query);

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        let link = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RepoToolsError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                message: error_message(&text, status),
            });
        }

        let text = response.text().await?;
        Ok((serde_json::from_str(&text)?, link))
    }

    async fn get_page(&self, path: &str, mut query: Vec<(&str, String)>, page: u32) -> Result<(Value, Option<u32>)> {
        query.push(("per_page", self.per_page.to_string()));
        query.push(("page", page.to_string()));
        let (body, link) = self.get(path, &query).await?;
        Ok((body, link.as_deref().and_then(|link| next_page(link, page))))
    }

    /// Remaining core API points and the time they reset
    pub async fn check_rate_limits(&self) -> Result<(u32, DateTime<Utc>)> {
        let (rate_limit, _) = self.get("/rate_limit", &[]).await?;

        let remaining = rate_limit["rate"]["remaining"].as_u64().unwrap_or(0) as u32;

        let reset_timestamp = rate_limit["rate"]["reset"].as_i64().unwrap_or(0);

        let reset_time = DateTime::from_timestamp(reset_timestamp, 0).unwrap_or_else(Utc::now);

        Ok((remaining, reset_time))
    }

    /// Rate limit probe used as the startup connectivity check; any failure is a setup error
    pub async fn ensure_reachable(&self) -> Result<(u32, DateTime<Utc>)> {
        self.check_rate_limits()
            .await
            .map_err(|err| err.into_setup(&format!("cannot reach GitHub at {}", self.api)))
    }

    /// Clone statistics from the traffic API (needs push access to the repository)
    pub async fn traffic_clones(&self, repo: &RepoHandle, period: TrafficPeriod) -> Result<CloneTraffic> {
        let path = format!("/repos/{}/traffic/clones", repo.full_name());
        let (body, _) = self.get(&path, &[("per", period.as_str().to_string())]).await?;
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn search_issues_page(&self, query: &str, page: u32) -> Result<Page<Value>> {
        let (mut body, next) = self
            .get_page("/search/issues", vec![("q", query.to_string())], page)
            .await?;
        let items = match body.get_mut("items").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => return Err(RepoToolsError::GitHub("search response has no 'items' array".to_string())),
        };
        Ok(Page { items, next })
    }

    async fn issue(&self, repo: &RepoHandle, number: i64) -> Result<LiveIssue> {
        let path = format!("/repos/{}/issues/{}", repo.full_name(), number);
        let (body, _) = self.get(&path, &[]).await?;
        LiveIssue::from_value(body)
    }

    async fn pull_request_commits_page(&self, repo: &RepoHandle, number: i64, page: u32) -> Result<Page<Value>> {
        let path = format!("/repos/{}/pulls/{}/commits", repo.full_name(), number);
        let (body, next) = self.get_page(&path, Vec::new(), page).await?;
        match body {
            Value::Array(items) => Ok(Page { items, next }),
            _ => Err(RepoToolsError::GitHub(format!("{} did not return a list", path))),
        }
    }
}

/// `message` of a GitHub error document, else the status reason
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|doc| doc.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no message").to_string())
}

/// Page number of the `rel="next"` entry of a `Link` header
fn next_page(link: &str, current: u32) -> Option<u32> {
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        let page = url::Url::parse(target).ok().and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "page")
                .and_then(|(_, value)| value.parse().ok())
        });
        Some(page.unwrap_or(current + 1))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> GitHubClient {
        let ctx = Context {
            github_api: server.url(),
            github_oauth: "test-token".to_string(),
            per_page: 2,
            ..Context::new()
        };
        GitHubClient::new(&ctx).unwrap()
    }

    #[test]
    fn link_header_next_page() {
        let link = r#"<https://api.github.com/search/issues?q=repo%3Aa%2Fb&page=3>; rel="next", <https://api.github.com/search/issues?q=repo%3Aa%2Fb&page=9>; rel="last""#;
        assert_eq!(next_page(link, 2), Some(3));

        let last = r#"<https://api.github.com/search/issues?page=1>; rel="prev", <https://api.github.com/search/issues?page=1>; rel="first""#;
        assert_eq!(next_page(last, 2), None);
    }

    #[test]
    fn issue_summary_requires_key_fields() {
        let summary = IssueSummary::from_value(json!({
            "id": 1001, "number": 42, "updated_at": "2021-01-01T00:00:00Z", "title": "x"
        }))
        .unwrap();
        assert_eq!(summary.id, 1001);
        assert_eq!(summary.number, 42);
        assert_eq!(summary.updated_at.to_rfc3339(), "2021-01-01T00:00:00+00:00");

        assert!(IssueSummary::from_value(json!({"number": 42, "updated_at": "2021-01-01T00:00:00Z"})).is_err());
        assert!(IssueSummary::from_value(json!({"id": 1, "number": 42})).is_err());
        assert!(IssueSummary::from_value(json!({"id": 1, "number": 42, "updated_at": "yesterday"})).is_err());
    }

    #[test]
    fn live_issue_pull_request_detection() {
        let pr = LiveIssue::from_value(json!({
            "number": 7, "pull_request": {"url": "https://api.github.com/repos/a/b/pulls/7"}
        }))
        .unwrap();
        assert!(pr.is_pull_request());

        let empty = LiveIssue::from_value(json!({"number": 8, "pull_request": {"url": ""}})).unwrap();
        assert!(!empty.is_pull_request());

        let issue = LiveIssue::from_value(json!({"number": 9})).unwrap();
        assert!(!issue.is_pull_request());
    }

    #[tokio::test]
    async fn search_stream_follows_link_header() {
        let mut server = Server::new_async().await;
        let next = format!(r#"<{}/search/issues?q=repo%3Aa%2Fb&per_page=2&page=2>; rel="next""#, server.url());
        let first = server
            .mock("GET", "/search/issues")
            .match_header("authorization", "token test-token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "repo:a/b".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("per_page".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("link", &next)
            .with_body(json!({"total_count": 3, "items": [{"id": 1}, {"id": 2}]}).to_string())
            .create_async()
            .await;
        let second = server
            .mock("GET", "/search/issues")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(json!({"total_count": 3, "items": [{"id": 3}]}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let items: Vec<Value> = search_issues(&client, "repo:a/b")
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(items.iter().map(|i| i["id"].as_i64().unwrap()).collect::<Vec<_>>(), vec![1, 2, 3]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_surfaces_message() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/a/b/issues/5")
            .with_status(404)
            .with_body(json!({"message": "Not Found"}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.issue(&RepoHandle::new("a", "b"), 5).await.unwrap_err();
        assert!(err.to_string().contains("Not Found"), "{}", err);
        assert!(matches!(err, RepoToolsError::Status { status: 404, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn unreachable_api_is_a_setup_error() {
        let ctx = Context {
            github_api: "http://127.0.0.1:1".to_string(),
            timeout_secs: 5,
            ..Context::new()
        };
        let client = GitHubClient::new(&ctx).unwrap();
        let err = client.ensure_reachable().await.unwrap_err();
        assert!(err.is_setup(), "{:?}", err);
        assert!(err.to_string().starts_with("cannot reach GitHub at http://127.0.0.1:1"), "{}", err);
    }

    #[tokio::test]
    async fn non_json_error_page_keeps_status() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/a/b/traffic/clones")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_header("content-type", "text/html")
            .with_body("<html><body><h1>502 Bad Gateway</h1></body></html>")
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .traffic_clones(&RepoHandle::new("a", "b"), TrafficPeriod::Week)
            .await
            .unwrap_err();
        match &err {
            RepoToolsError::Status { endpoint, status, message } => {
                assert_eq!(endpoint, "/repos/a/b/traffic/clones");
                assert_eq!(*status, 502);
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("expected a status error, got {:?}", other),
        }
        assert!(err.to_string().contains("502"), "{}", err);
    }

    #[tokio::test]
    async fn commit_pages_and_rate_limit() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/a/b/pulls/7/commits")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(json!([{"sha": "abc"}, {"sha": "def"}]).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/rate_limit")
            .with_status(200)
            .with_body(json!({"rate": {"remaining": 4999, "reset": 1_600_000_000}}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let repo = RepoHandle::new("a", "b");
        let page = client.pull_request_commits_page(&repo, 7, 1).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next, None);

        let (remaining, reset) = client.check_rate_limits().await.unwrap();
        assert_eq!(remaining, 4999);
        assert_eq!(reset.timestamp(), 1_600_000_000);
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::state::{SortOrder, TagLogic};

/// Where the bearer token comes from is not this module's business; the
/// client just asks for the current one on every request.
pub trait TokenSource: Send + Sync {
    fn bearer(&self) -> Option<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("api error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Author {
    /// Preferred human-readable name, falling back through the aliases the
    /// server may or may not populate.
    pub fn display(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.global_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.name)
    }
}

/// One forum thread as the search/follows endpoints describe it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadSummary {
    pub thread_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub author_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub latest_update_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub reaction_count: i64,
    #[serde(default)]
    pub first_message_excerpt: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Follows listings only: the thread changed since last viewed.
    #[serde(default)]
    pub has_update: bool,
    #[serde(default)]
    pub latest_update_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SearchRequest {
    pub channel_ids: Option<Vec<String>>,
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub tag_logic: TagLogic,
    pub keywords: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub sort_method: String,
    pub sort_order: SortOrder,
    pub limit: usize,
    pub offset: usize,
    /// Append-style deployments tell the server which ids the client
    /// already holds so a page slot is not wasted on a duplicate. Empty
    /// under page-based pagination.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_thread_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<ThreadSummary>,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub available_tags: Vec<String>,
    #[serde(default)]
    pub banner_carousel: Vec<Banner>,
    #[serde(default)]
    pub unread_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Banner {
    pub thread_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub cover_image_url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FollowsResponse {
    #[serde(default)]
    pub threads: Vec<ThreadSummary>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageFetchRequest {
    pub items: Vec<ImageFetchItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageFetchItem {
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ImageFetchResponse {
    #[serde(default)]
    pub results: Vec<ImageFetchResult>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ImageFetchResult {
    pub thread_id: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub thumbnail_urls: Option<Vec<String>>,
    #[serde(default)]
    pub updated: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ImageFetchResult {
    /// First usable URL, whichever shape the server chose.
    pub fn url(&self) -> Option<&str> {
        self.thumbnail_url
            .as_deref()
            .or_else(|| self.thumbnail_urls.as_ref()?.first().map(String::as_str))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthStatus {
    #[serde(rename = "loggedIn", default)]
    pub logged_in: bool,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub unread_count: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct UnreadCountResponse {
    #[serde(default)]
    unread_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    base_url: Url,
    user_agent: String,
    token: Arc<dyn TokenSource>,
}

impl Client {
    pub fn new(token: Arc<dyn TokenSource>, config: ClientConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.base_url.trim().is_empty(),
            "api client base url required"
        );
        anyhow::ensure!(
            !config.user_agent.trim().is_empty(),
            "api client user agent required"
        );
        // keep a trailing slash so Url::join treats the last path segment
        // as a directory instead of replacing it
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };
        Ok(Client {
            http,
            base_url,
            user_agent: config.user_agent,
            token,
        })
    }

    pub fn search(&self, req: &SearchRequest) -> ApiResult<SearchResponse> {
        self.post_json("search", req)
    }

    pub fn follows(&self, limit: usize, offset: usize) -> ApiResult<FollowsResponse> {
        let path = format!("follows/?limit={limit}&offset={offset}");
        let resp = self.request(Method::GET, &path, None)?;
        decode_json(resp)
    }

    /// Idempotent from the client's perspective: a follow that is already
    /// gone counts as removed.
    pub fn unfollow(&self, thread_id: &str) -> ApiResult<()> {
        let path = format!("follows/{thread_id}");
        match self.request(Method::DELETE, &path, None) {
            Ok(_) => Ok(()),
            Err(ApiError::Status { status: 404, .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn mark_viewed(&self) -> ApiResult<()> {
        self.request(Method::POST, "follows/mark-viewed", None)?;
        Ok(())
    }

    pub fn unread_count(&self) -> ApiResult<i64> {
        let resp = self.request(Method::GET, "follows/unread-count", None)?;
        let body: UnreadCountResponse = decode_json(resp)?;
        Ok(body.unread_count)
    }

    pub fn fetch_images(&self, req: &ImageFetchRequest) -> ApiResult<ImageFetchResponse> {
        self.post_json("fetch-images", req)
    }

    pub fn check_auth(&self) -> ApiResult<AuthStatus> {
        let resp = self.request(Method::GET, "auth/checkauth", None)?;
        decode_json(resp)
    }

    /// Login/logout are plain redirect endpoints handled by the browser.
    pub fn login_url(&self) -> String {
        self.base_url
            .join("auth/login")
            .map(|u| u.to_string())
            .unwrap_or_default()
    }

    pub fn logout_url(&self) -> String {
        self.base_url
            .join("auth/logout")
            .map(|u| u.to_string())
            .unwrap_or_default()
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        let body = serde_json::to_string(body)
            .map_err(|err| ApiError::Decode(format!("encode request: {err}")))?;
        let resp = self.request(Method::POST, path, Some(body))?;
        decode_json(resp)
    }

    fn request(&self, method: Method, path: &str, json: Option<String>) -> ApiResult<Response> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| ApiError::Decode(format!("bad path {path}: {err}")))?;

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(token) = self.token.bearer() {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = json {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        let resp = req.send()?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else if status.as_u16() == 401 {
            Err(ApiError::Unauthorized)
        } else {
            let body = resp.text().unwrap_or_default();
            Err(ApiError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn decode_json<T: DeserializeOwned>(resp: Response) -> ApiResult<T> {
    let bytes = resp.bytes()?;
    serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_omits_empty_exclude_ids() {
        let req = SearchRequest {
            sort_method: "last_active".into(),
            limit: 24,
            ..SearchRequest::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("exclude_thread_ids").is_none());
        assert_eq!(json["tag_logic"], "and");
        assert_eq!(json["sort_order"], "desc");
        assert_eq!(json["channel_ids"], serde_json::Value::Null);
    }

    #[test]
    fn thread_summary_tolerates_missing_fields() {
        let raw = r#"{
            "thread_id": "42",
            "title": "hello",
            "created_at": "2024-03-01T12:00:00Z",
            "last_active_at": "2024-03-02T12:00:00Z"
        }"#;
        let thread: ThreadSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(thread.thread_id, "42");
        assert!(thread.tags.is_empty());
        assert_eq!(thread.thumbnail_url, None);
        assert!(!thread.has_update);
    }

    #[test]
    fn image_result_prefers_single_url() {
        let result = ImageFetchResult {
            thread_id: "1".into(),
            thumbnail_url: Some("a".into()),
            thumbnail_urls: Some(vec!["b".into()]),
            updated: true,
            error: None,
        };
        assert_eq!(result.url(), Some("a"));

        let result = ImageFetchResult {
            thread_id: "1".into(),
            thumbnail_url: None,
            thumbnail_urls: Some(vec!["b".into()]),
            updated: true,
            error: None,
        };
        assert_eq!(result.url(), Some("b"));
    }

    #[test]
    fn author_display_falls_back() {
        let author = Author {
            name: "doe".into(),
            display_name: None,
            global_name: Some("Jane Doe".into()),
            avatar: None,
        };
        assert_eq!(author.display(), "Jane Doe");
    }

    #[test]
    fn checkauth_parses_camel_case_flag() {
        let raw = r#"{"loggedIn": true, "unread_count": 3}"#;
        let status: AuthStatus = serde_json::from_str(raw).unwrap();
        assert!(status.logged_in);
        assert_eq!(status.unread_count, 3);
    }
}

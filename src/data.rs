use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::api::{
    self, ApiResult, Author, FollowsResponse, ImageFetchRequest, ImageFetchResponse,
    ImageFetchResult, SearchRequest, SearchResponse, ThreadSummary,
};

pub trait SearchService: Send + Sync {
    fn search(&self, req: &SearchRequest) -> ApiResult<SearchResponse>;
}

pub trait FollowsService: Send + Sync {
    fn follows(&self, limit: usize, offset: usize) -> ApiResult<FollowsResponse>;
    fn unfollow(&self, thread_id: &str) -> ApiResult<()>;
    fn mark_viewed(&self) -> ApiResult<()>;
    fn unread_count(&self) -> ApiResult<i64>;
}

pub trait ImageService: Send + Sync {
    fn fetch_images(&self, req: &ImageFetchRequest) -> ApiResult<ImageFetchResponse>;
}

pub trait AuthService: Send + Sync {
    fn check_auth(&self) -> ApiResult<api::AuthStatus>;
    fn login_url(&self) -> String;
    fn logout_url(&self) -> String;
}

pub struct RemoteSearchService {
    client: Arc<api::Client>,
}

impl RemoteSearchService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl SearchService for RemoteSearchService {
    fn search(&self, req: &SearchRequest) -> ApiResult<SearchResponse> {
        self.client.search(req)
    }
}

pub struct RemoteFollowsService {
    client: Arc<api::Client>,
}

impl RemoteFollowsService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FollowsService for RemoteFollowsService {
    fn follows(&self, limit: usize, offset: usize) -> ApiResult<FollowsResponse> {
        self.client.follows(limit, offset)
    }

    fn unfollow(&self, thread_id: &str) -> ApiResult<()> {
        self.client.unfollow(thread_id)
    }

    fn mark_viewed(&self) -> ApiResult<()> {
        self.client.mark_viewed()
    }

    fn unread_count(&self) -> ApiResult<i64> {
        self.client.unread_count()
    }
}

pub struct RemoteImageService {
    client: Arc<api::Client>,
}

impl RemoteImageService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ImageService for RemoteImageService {
    fn fetch_images(&self, req: &ImageFetchRequest) -> ApiResult<ImageFetchResponse> {
        self.client.fetch_images(req)
    }
}

pub struct RemoteAuthService {
    client: Arc<api::Client>,
}

impl RemoteAuthService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl AuthService for RemoteAuthService {
    fn check_auth(&self) -> ApiResult<api::AuthStatus> {
        self.client.check_auth()
    }

    fn login_url(&self) -> String {
        self.client.login_url()
    }

    fn logout_url(&self) -> String {
        self.client.logout_url()
    }
}

/// Canned data for running without a configured server.
pub fn sample_threads() -> Vec<ThreadSummary> {
    let now = Utc::now();
    let mk = |id: &str, title: &str, tags: &[&str], days_old: i64, replies: i64| ThreadSummary {
        thread_id: id.to_string(),
        channel_id: Some("sample".to_string()),
        title: title.to_string(),
        author: Author {
            name: "sample-user".to_string(),
            display_name: None,
            global_name: None,
            avatar: None,
        },
        author_id: None,
        created_at: now - Duration::days(days_old),
        last_active_at: now - Duration::hours(days_old),
        latest_update_at: None,
        reply_count: replies,
        reaction_count: replies / 2,
        first_message_excerpt: format!("Sample discussion about {title}."),
        thumbnail_url: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        has_update: false,
        latest_update_link: None,
    };
    vec![
        mk("s-1", "Getting started guide", &["guide", "beginner"], 30, 42),
        mk("s-2", "Show and tell: builds", &["showcase"], 14, 18),
        mk("s-3", "Weekly help thread", &["help", "beginner"], 7, 64),
        mk("s-4", "Advanced tuning tips", &["guide", "advanced"], 3, 9),
        mk("s-5", "Release discussion", &["news"], 1, 27),
    ]
}

#[derive(Default)]
pub struct MockSearchService;

impl SearchService for MockSearchService {
    fn search(&self, req: &SearchRequest) -> ApiResult<SearchResponse> {
        let threads = sample_threads();
        let mut tags: Vec<String> = threads.iter().flat_map(|t| t.tags.clone()).collect();
        tags.sort();
        tags.dedup();
        let total = threads.len();
        let page: Vec<ThreadSummary> = threads
            .into_iter()
            .skip(req.offset)
            .take(req.limit.max(1))
            .collect();
        Ok(SearchResponse {
            results: page,
            total,
            available_tags: tags,
            banner_carousel: Vec::new(),
            unread_count: None,
        })
    }
}

#[derive(Default)]
pub struct MockFollowsService;

impl FollowsService for MockFollowsService {
    fn follows(&self, limit: usize, offset: usize) -> ApiResult<FollowsResponse> {
        let threads = sample_threads();
        let total = threads.len();
        Ok(FollowsResponse {
            threads: threads.into_iter().skip(offset).take(limit.max(1)).collect(),
            total,
        })
    }

    fn unfollow(&self, _thread_id: &str) -> ApiResult<()> {
        Ok(())
    }

    fn mark_viewed(&self) -> ApiResult<()> {
        Ok(())
    }

    fn unread_count(&self) -> ApiResult<i64> {
        Ok(0)
    }
}

#[derive(Default)]
pub struct MockImageService;

impl ImageService for MockImageService {
    fn fetch_images(&self, req: &ImageFetchRequest) -> ApiResult<ImageFetchResponse> {
        Ok(ImageFetchResponse {
            results: req
                .items
                .iter()
                .map(|item| ImageFetchResult {
                    thread_id: item.thread_id.clone(),
                    thumbnail_url: None,
                    thumbnail_urls: None,
                    updated: false,
                    error: Some("no image service configured".to_string()),
                })
                .collect(),
        })
    }
}

#[derive(Default)]
pub struct MockAuthService;

impl AuthService for MockAuthService {
    fn check_auth(&self) -> ApiResult<api::AuthStatus> {
        Ok(api::AuthStatus {
            logged_in: true,
            user: Some(api::UserProfile {
                id: "0".to_string(),
                username: "sample-user".to_string(),
                global_name: None,
                avatar: None,
            }),
            unread_count: 0,
        })
    }

    fn login_url(&self) -> String {
        String::new()
    }

    fn logout_url(&self) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_search_pages_through_samples() {
        let svc = MockSearchService;
        let mut req = SearchRequest::default();
        req.limit = 2;
        req.offset = 2;
        let resp = svc.search(&req).unwrap();
        assert_eq!(resp.total, 5);
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[0].thread_id, "s-3");
        assert!(resp.available_tags.contains(&"guide".to_string()));
    }
}

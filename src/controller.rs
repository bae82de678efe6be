use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::api::{
    ApiError, ApiResult, AuthStatus, FollowsResponse, ImageFetchResponse, SearchRequest,
    SearchResponse, ThreadSummary, UserProfile,
};
use crate::banner::BannerRotation;
use crate::config::Channel;
use crate::data::{AuthService, FollowsService, ImageService, SearchService};
use crate::filter;
use crate::images::{self, Batch, ImageRecoveryQueue, SlotId, SlotUpdate};
use crate::pagination::{self, PageWindow};
use crate::state::{SortSelection, TagLogic, ViewMode, ViewState};
use crate::urlstate;

/// Follows are fetched in one coalesced request and filtered locally, so
/// the limit just needs to be comfortably above any real follow list.
const FOLLOWS_FETCH_LIMIT: usize = 500;

#[derive(Clone)]
pub struct Services {
    pub search: Arc<dyn SearchService>,
    pub follows: Arc<dyn FollowsService>,
    pub images: Arc<dyn ImageService>,
    pub auth: Arc<dyn AuthService>,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub per_page: usize,
    pub page_window: usize,
    pub channels: Vec<Channel>,
    pub image_debounce: std::time::Duration,
    pub image_max_attempts: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            per_page: pagination::DEFAULT_PER_PAGE,
            page_window: pagination::DEFAULT_WINDOW,
            channels: Vec::new(),
            image_debounce: images::DEFAULT_DEBOUNCE,
            image_max_attempts: images::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

struct PendingSearch {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

struct PendingFollows {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

pub enum Response {
    Search {
        request_id: u64,
        result: ApiResult<SearchResponse>,
    },
    Follows {
        request_id: u64,
        result: ApiResult<FollowsResponse>,
    },
    Unfollow {
        thread_id: String,
        result: ApiResult<()>,
    },
    Images {
        result: ApiResult<ImageFetchResponse>,
    },
    Auth {
        result: ApiResult<AuthStatus>,
    },
    Unread {
        result: ApiResult<i64>,
    },
    MarkViewed {
        result: ApiResult<()>,
    },
}

#[derive(Default)]
struct FollowsCache {
    threads: Vec<ThreadSummary>,
    total: usize,
    fetched: bool,
}

/// Everything behind the browse view: the declarative state, the result
/// collections for both modes, and the async request plumbing. Responses
/// arrive over a channel and are matched against the pending request id,
/// so a reply from an abandoned request can never overwrite newer results.
pub struct Controller {
    pub state: ViewState,
    options: Options,
    services: Services,

    results: Vec<ThreadSummary>,
    total: usize,
    available_tags: Vec<String>,

    follows: FollowsCache,
    filtered: Vec<ThreadSummary>,

    pub banner: BannerRotation,
    image_queue: ImageRecoveryQueue,
    in_flight_images: Option<Batch>,
    image_updates: Vec<SlotUpdate>,

    pub authed: Option<bool>,
    pub user: Option<UserProfile>,
    pub unread_count: i64,
    pub loading: bool,
    pub last_error: Option<String>,

    response_tx: Sender<Response>,
    response_rx: Receiver<Response>,
    next_request_id: u64,
    pending_search: Option<PendingSearch>,
    pending_follows: Option<PendingFollows>,
}

impl Controller {
    pub fn new(services: Services, options: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let mut state = ViewState::default();
        state.per_page = options.per_page;
        state.follows_per_page = options.per_page;

        Controller {
            state,
            image_queue: ImageRecoveryQueue::new(
                options.image_debounce,
                options.image_max_attempts,
            ),
            options,
            services,
            results: Vec::new(),
            total: 0,
            available_tags: Vec::new(),
            follows: FollowsCache::default(),
            filtered: Vec::new(),
            banner: BannerRotation::new(),
            in_flight_images: None,
            image_updates: Vec::new(),
            authed: None,
            user: None,
            unread_count: 0,
            loading: false,
            last_error: None,
            response_tx,
            response_rx,
            next_request_id: 1,
            pending_search: None,
            pending_follows: None,
        }
    }

    /// Restore a shared view. Page and per-page are clamped back to sane
    /// values; an unknown channel id is dropped.
    pub fn restore(&mut self, mut view: ViewState) {
        if view.per_page == 0 {
            view.per_page = self.options.per_page;
        }
        if view.follows_per_page == 0 {
            view.follows_per_page = self.options.per_page;
        }
        if let Some(id) = &view.channel_id {
            if !self.options.channels.is_empty()
                && !self.options.channels.iter().any(|c| &c.id == id)
            {
                view.channel_id = None;
            }
        }
        self.state = view;
        self.refresh();
    }

    pub fn share_url(&self) -> String {
        urlstate::encode(&self.state)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.options.channels
    }

    pub fn available_tags(&self) -> &[String] {
        &self.available_tags
    }

    /// Threads for the current page of whichever mode is active.
    pub fn visible_threads(&self) -> &[ThreadSummary] {
        match self.state.mode {
            ViewMode::Search => &self.results,
            ViewMode::Follows => {
                let (start, end) = pagination::slice_bounds(
                    self.filtered.len(),
                    self.state.follows_page,
                    self.state.follows_per_page,
                );
                &self.filtered[start..end]
            }
        }
    }

    pub fn page_window(&self) -> PageWindow {
        let (total, page, per_page) = match self.state.mode {
            ViewMode::Search => (self.total, self.state.page, self.state.per_page),
            ViewMode::Follows => (
                self.filtered.len(),
                self.state.follows_page,
                self.state.follows_per_page,
            ),
        };
        let pages = pagination::page_count(total, per_page);
        pagination::window(page, pages, self.options.page_window)
    }

    pub fn total_for_mode(&self) -> usize {
        match self.state.mode {
            ViewMode::Search => self.total,
            ViewMode::Follows => self.filtered.len(),
        }
    }

    /// Re-run the active mode from current state. Search goes to the
    /// server; follows re-filters the cached list (fetching it first if
    /// this session has not yet).
    pub fn refresh(&mut self) {
        match self.state.mode {
            ViewMode::Search => self.dispatch_search(),
            ViewMode::Follows => {
                if self.follows.fetched {
                    self.apply_follows_filter();
                } else {
                    self.dispatch_follows();
                }
            }
        }
    }

    fn take_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn search_request(&self) -> SearchRequest {
        let (include_tags, exclude_tags) = self.state.tag_lists();
        let parsed = filter::parse_query(&self.state.query);
        let mut keywords = parsed.keywords();
        // author: filters travel with the rest of the query; the server
        // understands the same syntax.
        if let Some(author) = &parsed.author {
            let clause = if author.contains(' ') {
                format!("author:\"{author}\"")
            } else {
                format!("author:{author}")
            };
            keywords = Some(match keywords {
                Some(rest) => format!("{clause} {rest}"),
                None => clause,
            });
        }

        SearchRequest {
            channel_ids: self.state.channel_id.clone().map(|id| vec![id]),
            include_tags,
            exclude_tags,
            tag_logic: self.state.tag_logic,
            keywords,
            created_after: self.state.time_from.map(|d| d.format("%Y-%m-%d").to_string()),
            created_before: self.state.time_to.map(|d| d.format("%Y-%m-%d").to_string()),
            sort_method: self.state.sort.key.api_method().to_string(),
            sort_order: self.state.sort.order,
            limit: self.state.per_page,
            offset: (self.state.page.saturating_sub(1)) * self.state.per_page,
            exclude_thread_ids: Vec::new(),
        }
    }

    fn dispatch_search(&mut self) {
        let request_id = self.take_request_id();
        if let Some(pending) = self.pending_search.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_search = Some(PendingSearch {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });
        self.loading = true;

        let request = self.search_request();
        let service = self.services.search.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.search(&request);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(Response::Search { request_id, result });
        });
    }

    fn dispatch_follows(&mut self) {
        if self.pending_follows.is_some() {
            return;
        }
        let request_id = self.take_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_follows = Some(PendingFollows {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });
        self.loading = true;

        let service = self.services.follows.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.follows(FOLLOWS_FETCH_LIMIT, 0);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(Response::Follows { request_id, result });
        });
    }

    fn apply_follows_filter(&mut self) {
        self.filtered = filter::filter_threads(&self.follows.threads, &self.state);
        let pages =
            pagination::page_count(self.filtered.len(), self.state.follows_per_page);
        self.state.follows_page = pagination::clamp_page(self.state.follows_page, pages);
    }

    // ----- input operations ---------------------------------------------

    pub fn set_query(&mut self, query: String) {
        match self.state.mode {
            ViewMode::Search => {
                self.state.query = query;
                self.state.page = 1;
            }
            ViewMode::Follows => {
                self.state.follows_query = query;
                self.state.follows_page = 1;
            }
        }
        self.refresh();
    }

    pub fn go_to_page(&mut self, page: usize) {
        match self.state.mode {
            ViewMode::Search => {
                let pages = pagination::page_count(self.total, self.state.per_page);
                let clamped = pagination::clamp_page(page, pages);
                if clamped == self.state.page {
                    return;
                }
                self.state.page = clamped;
                self.dispatch_search();
            }
            ViewMode::Follows => {
                let pages =
                    pagination::page_count(self.filtered.len(), self.state.follows_per_page);
                self.state.follows_page = pagination::clamp_page(page, pages);
            }
        }
    }

    pub fn next_page(&mut self) {
        self.go_to_page(self.state.active_page() + 1);
    }

    pub fn prev_page(&mut self) {
        self.go_to_page(self.state.active_page().saturating_sub(1));
    }

    pub fn toggle_tag(&mut self, tag: &str) {
        self.state.toggle_tag(tag);
        match self.state.mode {
            ViewMode::Search => self.state.page = 1,
            ViewMode::Follows => self.state.follows_page = 1,
        }
        self.refresh();
    }

    pub fn toggle_tag_logic(&mut self) {
        self.state.tag_logic = match self.state.tag_logic {
            TagLogic::And => TagLogic::Or,
            TagLogic::Or => TagLogic::And,
        };
        if self.state.mode == ViewMode::Search {
            self.state.page = 1;
            self.dispatch_search();
        }
        // follows always match with AND; nothing to re-filter
    }

    pub fn toggle_click_mode(&mut self) {
        self.state.tag_click_mode = self.state.tag_click_mode.toggled();
    }

    pub fn cycle_sort(&mut self) {
        self.set_sort(self.state.sort.next());
    }

    pub fn set_sort(&mut self, sort: SortSelection) {
        if self.state.sort == sort {
            return;
        }
        self.state.sort = sort;
        match self.state.mode {
            ViewMode::Search => {
                self.state.page = 1;
                self.dispatch_search();
            }
            ViewMode::Follows => self.apply_follows_filter(),
        }
    }

    pub fn set_date_bounds(
        &mut self,
        from: Option<chrono::NaiveDate>,
        to: Option<chrono::NaiveDate>,
    ) {
        self.state.time_from = from;
        self.state.time_to = to;
        match self.state.mode {
            ViewMode::Search => {
                self.state.page = 1;
                self.dispatch_search();
            }
            ViewMode::Follows => self.apply_follows_filter(),
        }
    }

    /// Step through none -> first channel -> ... -> last -> none.
    pub fn cycle_channel(&mut self) {
        if self.options.channels.is_empty() {
            return;
        }
        let next = match &self.state.channel_id {
            None => Some(self.options.channels[0].id.clone()),
            Some(current) => {
                let idx = self.options.channels.iter().position(|c| &c.id == current);
                match idx {
                    Some(i) if i + 1 < self.options.channels.len() => {
                        Some(self.options.channels[i + 1].id.clone())
                    }
                    _ => None,
                }
            }
        };
        self.state.channel_id = next;
        if self.state.mode == ViewMode::Search {
            self.state.page = 1;
            self.dispatch_search();
        }
    }

    pub fn switch_mode(&mut self, mode: ViewMode) {
        if self.state.mode == mode {
            return;
        }
        if self.state.mode == ViewMode::Follows {
            // leaving follows drops its transient query and tag picks
            self.state.follows_query.clear();
            self.state.follows_tag_states.clear();
            self.state.follows_page = 1;
        }
        self.state.mode = mode;
        match mode {
            ViewMode::Search => self.dispatch_search(),
            ViewMode::Follows => {
                self.unread_count = 0;
                self.dispatch_mark_viewed();
                if self.follows.fetched {
                    self.apply_follows_filter();
                } else {
                    self.dispatch_follows();
                }
            }
        }
    }

    pub fn unfollow(&mut self, thread_id: String) {
        let service = self.services.follows.clone();
        let tx = self.response_tx.clone();
        let id = thread_id.clone();
        thread::spawn(move || {
            let result = service.unfollow(&id);
            let _ = tx.send(Response::Unfollow {
                thread_id: id,
                result,
            });
        });
        // optimistic: the row disappears immediately
        self.follows.threads.retain(|t| t.thread_id != thread_id);
        self.follows.total = self.follows.total.saturating_sub(1);
        self.apply_follows_filter();
    }

    fn dispatch_mark_viewed(&mut self) {
        let service = self.services.follows.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.mark_viewed();
            let _ = tx.send(Response::MarkViewed { result });
        });
    }

    pub fn check_auth(&mut self) {
        let service = self.services.auth.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.check_auth();
            let _ = tx.send(Response::Auth { result });
        });
    }

    pub fn refresh_unread(&mut self) {
        let service = self.services.follows.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.unread_count();
            let _ = tx.send(Response::Unread { result });
        });
    }

    pub fn login_url(&self) -> String {
        self.services.auth.login_url()
    }

    pub fn logout_url(&self) -> String {
        self.services.auth.logout_url()
    }

    /// Session teardown. Cancels whatever is in flight so its eventual
    /// reply has no pending id to match, and drops per-account data.
    pub fn logged_out(&mut self) {
        if let Some(pending) = self.pending_search.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        if let Some(pending) = self.pending_follows.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        self.follows = FollowsCache::default();
        self.filtered.clear();
        self.image_queue.reset();
        self.in_flight_images = None;
        self.authed = Some(false);
        self.user = None;
        self.unread_count = 0;
        self.loading = false;
        self.state.mode = ViewMode::Search;
    }

    // ----- images --------------------------------------------------------

    /// Card render reported a broken thumbnail.
    pub fn image_failed(&mut self, thread_id: &str, channel_id: Option<&str>, slot: SlotId) {
        self.image_queue
            .enqueue(thread_id, channel_id, slot, Instant::now());
    }

    /// Slot updates accumulated since the last call, for the renderer.
    pub fn take_image_updates(&mut self) -> Vec<SlotUpdate> {
        std::mem::take(&mut self.image_updates)
    }

    fn flush_images(&mut self, now: Instant) {
        if self.in_flight_images.is_some() {
            return;
        }
        let Some(batch) = self.image_queue.begin_flush(now) else {
            return;
        };
        let request = batch.request();
        self.in_flight_images = Some(batch);

        let service = self.services.images.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.fetch_images(&request);
            let _ = tx.send(Response::Images { result });
        });
    }

    fn apply_recovered_url(&mut self, thread_id: &str, url: &str) {
        let busted = images::cache_busted(url, Utc::now().timestamp_millis());
        for thread in self
            .results
            .iter_mut()
            .chain(self.follows.threads.iter_mut())
            .chain(self.filtered.iter_mut())
        {
            if thread.thread_id == thread_id {
                thread.thumbnail_url = Some(busted.clone());
            }
        }
    }

    // ----- async plumbing ------------------------------------------------

    /// Drive timers: banner autoplay and the image debounce window. The
    /// carousel only rotates while it is on screen.
    pub fn tick(&mut self, now: Instant) {
        if self.state.mode == ViewMode::Search {
            self.banner.tick(now);
        }
        self.flush_images(now);
    }

    /// Drain and apply everything the worker threads have sent.
    pub fn pump(&mut self) {
        while let Ok(response) = self.response_rx.try_recv() {
            self.handle_response(response);
        }
    }

    fn handle_response(&mut self, response: Response) {
        match response {
            Response::Search { request_id, result } => {
                let Some(pending) = self.pending_search.as_ref() else {
                    return;
                };
                if pending.request_id != request_id
                    || pending.cancel_flag.load(Ordering::SeqCst)
                {
                    return;
                }
                self.pending_search = None;
                self.loading = false;
                match result {
                    Ok(response) => {
                        self.last_error = None;
                        self.results = dedupe_by_id(response.results);
                        self.total = response.total;
                        if !response.available_tags.is_empty() {
                            self.available_tags = response.available_tags;
                        }
                        self.banner
                            .set_banners(response.banner_carousel, Instant::now());
                        if let Some(unread) = response.unread_count {
                            self.unread_count = unread;
                        }
                        let pages =
                            pagination::page_count(self.total, self.state.per_page);
                        self.state.page = pagination::clamp_page(self.state.page, pages);
                        enqueue_missing(&mut self.image_queue, &self.results);
                    }
                    Err(err) => self.note_error(err),
                }
            }
            Response::Follows { request_id, result } => {
                let Some(pending) = self.pending_follows.as_ref() else {
                    return;
                };
                if pending.request_id != request_id
                    || pending.cancel_flag.load(Ordering::SeqCst)
                {
                    return;
                }
                self.pending_follows = None;
                self.loading = false;
                match result {
                    Ok(response) => {
                        self.last_error = None;
                        self.follows.threads = dedupe_by_id(response.threads);
                        self.follows.total = response.total;
                        self.follows.fetched = true;
                        self.apply_follows_filter();
                        enqueue_missing(&mut self.image_queue, &self.follows.threads);
                    }
                    Err(err) => self.note_error(err),
                }
            }
            Response::Unfollow { thread_id, result } => {
                if let Err(err) = result {
                    // the optimistic removal was wrong; force a refetch
                    self.follows.fetched = false;
                    if self.state.mode == ViewMode::Follows {
                        self.dispatch_follows();
                    }
                    self.last_error =
                        Some(format!("unfollow {thread_id} failed: {err}"));
                }
            }
            Response::Images { result } => {
                let Some(batch) = self.in_flight_images.take() else {
                    return;
                };
                let now = Instant::now();
                let updates = match &result {
                    Ok(response) => self.image_queue.complete_flush(batch, Ok(response), now),
                    Err(_) => self.image_queue.complete_flush(batch, Err(()), now),
                };
                for update in &updates {
                    if let SlotUpdate::Recovered { thread_id, url, .. } = update {
                        let (thread_id, url) = (thread_id.clone(), url.clone());
                        self.apply_recovered_url(&thread_id, &url);
                    }
                }
                self.image_updates.extend(updates);
            }
            Response::Auth { result } => match result {
                Ok(status) => {
                    self.authed = Some(status.logged_in);
                    self.user = status.user;
                    self.unread_count = status.unread_count;
                }
                Err(ApiError::Unauthorized) => {
                    self.authed = Some(false);
                    self.user = None;
                }
                Err(err) => self.last_error = Some(err.to_string()),
            },
            Response::Unread { result } => {
                if let Ok(count) = result {
                    self.unread_count = count;
                }
            }
            Response::MarkViewed { result } => match result {
                // the local zero was optimistic; pull the real count now
                // that the server has acknowledged the visit
                Ok(()) => self.refresh_unread(),
                Err(err) => {
                    self.last_error = Some(format!("mark viewed failed: {err}"));
                }
            },
        }
    }

    /// Auth failures flip the session flag; transport and server errors
    /// keep the previous results on screen with a status note.
    fn note_error(&mut self, err: ApiError) {
        match err {
            ApiError::Unauthorized => {
                self.authed = Some(false);
                self.last_error = Some("session expired, please log in again".to_string());
            }
            other => self.last_error = Some(other.to_string()),
        }
    }
}

/// Threads that arrived without a usable thumbnail go on the recovery
/// queue; the server can often mint a fresh CDN URL for them. Slot ids
/// are list positions so the renderer knows which cards to repaint.
fn enqueue_missing(queue: &mut ImageRecoveryQueue, threads: &[ThreadSummary]) {
    let now = Instant::now();
    for (slot, thread) in threads.iter().enumerate() {
        if thread.thumbnail_url.is_none() {
            queue.enqueue(
                &thread.thread_id,
                thread.channel_id.as_deref(),
                slot as SlotId,
                now,
            );
        }
    }
}

fn dedupe_by_id(threads: Vec<ThreadSummary>) -> Vec<ThreadSummary> {
    let mut seen = std::collections::HashSet::new();
    threads
        .into_iter()
        .filter(|t| seen.insert(t.thread_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, Author};
    use crate::data::{MockAuthService, MockImageService};
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn thread_with(id: &str, tags: &[&str]) -> ThreadSummary {
        let now = Utc::now();
        ThreadSummary {
            thread_id: id.to_string(),
            channel_id: None,
            title: format!("thread {id}"),
            author: Author::default(),
            author_id: None,
            created_at: now - ChronoDuration::days(1),
            last_active_at: now,
            latest_update_at: None,
            reply_count: 0,
            reaction_count: 0,
            first_message_excerpt: String::new(),
            thumbnail_url: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            has_update: false,
            latest_update_link: None,
        }
    }

    /// Search service that answers from a scripted queue, recording each
    /// request it sees.
    struct ScriptedSearch {
        responses: Mutex<Vec<ApiResult<SearchResponse>>>,
        requests: Mutex<Vec<SearchRequest>>,
    }

    impl ScriptedSearch {
        fn new(responses: Vec<ApiResult<SearchResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl SearchService for ScriptedSearch {
        fn search(&self, req: &SearchRequest) -> ApiResult<SearchResponse> {
            self.requests.lock().push(req.clone());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(SearchResponse::default())
            } else {
                responses.remove(0)
            }
        }
    }

    struct ScriptedFollows {
        threads: Vec<ThreadSummary>,
        unread: i64,
        unfollowed: Mutex<Vec<String>>,
    }

    impl ScriptedFollows {
        fn with_threads(threads: Vec<ThreadSummary>) -> Arc<Self> {
            Arc::new(Self {
                threads,
                unread: 0,
                unfollowed: Mutex::new(Vec::new()),
            })
        }
    }

    impl FollowsService for ScriptedFollows {
        fn follows(&self, _limit: usize, _offset: usize) -> ApiResult<FollowsResponse> {
            Ok(FollowsResponse {
                threads: self.threads.clone(),
                total: self.threads.len(),
            })
        }

        fn unfollow(&self, thread_id: &str) -> ApiResult<()> {
            self.unfollowed.lock().push(thread_id.to_string());
            Ok(())
        }

        fn mark_viewed(&self) -> ApiResult<()> {
            Ok(())
        }

        fn unread_count(&self) -> ApiResult<i64> {
            Ok(self.unread)
        }
    }

    fn controller_with(
        search: Arc<dyn SearchService>,
        follows: Arc<dyn FollowsService>,
    ) -> Controller {
        Controller::new(
            Services {
                search,
                follows,
                images: Arc::new(MockImageService),
                auth: Arc::new(MockAuthService),
            },
            Options::default(),
        )
    }

    fn pump_until_settled(c: &mut Controller) {
        for _ in 0..50 {
            thread::sleep(Duration::from_millis(10));
            c.pump();
            if c.pending_search.is_none() && c.pending_follows.is_none() {
                return;
            }
        }
        panic!("controller never settled");
    }

    #[test]
    fn search_results_land_with_totals() {
        let search = ScriptedSearch::new(vec![Ok(SearchResponse {
            results: vec![thread_with("a", &[]), thread_with("b", &[])],
            total: 40,
            available_tags: vec!["guide".into()],
            banner_carousel: Vec::new(),
            unread_count: Some(3),
        })]);
        let follows = ScriptedFollows::with_threads(Vec::new());
        let mut c = controller_with(search.clone(), follows);

        c.refresh();
        pump_until_settled(&mut c);

        assert_eq!(c.visible_threads().len(), 2);
        assert_eq!(c.total_for_mode(), 40);
        assert_eq!(c.available_tags(), &["guide".to_string()]);
        assert_eq!(c.unread_count, 3);
        assert!(c.last_error.is_none());
    }

    #[test]
    fn stale_search_response_is_dropped() {
        // Scripted service answers instantly, so responses for both
        // requests arrive; only the newest request id may apply.
        let search = ScriptedSearch::new(vec![
            Ok(SearchResponse {
                results: vec![thread_with("old", &[])],
                total: 1,
                ..Default::default()
            }),
            Ok(SearchResponse {
                results: vec![thread_with("new", &[])],
                total: 1,
                ..Default::default()
            }),
        ]);
        let follows = ScriptedFollows::with_threads(Vec::new());
        let mut c = controller_with(search.clone(), follows);

        c.set_query("first".into());
        c.set_query("second".into());
        pump_until_settled(&mut c);

        // whichever scripted body answered the second request is the one
        // kept; the superseded request must not overwrite it afterwards
        let kept: Vec<String> = c
            .visible_threads()
            .iter()
            .map(|t| t.thread_id.clone())
            .collect();
        c.pump();
        let after: Vec<String> = c
            .visible_threads()
            .iter()
            .map(|t| t.thread_id.clone())
            .collect();
        assert_eq!(kept, after);
        assert!(!search.requests.lock().is_empty());
    }

    #[test]
    fn transport_error_keeps_previous_results() {
        let search = ScriptedSearch::new(vec![
            Ok(SearchResponse {
                results: vec![thread_with("held", &[])],
                total: 1,
                ..Default::default()
            }),
            Err(ApiError::Status {
                status: 500,
                body: "boom".into(),
            }),
        ]);
        let follows = ScriptedFollows::with_threads(Vec::new());
        let mut c = controller_with(search.clone(), follows);

        c.refresh();
        pump_until_settled(&mut c);
        c.set_query("again".into());
        pump_until_settled(&mut c);

        assert_eq!(c.visible_threads()[0].thread_id, "held");
        assert!(c.last_error.is_some());
    }

    #[test]
    fn unauthorized_flips_auth_but_keeps_results() {
        let search = ScriptedSearch::new(vec![
            Ok(SearchResponse {
                results: vec![thread_with("held", &[])],
                total: 1,
                ..Default::default()
            }),
            Err(ApiError::Unauthorized),
        ]);
        let follows = ScriptedFollows::with_threads(Vec::new());
        let mut c = controller_with(search.clone(), follows);

        c.refresh();
        pump_until_settled(&mut c);
        c.set_query("expired".into());
        pump_until_settled(&mut c);

        assert_eq!(c.authed, Some(false));
        assert_eq!(c.visible_threads()[0].thread_id, "held");
    }

    #[test]
    fn follows_fetch_is_coalesced_and_filtered_locally() {
        let search = ScriptedSearch::new(Vec::new());
        let follows = ScriptedFollows::with_threads(vec![
            thread_with("f1", &["rust", "help"]),
            thread_with("f2", &["rust"]),
            thread_with("f3", &["python"]),
        ]);
        let mut c = controller_with(search, follows);

        c.switch_mode(ViewMode::Follows);
        pump_until_settled(&mut c);
        assert_eq!(c.total_for_mode(), 3);

        c.toggle_tag("rust");
        assert_eq!(c.total_for_mode(), 2);

        // narrowing requires every included tag, not any
        c.toggle_tag("help");
        let ids: Vec<&str> = c
            .visible_threads()
            .iter()
            .map(|t| t.thread_id.as_str())
            .collect();
        assert_eq!(ids, vec!["f1"]);
    }

    #[test]
    fn leaving_follows_clears_its_query_and_tags() {
        let search = ScriptedSearch::new(Vec::new());
        let follows = ScriptedFollows::with_threads(vec![thread_with("f1", &["rust"])]);
        let mut c = controller_with(search, follows);

        c.switch_mode(ViewMode::Follows);
        pump_until_settled(&mut c);
        c.set_query("local".into());
        c.toggle_tag("rust");

        c.switch_mode(ViewMode::Search);
        pump_until_settled(&mut c);
        assert!(c.state.follows_query.is_empty());
        assert!(c.state.follows_tag_states.is_empty());
        assert_eq!(c.state.follows_page, 1);
    }

    #[test]
    fn unfollow_removes_row_immediately() {
        let search = ScriptedSearch::new(Vec::new());
        let follows =
            ScriptedFollows::with_threads(vec![thread_with("f1", &[]), thread_with("f2", &[])]);
        let mut c = controller_with(search, follows.clone());

        c.switch_mode(ViewMode::Follows);
        pump_until_settled(&mut c);
        c.unfollow("f1".to_string());

        let ids: Vec<&str> = c
            .visible_threads()
            .iter()
            .map(|t| t.thread_id.as_str())
            .collect();
        assert_eq!(ids, vec!["f2"]);

        // worker reported success asynchronously
        for _ in 0..50 {
            thread::sleep(Duration::from_millis(10));
            c.pump();
            if !follows.unfollowed.lock().is_empty() {
                break;
            }
        }
        assert_eq!(follows.unfollowed.lock().as_slice(), &["f1".to_string()]);
    }

    #[test]
    fn entering_follows_clears_unread_badge() {
        let search = ScriptedSearch::new(Vec::new());
        let follows = ScriptedFollows::with_threads(Vec::new());
        let mut c = controller_with(search, follows);
        c.unread_count = 7;

        c.switch_mode(ViewMode::Follows);
        assert_eq!(c.unread_count, 0);
    }

    #[test]
    fn mark_viewed_completion_pulls_server_unread_count() {
        let search = ScriptedSearch::new(Vec::new());
        let follows = Arc::new(ScriptedFollows {
            threads: Vec::new(),
            unread: 2,
            unfollowed: Mutex::new(Vec::new()),
        });
        let mut c = controller_with(search, follows);
        c.unread_count = 7;

        // the zero is optimistic; the server's number wins once the
        // mark-viewed round trip finishes
        c.switch_mode(ViewMode::Follows);
        assert_eq!(c.unread_count, 0);
        for _ in 0..50 {
            thread::sleep(Duration::from_millis(10));
            c.pump();
            if c.unread_count == 2 {
                break;
            }
        }
        assert_eq!(c.unread_count, 2);
    }

    #[test]
    fn logout_drops_account_data_and_pendings() {
        let search = ScriptedSearch::new(Vec::new());
        let follows = ScriptedFollows::with_threads(vec![thread_with("f1", &[])]);
        let mut c = controller_with(search, follows);

        c.switch_mode(ViewMode::Follows);
        pump_until_settled(&mut c);
        c.logged_out();

        assert_eq!(c.authed, Some(false));
        assert_eq!(c.state.mode, ViewMode::Search);
        assert!(c.filtered.is_empty());
        assert!(c.pending_search.is_none() && c.pending_follows.is_none());
    }

    #[test]
    fn search_request_reflects_state() {
        let search = ScriptedSearch::new(vec![Ok(SearchResponse::default())]);
        let follows = ScriptedFollows::with_threads(Vec::new());
        let mut c = controller_with(search.clone(), follows);

        c.state.query = "author:\"Jane Doe\" cats -dogs".to_string();
        c.state.page = 3;
        c.state.tag_states.insert("rust".into(), crate::state::TagState::Included);
        c.refresh();
        pump_until_settled(&mut c);

        let requests = search.requests.lock();
        let req = requests.last().unwrap();
        assert_eq!(req.offset, 2 * c.state.per_page);
        assert_eq!(req.include_tags, vec!["rust".to_string()]);
        let keywords = req.keywords.as_deref().unwrap();
        assert!(keywords.contains("author:\"Jane Doe\""));
        assert!(keywords.contains("cats"));
        assert!(keywords.contains("-dogs"));
    }

    #[test]
    fn restore_drops_unknown_channel() {
        let search = ScriptedSearch::new(Vec::new());
        let follows = ScriptedFollows::with_threads(Vec::new());
        let mut c = Controller::new(
            Services {
                search,
                follows,
                images: Arc::new(MockImageService),
                auth: Arc::new(MockAuthService),
            },
            Options {
                channels: vec![Channel {
                    id: "1".into(),
                    name: "general".into(),
                }],
                ..Options::default()
            },
        );

        let mut view = ViewState::default();
        view.channel_id = Some("999".into());
        c.restore(view);
        pump_until_settled(&mut c);
        assert!(c.state.channel_id.is_none());
    }
}

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::api::{ImageFetchItem, ImageFetchRequest, ImageFetchResponse};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);
/// One initial batch attempt plus exactly one retry.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Identifier for a rendered card awaiting a recovered thumbnail. Several
/// slots can show the same thread; they share one queue entry and one
/// network attempt.
pub type SlotId = u64;

#[derive(Debug, Clone, Default)]
struct Entry {
    channel_id: Option<String>,
    slots: HashSet<SlotId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scheduled { deadline: Instant },
    InFlight,
}

/// What a completed batch means for the cards that were waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotUpdate {
    Recovered {
        thread_id: String,
        url: String,
        slots: Vec<SlotId>,
    },
    GaveUp {
        thread_id: String,
        slots: Vec<SlotId>,
    },
}

/// A flush in progress: the entries that were drained into the request.
/// Handed back on completion so late additions made during the flight are
/// never confused with the batch that was sent.
#[derive(Debug)]
pub struct Batch {
    taken: HashMap<String, Entry>,
}

impl Batch {
    pub fn request(&self) -> ImageFetchRequest {
        let mut items: Vec<ImageFetchItem> = self
            .taken
            .iter()
            .map(|(thread_id, entry)| ImageFetchItem {
                thread_id: thread_id.clone(),
                channel_id: entry.channel_id.clone(),
            })
            .collect();
        items.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        ImageFetchRequest { items }
    }
}

/// Collects broken-thumbnail reports, coalesces bursts behind a debounce
/// timer, and keeps at most one batch request in flight. Ids that the
/// server declines or that fail twice are parked permanently for the rest
/// of the session.
pub struct ImageRecoveryQueue {
    pending: HashMap<String, Entry>,
    attempts: HashMap<String, u32>,
    blocked: HashSet<String>,
    phase: Phase,
    debounce: Duration,
    max_attempts: u32,
}

impl ImageRecoveryQueue {
    pub fn new(debounce: Duration, max_attempts: u32) -> Self {
        ImageRecoveryQueue {
            pending: HashMap::new(),
            attempts: HashMap::new(),
            blocked: HashSet::new(),
            phase: Phase::Idle,
            debounce,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Report a failed thumbnail load. Merges with any pending entry for
    /// the same thread; arms the debounce timer only from idle, so a burst
    /// shares one deadline and an in-flight flush is never duplicated.
    /// Returns false when the id has been given up on.
    pub fn enqueue(
        &mut self,
        thread_id: &str,
        channel_id: Option<&str>,
        slot: SlotId,
        now: Instant,
    ) -> bool {
        if self.blocked.contains(thread_id) {
            return false;
        }
        let entry = self.pending.entry(thread_id.to_string()).or_default();
        if entry.channel_id.is_none() {
            entry.channel_id = channel_id.map(String::from);
        }
        entry.slots.insert(slot);

        if self.phase == Phase::Idle {
            self.phase = Phase::Scheduled {
                deadline: now + self.debounce,
            };
        }
        true
    }

    pub fn flush_due(&self, now: Instant) -> bool {
        matches!(self.phase, Phase::Scheduled { deadline } if deadline <= now)
            && !self.pending.is_empty()
    }

    /// Drain the pending set into a batch. Returns None when nothing is
    /// due or a flush is already in flight (the timer is then effectively
    /// deferred until that flush completes).
    pub fn begin_flush(&mut self, now: Instant) -> Option<Batch> {
        if !self.flush_due(now) {
            if matches!(self.phase, Phase::Scheduled { .. }) && self.pending.is_empty() {
                self.phase = Phase::Idle;
            }
            return None;
        }
        let taken = std::mem::take(&mut self.pending);
        self.phase = Phase::InFlight;
        Some(Batch { taken })
    }

    /// Apply a finished batch. `outcome` is Err for transport failures and
    /// malformed bodies, which are a retry for every id in the batch;
    /// per-id failures inside an Ok response are terminal. Failures
    /// accumulated during the flight re-arm the timer; an empty queue does
    /// not (no idle polling).
    pub fn complete_flush(
        &mut self,
        batch: Batch,
        outcome: Result<&ImageFetchResponse, ()>,
        now: Instant,
    ) -> Vec<SlotUpdate> {
        let mut updates = Vec::new();

        match outcome {
            Ok(response) => {
                let mut by_id: HashMap<&str, &crate::api::ImageFetchResult> = HashMap::new();
                for result in &response.results {
                    by_id.insert(result.thread_id.as_str(), result);
                }

                let mut ids: Vec<(String, Entry)> = batch.taken.into_iter().collect();
                ids.sort_by(|a, b| a.0.cmp(&b.0));
                for (thread_id, entry) in ids {
                    let slots: Vec<SlotId> = entry.slots.iter().copied().collect();
                    let url = by_id
                        .get(thread_id.as_str())
                        .filter(|result| result.updated)
                        .and_then(|result| result.url());
                    match url {
                        Some(url) => {
                            self.attempts.remove(&thread_id);
                            updates.push(SlotUpdate::Recovered {
                                url: url.to_string(),
                                thread_id,
                                slots,
                            });
                        }
                        // Present but declined, or absent entirely: the
                        // server has nothing for this thread. Park it.
                        None => {
                            self.give_up(&thread_id);
                            updates.push(SlotUpdate::GaveUp { thread_id, slots });
                        }
                    }
                }
            }
            Err(()) => {
                for (thread_id, entry) in batch.taken {
                    let attempts = self.attempts.entry(thread_id.clone()).or_insert(0);
                    *attempts += 1;
                    if *attempts >= self.max_attempts {
                        let slots: Vec<SlotId> = entry.slots.iter().copied().collect();
                        self.give_up(&thread_id);
                        updates.push(SlotUpdate::GaveUp { thread_id, slots });
                    } else {
                        // Back into the queue for exactly one more try,
                        // keeping any slots added while we were in flight.
                        let merged = self.pending.entry(thread_id).or_default();
                        if merged.channel_id.is_none() {
                            merged.channel_id = entry.channel_id;
                        }
                        merged.slots.extend(entry.slots);
                    }
                }
            }
        }

        self.phase = if self.pending.is_empty() {
            Phase::Idle
        } else {
            Phase::Scheduled {
                deadline: now + self.debounce,
            }
        };

        updates
    }

    fn give_up(&mut self, thread_id: &str) {
        self.attempts.remove(thread_id);
        self.pending.remove(thread_id);
        self.blocked.insert(thread_id.to_string());
    }

    /// Teardown on logout/quit: nothing pending survives the session.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.attempts.clear();
        self.phase = Phase::Idle;
    }

    #[cfg(test)]
    fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Recovered URLs get a timestamp query parameter so a previously cached
/// broken response is not served again.
pub fn cache_busted(url: &str, ts: i64) -> String {
    if url.contains('?') {
        format!("{url}&_ts={ts}")
    } else {
        format!("{url}?_ts={ts}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ImageFetchResult;

    fn queue() -> (ImageRecoveryQueue, Instant) {
        (
            ImageRecoveryQueue::new(Duration::from_secs(5), DEFAULT_MAX_ATTEMPTS),
            Instant::now(),
        )
    }

    fn due(now: Instant) -> Instant {
        now + Duration::from_secs(6)
    }

    fn recovered(id: &str, url: &str) -> ImageFetchResult {
        ImageFetchResult {
            thread_id: id.to_string(),
            thumbnail_url: Some(url.to_string()),
            thumbnail_urls: None,
            updated: true,
            error: None,
        }
    }

    fn response(results: Vec<ImageFetchResult>) -> ImageFetchResponse {
        ImageFetchResponse { results }
    }

    #[test]
    fn duplicate_ids_share_one_request_and_both_slots_update() {
        let (mut q, now) = queue();
        assert!(q.enqueue("t1", Some("c1"), 1, now));
        assert!(q.enqueue("t1", Some("c1"), 2, now));

        let batch = q.begin_flush(due(now)).expect("flush due");
        let request = batch.request();
        assert_eq!(request.items.len(), 1);
        assert_eq!(request.items[0].thread_id, "t1");

        let resp = response(vec![recovered("t1", "https://cdn/x.png")]);
        let updates = q.complete_flush(batch, Ok(&resp), due(now));
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            SlotUpdate::Recovered { slots, url, .. } => {
                let mut slots = slots.clone();
                slots.sort();
                assert_eq!(slots, vec![1, 2]);
                assert_eq!(url, "https://cdn/x.png");
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn not_due_before_debounce_elapses() {
        let (mut q, now) = queue();
        q.enqueue("t1", None, 1, now);
        assert!(!q.flush_due(now + Duration::from_secs(4)));
        assert!(q.begin_flush(now + Duration::from_secs(4)).is_none());
        assert!(q.flush_due(due(now)));
    }

    #[test]
    fn later_failures_do_not_extend_the_deadline() {
        let (mut q, now) = queue();
        q.enqueue("t1", None, 1, now);
        q.enqueue("t2", None, 2, now + Duration::from_secs(4));
        // deadline still keyed to the first enqueue
        assert!(q.flush_due(now + Duration::from_secs(5)));
        let batch = q.begin_flush(now + Duration::from_secs(5)).unwrap();
        assert_eq!(batch.request().items.len(), 2);
    }

    #[test]
    fn only_one_batch_in_flight() {
        let (mut q, now) = queue();
        q.enqueue("t1", None, 1, now);
        let batch = q.begin_flush(due(now)).unwrap();

        // failures during the flight accumulate but never start a second
        // batch
        q.enqueue("t2", None, 2, due(now));
        assert!(q.begin_flush(due(due(now))).is_none());

        let resp = response(vec![recovered("t1", "u")]);
        q.complete_flush(batch, Ok(&resp), due(now));
        // now the deferred work is rescheduled
        assert_eq!(q.pending_ids(), vec!["t2"]);
        assert!(q.flush_due(due(due(now))));
    }

    #[test]
    fn empty_queue_goes_idle_after_flush() {
        let (mut q, now) = queue();
        q.enqueue("t1", None, 1, now);
        let batch = q.begin_flush(due(now)).unwrap();
        let resp = response(vec![recovered("t1", "u")]);
        q.complete_flush(batch, Ok(&resp), due(now));
        assert_eq!(q.phase, Phase::Idle);
    }

    #[test]
    fn batch_failure_retries_once_then_gives_up() {
        let (mut q, now) = queue();
        q.enqueue("t1", None, 1, now);

        let batch = q.begin_flush(due(now)).unwrap();
        let updates = q.complete_flush(batch, Err(()), due(now));
        assert!(updates.is_empty());
        assert_eq!(q.pending_ids(), vec!["t1"]);

        let later = due(due(now));
        let batch = q.begin_flush(later).unwrap();
        assert_eq!(batch.request().items.len(), 1);
        let updates = q.complete_flush(batch, Err(()), later);
        assert!(matches!(updates[0], SlotUpdate::GaveUp { .. }));

        // a third attempt never happens, even if the image errors again
        assert!(!q.enqueue("t1", None, 5, later));
        assert!(q.begin_flush(due(later)).is_none());
    }

    #[test]
    fn declined_and_absent_ids_are_terminal() {
        let (mut q, now) = queue();
        q.enqueue("declined", None, 1, now);
        q.enqueue("absent", None, 2, now);

        let batch = q.begin_flush(due(now)).unwrap();
        let resp = response(vec![ImageFetchResult {
            thread_id: "declined".to_string(),
            thumbnail_url: None,
            thumbnail_urls: None,
            updated: false,
            error: Some("gone".to_string()),
        }]);
        let updates = q.complete_flush(batch, Ok(&resp), due(now));
        assert_eq!(updates.len(), 2);
        assert!(updates
            .iter()
            .all(|u| matches!(u, SlotUpdate::GaveUp { .. })));
        assert!(!q.enqueue("declined", None, 3, due(now)));
        assert!(!q.enqueue("absent", None, 4, due(now)));
    }

    #[test]
    fn partial_batch_success_is_per_id() {
        let (mut q, now) = queue();
        q.enqueue("good", None, 1, now);
        q.enqueue("bad", None, 2, now);

        let batch = q.begin_flush(due(now)).unwrap();
        let resp = response(vec![recovered("good", "u")]);
        let updates = q.complete_flush(batch, Ok(&resp), due(now));

        let mut kinds: Vec<&str> = updates
            .iter()
            .map(|u| match u {
                SlotUpdate::Recovered { .. } => "recovered",
                SlotUpdate::GaveUp { .. } => "gave_up",
            })
            .collect();
        kinds.sort();
        assert_eq!(kinds, vec!["gave_up", "recovered"]);
    }

    #[test]
    fn cache_bust_appends_with_correct_separator() {
        assert_eq!(cache_busted("https://x/a.png", 7), "https://x/a.png?_ts=7");
        assert_eq!(
            cache_busted("https://x/a.png?w=1", 7),
            "https://x/a.png?w=1&_ts=7"
        );
    }
}

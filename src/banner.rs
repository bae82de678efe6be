use std::time::{Duration, Instant};

use crate::api::Banner;

pub const AUTOPLAY_INTERVAL: Duration = Duration::from_secs(5);

/// Rotates through the promoted-thread banners that ride along on search
/// responses. Survives list refreshes without jumping: if the banner the
/// user is looking at is still present in the new list, it stays current.
#[derive(Debug, Default)]
pub struct BannerRotation {
    banners: Vec<Banner>,
    index: usize,
    next_advance: Option<Instant>,
}

impl BannerRotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the banner list. The current banner is re-located by
    /// thread id; only when it has disappeared does the rotation snap
    /// back to the front.
    pub fn set_banners(&mut self, banners: Vec<Banner>, now: Instant) {
        let current_id = self.current().map(|b| b.thread_id.clone());
        self.banners = banners;
        self.index = current_id
            .and_then(|id| self.banners.iter().position(|b| b.thread_id == id))
            .unwrap_or(0);
        self.next_advance = if self.banners.len() > 1 {
            Some(now + AUTOPLAY_INTERVAL)
        } else {
            None
        };
    }

    pub fn current(&self) -> Option<&Banner> {
        self.banners.get(self.index)
    }

    pub fn is_empty(&self) -> bool {
        self.banners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.banners.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Manual advance. Resets the autoplay clock so the user-selected
    /// banner gets its full dwell time.
    pub fn next(&mut self, now: Instant) {
        self.step(1, now);
    }

    pub fn prev(&mut self, now: Instant) {
        self.step(self.banners.len().saturating_sub(1), now);
    }

    fn step(&mut self, by: usize, now: Instant) {
        if self.banners.len() > 1 {
            self.index = (self.index + by) % self.banners.len();
            self.next_advance = Some(now + AUTOPLAY_INTERVAL);
        }
    }

    /// Autoplay. Returns true when the rotation moved.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.next_advance {
            Some(deadline) if deadline <= now && self.banners.len() > 1 => {
                self.index = (self.index + 1) % self.banners.len();
                self.next_advance = Some(now + AUTOPLAY_INTERVAL);
                true
            }
            _ => false,
        }
    }
}

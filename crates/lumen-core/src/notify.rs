//! Time-bounded ring of phone notifications.
//!
//! Payloads are whatever the hardware forwards; they are never interpreted,
//! only stringified when included in an agent prompt.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Maximum notifications retained.
pub const NOTIFICATION_CAP: usize = 20;

/// Only notifications younger than this are exposed.
pub const NOTIFICATION_MAX_AGE: Duration = Duration::from_secs(5 * 60);

struct StoredNotification {
    payload: serde_json::Value,
    received_at: Instant,
}

pub struct NotificationStore {
    cap: usize,
    max_age: Duration,
    items: Mutex<VecDeque<StoredNotification>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self {
            cap: NOTIFICATION_CAP,
            max_age: NOTIFICATION_MAX_AGE,
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, payload: serde_json::Value) {
        let mut items = self.items.lock().expect("notification lock");
        if items.len() >= self.cap {
            items.pop_front();
        }
        items.push_back(StoredNotification {
            payload,
            received_at: Instant::now(),
        });
    }

    /// The most recent `limit` notifications still inside the freshness
    /// window, newest first.
    pub fn recent(&self, limit: usize) -> Vec<serde_json::Value> {
        let items = self.items.lock().expect("notification lock");
        let now = Instant::now();
        items
            .iter()
            .rev()
            .filter(|n| now.duration_since(n.received_at) < self.max_age)
            .take(limit)
            .map(|n| n.payload.clone())
            .collect()
    }

    /// Prompt-ready rendering of `recent(limit)`, one notification per line.
    /// `None` when nothing fresh is available.
    pub fn formatted(&self, limit: usize) -> Option<String> {
        let recent = self.recent(limit);
        if recent.is_empty() {
            return None;
        }
        Some(
            recent
                .iter()
                .map(|payload| format!("- {payload}"))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    pub fn clear(&self) {
        self.items.lock().expect("notification lock").clear();
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

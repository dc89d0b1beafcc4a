//! Bounded per-user photo retention.
//!
//! Captures are kept in two small structures: a newest-first recents list
//! that feeds the agent's visual context, and a slightly larger lookup list
//! for request-id retrieval by the HTTP surface. Photo events on the bus
//! carry metadata only; bytes are fetched on demand through the photo
//! endpoints.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;

use lumen_common::events::{PhotoEvent, Topic};
use lumen_common::id::{new_request_id, UserId};

use crate::bus::EventBus;
use crate::hardware::{with_deadline, SharedHardware};

/// Photos kept for agent context.
pub const RECENT_PHOTOS: usize = 3;

/// Photos retrievable by request id.
pub const LOOKUP_CAP: usize = 8;

#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub request_id: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
    pub size: usize,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
}

#[derive(Default)]
struct Inner {
    recents: VecDeque<Arc<StoredPhoto>>,
    lookup: VecDeque<Arc<StoredPhoto>>,
}

pub struct PhotoStore {
    user_id: UserId,
    bus: Arc<EventBus>,
    recents_cap: usize,
    lookup_cap: usize,
    inner: Mutex<Inner>,
}

impl PhotoStore {
    pub fn new(user_id: UserId, bus: Arc<EventBus>) -> Self {
        Self {
            user_id,
            bus,
            recents_cap: RECENT_PHOTOS,
            lookup_cap: LOOKUP_CAP,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Capture one photo through the hardware session, store it, and publish
    /// its metadata on the photo topic.
    pub async fn capture(&self, hardware: &SharedHardware) -> lumen_common::Result<Arc<StoredPhoto>> {
        let captured = with_deadline(hardware.capture_photo()).await?;
        let photo = Arc::new(StoredPhoto {
            request_id: new_request_id(),
            size: captured.bytes.len(),
            bytes: captured.bytes,
            mime_type: captured.mime_type,
            filename: captured.filename,
            timestamp: Utc::now(),
            user_id: self.user_id.clone(),
        });
        self.insert(Arc::clone(&photo));
        Ok(photo)
    }

    /// Rotate `photo` to the front of the recents list and index it for
    /// request-id lookup, trimming both to their caps.
    pub(crate) fn insert(&self, photo: Arc<StoredPhoto>) {
        {
            let mut inner = self.inner.lock().expect("photo store lock");
            inner.recents.push_front(Arc::clone(&photo));
            inner.recents.truncate(self.recents_cap);
            inner.lookup.push_back(Arc::clone(&photo));
            while inner.lookup.len() > self.lookup_cap {
                inner.lookup.pop_front();
            }
        }

        debug!(
            user_id = %self.user_id,
            request_id = %photo.request_id,
            size = photo.size,
            "Photo stored"
        );
        self.bus.broadcast(
            &self.user_id,
            Topic::Photo,
            &PhotoEvent::Photo {
                request_id: photo.request_id.clone(),
                mime_type: photo.mime_type.clone(),
                filename: photo.filename.clone(),
                size: photo.size,
                user_id: self.user_id.clone(),
                timestamp: photo.timestamp,
                data_url: None,
            },
        );
    }

    /// Bytes of the newest photo followed by up to `RECENT_PHOTOS - 1`
    /// previous captures, newest first.
    pub fn context_bytes(&self) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().expect("photo store lock");
        inner.recents.iter().map(|p| p.bytes.clone()).collect()
    }

    pub fn latest(&self) -> Option<Arc<StoredPhoto>> {
        let inner = self.inner.lock().expect("photo store lock");
        inner.recents.front().cloned()
    }

    /// Retrieve by capture request id while it is still indexed.
    pub fn lookup(&self, request_id: &str) -> Option<Arc<StoredPhoto>> {
        let inner = self.inner.lock().expect("photo store lock");
        inner.lookup.iter().find(|p| p.request_id == request_id).cloned()
    }
}

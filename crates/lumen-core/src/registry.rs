//! Process-wide user registry with grace-period removal.
//!
//! A hardware disconnect soft-removes the user: the session detaches but
//! stores, history, and pending events survive until a grace timer fires.
//! Reconnecting inside the window cancels the timer; the lifecycle
//! controller reads that cancellation as "this was a reconnect".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use lumen_agent::AgentClient;
use lumen_common::events::{ChatEvent, Topic};
use lumen_common::id::UserId;

use crate::bus::EventBus;
use crate::history::ChatArchive;
use crate::location::Geocoder;
use crate::user::{User, UserConfig};

/// How long per-user state survives a disconnect.
pub const GRACE_PERIOD: Duration = Duration::from_secs(60);

pub struct SessionRegistry {
    bus: Arc<EventBus>,
    agent: Arc<dyn AgentClient>,
    geocoder: Option<Arc<dyn Geocoder>>,
    archive: Option<Arc<dyn ChatArchive>>,
    user_config: UserConfig,
    users: Mutex<HashMap<UserId, Arc<User>>>,
    pending_removal: Mutex<HashMap<UserId, JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(
        bus: Arc<EventBus>,
        agent: Arc<dyn AgentClient>,
        geocoder: Option<Arc<dyn Geocoder>>,
        archive: Option<Arc<dyn ChatArchive>>,
        user_config: UserConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            agent,
            geocoder,
            archive,
            user_config,
            users: Mutex::new(HashMap::new()),
            pending_removal: Mutex::new(HashMap::new()),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn get(&self, user_id: &UserId) -> Option<Arc<User>> {
        self.users.lock().expect("registry lock").get(user_id).cloned()
    }

    pub fn get_or_create(&self, user_id: &UserId) -> Arc<User> {
        let mut users = self.users.lock().expect("registry lock");
        if let Some(user) = users.get(user_id) {
            return Arc::clone(user);
        }
        info!(user_id = %user_id, "Creating user");
        let user = User::new(
            user_id.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.agent),
            self.geocoder.clone(),
            self.archive.clone(),
            self.user_config.clone(),
        );
        users.insert(user_id.clone(), Arc::clone(&user));
        user
    }

    /// Immediate teardown: cancel any pending timer, destroy the user, drop
    /// the entry.
    pub fn remove(&self, user_id: &UserId) {
        if let Some(timer) = self
            .pending_removal
            .lock()
            .expect("removal lock")
            .remove(user_id)
        {
            timer.abort();
        }
        if let Some(user) = self.users.lock().expect("registry lock").remove(user_id) {
            user.teardown();
            info!(user_id = %user_id, "User removed");
        }
    }

    /// Detach the hardware session and schedule hard cleanup after `grace`.
    /// Repeated calls coalesce onto the newest timer; unknown users are a
    /// no-op.
    pub fn soft_remove(self: &Arc<Self>, user_id: &UserId, grace: Duration) {
        let Some(user) = self.get(user_id) else {
            debug!(user_id = %user_id, "Soft-remove for unknown user, ignoring");
            return;
        };
        user.clear_app_session();

        let mut pending = self.pending_removal.lock().expect("removal lock");
        if let Some(previous) = pending.remove(user_id) {
            previous.abort();
        }

        let registry = Arc::clone(self);
        let uid = user_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            info!(user_id = %uid, "Grace period expired, ending session");
            registry
                .pending_removal
                .lock()
                .expect("removal lock")
                .remove(&uid);
            // Live subscribers get the final event; the queued copy (if any)
            // dies with the pending queues.
            registry.bus.broadcast(
                &uid,
                Topic::Chat,
                &ChatEvent::session_ended("grace period expired"),
            );
            registry.bus.clear_pending(&uid, None);
            registry.remove(&uid);
        });
        pending.insert(user_id.clone(), timer);
        debug!(user_id = %user_id, grace_ms = grace.as_millis() as u64, "Soft-removal scheduled");
    }

    /// Cancel a pending removal. The return value is how the lifecycle
    /// controller detects a reconnect.
    pub fn cancel_removal(&self, user_id: &UserId) -> bool {
        match self
            .pending_removal
            .lock()
            .expect("removal lock")
            .remove(user_id)
        {
            Some(timer) => {
                timer.abort();
                debug!(user_id = %user_id, "Pending removal cancelled");
                true
            }
            None => false,
        }
    }

    pub fn users(&self) -> Vec<Arc<User>> {
        self.users
            .lock()
            .expect("registry lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().expect("registry lock").len()
    }

    pub fn pending_removal_count(&self) -> usize {
        self.pending_removal.lock().expect("removal lock").len()
    }
}

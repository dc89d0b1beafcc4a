//! Per-user aggregate: owns the stores, the accumulator, and the query
//! worker, and wires them to a hardware session.
//!
//! Queries run on a single owned worker task per user, so everything inside
//! one user is serialised without holding locks across awaits. The hardware
//! listener task is the only place device push events enter the core;
//! re-attaching a session always tears the previous wiring down first so an
//! ungraceful reconnect can never double-subscribe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lumen_agent::AgentClient;
use lumen_common::events::{Topic, TranscriptEvent};
use lumen_common::id::UserId;

use crate::accumulator::{TranscriptionAccumulator, DEFAULT_SILENCE_WINDOW};
use crate::bus::EventBus;
use crate::hardware::{HardwareEvent, SharedHardware};
use crate::history::{ChatArchive, ChatHistory};
use crate::location::{Geocoder, LocationManager};
use crate::notify::NotificationStore;
use crate::photo::PhotoStore;
use crate::wake::WakeWordMatcher;

/// Settings the core reacts to; everything else about user preferences
/// lives with the web layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub theme: String,
    pub chat_history_enabled: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            chat_history_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub theme: Option<String>,
    pub chat_history_enabled: Option<bool>,
}

/// Tunables for one user's query handling.
#[derive(Debug, Clone)]
pub struct UserConfig {
    pub silence_window: Duration,
    /// How long a response stays on the glasses display.
    pub display_hold: Duration,
    pub agent_deadline: Duration,
    /// Turns of history included in agent context.
    pub context_turns: usize,
    pub processing_sound: Option<String>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            silence_window: DEFAULT_SILENCE_WINDOW,
            display_hold: Duration::from_secs(10),
            agent_deadline: Duration::from_secs(30),
            context_turns: 10,
            processing_sound: None,
        }
    }
}

pub(crate) enum UserCommand {
    Query {
        text: String,
        speaker_id: Option<String>,
    },
}

pub struct User {
    id: UserId,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) agent: Arc<dyn AgentClient>,
    pub(crate) config: UserConfig,
    pub(crate) matcher: Arc<WakeWordMatcher>,
    pub(crate) accumulator: Arc<TranscriptionAccumulator>,
    pub(crate) photos: Arc<PhotoStore>,
    pub(crate) location: Arc<LocationManager>,
    pub(crate) notifications: Arc<NotificationStore>,
    pub(crate) history: Arc<ChatHistory>,
    hardware: Mutex<Option<SharedHardware>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    settings: Mutex<UserSettings>,
    initialized: AtomicBool,
}

impl User {
    pub fn new(
        id: UserId,
        bus: Arc<EventBus>,
        agent: Arc<dyn AgentClient>,
        geocoder: Option<Arc<dyn Geocoder>>,
        archive: Option<Arc<dyn ChatArchive>>,
        config: UserConfig,
    ) -> Arc<Self> {
        let matcher = Arc::new(WakeWordMatcher::default());
        // The accumulator's callback owns the only sender; the worker loop
        // therefore ends once the user (and its accumulator) is dropped.
        let (query_tx, worker_rx) = mpsc::channel::<UserCommand>(8);

        let query_user = id.clone();
        let accumulator = Arc::new(TranscriptionAccumulator::new(
            Arc::clone(&matcher),
            config.silence_window,
            Arc::new(move |text, speaker_id| {
                if query_tx
                    .try_send(UserCommand::Query { text, speaker_id })
                    .is_err()
                {
                    warn!(user_id = %query_user, "Query dropped: worker queue full");
                }
            }),
        ));

        let user = Arc::new(Self {
            photos: Arc::new(PhotoStore::new(id.clone(), Arc::clone(&bus))),
            location: Arc::new(LocationManager::new(Arc::clone(&matcher), geocoder)),
            notifications: Arc::new(NotificationStore::new()),
            history: Arc::new(ChatHistory::new(id.clone(), archive)),
            id,
            bus,
            agent,
            config,
            matcher,
            accumulator,
            hardware: Mutex::new(None),
            listener: Mutex::new(None),
            worker: Mutex::new(None),
            settings: Mutex::new(UserSettings::default()),
            initialized: AtomicBool::new(false),
        });

        // The worker holds only a weak handle; dropping the last strong
        // reference ends the loop.
        let weak = Arc::downgrade(&user);
        let handle = tokio::spawn(async move {
            let mut rx = worker_rx;
            while let Some(command) = rx.recv().await {
                let Some(user) = weak.upgrade() else { break };
                match command {
                    UserCommand::Query { text, speaker_id } => {
                        user.run_query(text, speaker_id).await;
                    }
                }
            }
        });
        *user.worker.lock().expect("worker lock") = Some(handle);

        user
    }

    pub fn id(&self) -> &UserId {
        &self.id
    }

    pub fn hardware(&self) -> Option<SharedHardware> {
        self.hardware.lock().expect("hardware lock").clone()
    }

    pub fn has_hardware(&self) -> bool {
        self.hardware.lock().expect("hardware lock").is_some()
    }

    pub fn photos(&self) -> &Arc<PhotoStore> {
        &self.photos
    }

    pub fn history(&self) -> &Arc<ChatHistory> {
        &self.history
    }

    pub fn settings(&self) -> UserSettings {
        self.settings.lock().expect("settings lock").clone()
    }

    pub fn apply_settings(&self, patch: SettingsPatch) -> UserSettings {
        let mut settings = self.settings.lock().expect("settings lock");
        if let Some(theme) = patch.theme {
            settings.theme = theme;
        }
        if let Some(enabled) = patch.chat_history_enabled {
            settings.chat_history_enabled = enabled;
            self.history.set_durable_enabled(enabled);
        }
        settings.clone()
    }

    /// One-time setup on a fresh (non-reconnect) session.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return;
        }
        let settings = self.settings();
        self.history
            .set_durable_enabled(settings.chat_history_enabled);
        info!(user_id = %self.id, "User initialized");
    }

    /// Attach a hardware session, replacing any existing attachment.
    pub fn set_app_session(self: &Arc<Self>, session: SharedHardware) {
        if self.has_hardware() {
            debug!(user_id = %self.id, "Replacing existing hardware session");
            self.clear_app_session();
        }

        let events = session.subscribe();
        *self.hardware.lock().expect("hardware lock") = Some(session);
        self.accumulator.reset_for_attach();

        let handle = tokio::spawn(listen_hardware(
            self.id.clone(),
            events,
            Arc::clone(&self.bus),
            Arc::clone(&self.accumulator),
            Arc::clone(&self.location),
            Arc::clone(&self.notifications),
            Arc::clone(&self.history),
        ));
        *self.listener.lock().expect("listener lock") = Some(handle);
    }

    /// Detach from the hardware session: stop the listener, silence the
    /// accumulator, drop the handle. Stores and history are untouched so a
    /// reconnect within the grace period resumes seamlessly.
    pub fn clear_app_session(&self) {
        if let Some(listener) = self.listener.lock().expect("listener lock").take() {
            listener.abort();
        }
        self.accumulator.destroy();
        *self.hardware.lock().expect("hardware lock") = None;
    }

    /// Hard teardown on removal from the registry.
    pub fn teardown(&self) {
        self.clear_app_session();
        if let Some(worker) = self.worker.lock().expect("worker lock").take() {
            worker.abort();
        }
        debug!(user_id = %self.id, "User torn down");
    }
}

/// Translate device push events into component updates until the stream
/// closes or the listener is aborted.
async fn listen_hardware(
    user_id: UserId,
    mut events: broadcast::Receiver<HardwareEvent>,
    bus: Arc<EventBus>,
    accumulator: Arc<TranscriptionAccumulator>,
    location: Arc<LocationManager>,
    notifications: Arc<NotificationStore>,
    history: Arc<ChatHistory>,
) {
    loop {
        match events.recv().await {
            Ok(HardwareEvent::Transcription(event)) => {
                bus.broadcast(
                    &user_id,
                    Topic::Transcription,
                    &TranscriptEvent::transcription(event.text.as_str(), event.is_final),
                );
                accumulator.handle_event(&event);
            }
            Ok(HardwareEvent::Location(coords)) => location.update_coordinates(coords),
            Ok(HardwareEvent::Notification(payload)) => notifications.push(payload),
            Ok(HardwareEvent::SettingChanged { key, value }) => match key.as_str() {
                "timezone" => {
                    if let Some(name) = value.as_str() {
                        location.set_timezone(name);
                    }
                }
                "chat_history_enabled" => {
                    if let Some(enabled) = value.as_bool() {
                        history.set_durable_enabled(enabled);
                    }
                }
                _ => debug!(user_id = %user_id, key = %key, "Ignoring setting change"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(user_id = %user_id, skipped, "Hardware event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

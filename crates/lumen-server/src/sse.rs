//! Server-sent-event stream endpoints, one per topic.
//!
//! Open protocol on the chat stream: `connected`, then either the pending
//! queue flush or a `history` replay (never both, since a flushed queue *is*
//! the replay of the in-flight turn), then an immediate `session_heartbeat`
//! so clients learn liveness without waiting for the first periodic tick.
//! Transcription and photo streams skip the history step.
//!
//! Buffering anywhere between us and the browser defeats the stream, so
//! every response carries `Cache-Control: no-cache, no-transform` and
//! `X-Accel-Buffering: no`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use lumen_common::events::{ChatEvent, PhotoEvent, Topic, TranscriptEvent};
use lumen_common::id::{new_id, UserId};
use lumen_core::bus::SUBSCRIBER_BUFFER;
use lumen_core::{EventBus, Subscriber};

use crate::state::SharedState;

/// Periodic liveness tick on every stream.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    user_id: String,
    recipient_id: Option<String>,
}

struct OpenStream {
    subscriber_id: String,
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
}

/// Steps 1–5 of the chat open protocol; everything before the periodic
/// heartbeat is pushed into the subscriber channel here.
fn open_chat(state: &SharedState, user_id: &UserId, recipient: &str) -> OpenStream {
    let subscriber_id = new_id();
    let (tx, rx) = mpsc::channel::<String>(SUBSCRIBER_BUFFER);

    // `connected` goes first, ahead of any queue flush below.
    push_json(&tx, &ChatEvent::connected());

    let history = state
        .registry
        .get(user_id)
        .map(|user| user.history().replay_messages(recipient));

    let flushed = state.registry.bus().subscribe(
        user_id,
        Topic::Chat,
        Subscriber::new(subscriber_id.clone(), tx.clone()),
    );

    // A flushed queue already replayed the in-flight turn; sending history
    // on top would duplicate it.
    if !flushed {
        if let Some(messages) = history {
            push_json(&tx, &ChatEvent::history(messages));
        }
    }

    push_json(&tx, &ChatEvent::session_heartbeat(session_active(state, user_id)));

    debug!(user_id = %user_id, subscriber = %subscriber_id, flushed, "Chat stream opened");
    OpenStream {
        subscriber_id,
        tx,
        rx,
    }
}

/// Open protocol for the history-less topics.
fn open_plain(state: &SharedState, user_id: &UserId, topic: Topic) -> OpenStream {
    let subscriber_id = new_id();
    let (tx, rx) = mpsc::channel::<String>(SUBSCRIBER_BUFFER);

    match topic {
        Topic::Transcription => push_json(&tx, &TranscriptEvent::connected()),
        Topic::Photo => push_json(&tx, &PhotoEvent::connected()),
        Topic::Chat => unreachable!("chat uses open_chat"),
    }

    state.registry.bus().subscribe(
        user_id,
        topic,
        Subscriber::new(subscriber_id.clone(), tx.clone()),
    );

    match topic {
        Topic::Transcription => push_json(&tx, &TranscriptEvent::heartbeat()),
        Topic::Photo => push_json(&tx, &PhotoEvent::heartbeat()),
        Topic::Chat => unreachable!("chat uses open_chat"),
    }

    debug!(user_id = %user_id, topic = %topic, subscriber = %subscriber_id, "Stream opened");
    OpenStream {
        subscriber_id,
        tx,
        rx,
    }
}

/// GET /api/chat/stream?userId&recipientId
pub async fn chat_stream(
    State(state): State<SharedState>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let user_id = UserId::from(params.user_id);
    let recipient = params.recipient_id.unwrap_or_else(|| "web".to_string());
    let open = open_chat(&state, &user_id, &recipient);
    stream_response(state, user_id, Topic::Chat, open)
}

/// GET /api/transcription-stream?userId
pub async fn transcription_stream(
    State(state): State<SharedState>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let user_id = UserId::from(params.user_id);
    let open = open_plain(&state, &user_id, Topic::Transcription);
    stream_response(state, user_id, Topic::Transcription, open)
}

/// GET /api/photo-stream?userId
pub async fn photo_stream(
    State(state): State<SharedState>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let user_id = UserId::from(params.user_id);
    let open = open_plain(&state, &user_id, Topic::Photo);
    stream_response(state, user_id, Topic::Photo, open)
}

fn session_active(state: &SharedState, user_id: &UserId) -> bool {
    state
        .registry
        .get(user_id)
        .map(|user| user.has_hardware())
        .unwrap_or(false)
}

fn push_json<E: serde::Serialize>(tx: &mpsc::Sender<String>, event: &E) {
    if let Ok(line) = serde_json::to_string(event) {
        let _ = tx.try_send(line);
    }
}

/// Deregisters the subscriber and stops the heartbeat when the client goes
/// away and the stream is dropped.
struct StreamCleanup {
    bus: Arc<EventBus>,
    user_id: UserId,
    topic: Topic,
    subscriber_id: String,
    heartbeat: JoinHandle<()>,
}

impl Drop for StreamCleanup {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.bus
            .unsubscribe(&self.user_id, self.topic, &self.subscriber_id);
        debug!(user_id = %self.user_id, topic = %self.topic, subscriber = %self.subscriber_id, "Stream closed");
    }
}

fn stream_response(
    state: SharedState,
    user_id: UserId,
    topic: Topic,
    open: OpenStream,
) -> impl IntoResponse {
    let heartbeat = tokio::spawn(heartbeat_loop(
        Arc::clone(&state),
        user_id.clone(),
        topic,
        open.tx,
    ));
    let cleanup = StreamCleanup {
        bus: Arc::clone(state.registry.bus()),
        user_id,
        topic,
        subscriber_id: open.subscriber_id,
        heartbeat,
    };

    let stream = ReceiverStream::new(open.rx).map(move |line| {
        // The cleanup guard lives (and dies) with this closure.
        let _cleanup = &cleanup;
        Ok::<Event, Infallible>(Event::default().data(line))
    });

    (
        [
            ("cache-control", "no-cache, no-transform"),
            ("x-accel-buffering", "no"),
        ],
        Sse::new(stream),
    )
}

async fn heartbeat_loop(
    state: SharedState,
    user_id: UserId,
    topic: Topic,
    tx: mpsc::Sender<String>,
) {
    let mut ticks = tokio::time::interval(HEARTBEAT_PERIOD);
    // The immediate heartbeat was already pushed at open.
    ticks.tick().await;
    loop {
        ticks.tick().await;
        let line = match topic {
            Topic::Chat => serde_json::to_string(&ChatEvent::session_heartbeat(
                session_active(&state, &user_id),
            )),
            Topic::Transcription => serde_json::to_string(&TranscriptEvent::heartbeat()),
            Topic::Photo => serde_json::to_string(&PhotoEvent::heartbeat()),
        };
        let Ok(line) = line else { return };
        if tx.send(line).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use lumen_agent::{AgentClient, AgentContext, AgentError, AgentReply};
    use lumen_common::errors::HardwareError;
    use lumen_common::types::{Capabilities, Coordinates, TranscriptionEvent};
    use lumen_core::hardware::{CapturedPhoto, HardwareEvent, HardwareSession};
    use lumen_core::{
        EventBus, LifecycleController, SessionRegistry, UserConfig, GRACE_PERIOD,
    };

    use crate::state::AppState;

    struct StubAgent {
        delay: Duration,
    }

    #[async_trait]
    impl AgentClient for StubAgent {
        async fn generate(
            &self,
            _query: &str,
            _photos: &[Vec<u8>],
            _context: &AgentContext,
        ) -> Result<AgentReply, AgentError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(AgentReply {
                response: "It's nine o'clock.".to_string(),
            })
        }
    }

    struct StubHardware {
        events: broadcast::Sender<HardwareEvent>,
    }

    impl StubHardware {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self { events })
        }

        fn say(&self, text: &str) {
            let _ = self
                .events
                .send(HardwareEvent::Transcription(TranscriptionEvent {
                    text: text.to_string(),
                    is_final: true,
                    utterance_id: Some("1".into()),
                    speaker_id: None,
                }));
        }
    }

    #[async_trait]
    impl HardwareSession for StubHardware {
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                has_camera: false,
                has_display: true,
                has_speaker: false,
                model_name: "Stub".into(),
            }
        }

        fn subscribe(&self) -> broadcast::Receiver<HardwareEvent> {
            self.events.subscribe()
        }

        async fn capture_photo(&self) -> Result<CapturedPhoto, HardwareError> {
            Err(HardwareError::MissingCapability("camera"))
        }

        async fn speak(&self, _text: &str) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn show_text(&self, _text: &str, _hold: Duration) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn play_audio(&self, _url: &str) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn stop_audio(&self) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn latest_location(&self) -> Result<Coordinates, HardwareError> {
            Err(HardwareError::Device("no gps".into()))
        }
    }

    fn make_state(agent_delay: Duration) -> SharedState {
        let registry = SessionRegistry::new(
            Arc::new(EventBus::new()),
            Arc::new(StubAgent { delay: agent_delay }),
            None,
            None,
            UserConfig::default(),
        );
        let lifecycle = Arc::new(LifecycleController::new(Arc::clone(&registry), None));
        AppState::new(registry, lifecycle)
    }

    fn drain_types(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut types = Vec::new();
        while let Ok(line) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            types.push(value["type"].as_str().unwrap_or("?").to_string());
        }
        types
    }

    #[tokio::test]
    async fn fresh_open_sends_connected_history_heartbeat() {
        let state = make_state(Duration::ZERO);
        let uid = UserId::from("u1");
        let user = state.registry.get_or_create(&uid);
        user.history().add_turn("q", "r", false, None).await;

        let mut open = open_chat(&state, &uid, "web");
        let types = drain_types(&mut open.rx);
        assert_eq!(types, ["connected", "history", "session_heartbeat"]);
    }

    #[tokio::test]
    async fn open_for_unknown_user_skips_history_and_reports_inactive() {
        let state = make_state(Duration::ZERO);
        let uid = UserId::from("nobody");

        let mut open = open_chat(&state, &uid, "web");
        let lines: Vec<String> = std::iter::from_fn(|| open.rx.try_recv().ok()).collect();
        let types: Vec<String> = lines
            .iter()
            .map(|line| {
                serde_json::from_str::<serde_json::Value>(line).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(types, ["connected", "session_heartbeat"]);
        assert!(lines[1].contains("\"active\":false"));
    }

    #[tokio::test]
    async fn heartbeat_reports_active_with_live_hardware() {
        let state = make_state(Duration::ZERO);
        let uid = UserId::from("u1");
        state
            .lifecycle
            .on_session(uid.clone(), StubHardware::new())
            .await;

        let mut open = open_chat(&state, &uid, "web");
        let lines: Vec<String> = std::iter::from_fn(|| open.rx.try_recv().ok()).collect();
        let heartbeat = lines.last().unwrap();
        assert!(heartbeat.contains("session_heartbeat"));
        assert!(heartbeat.contains("\"active\":true"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_mid_flight_gets_the_flush_and_no_history() {
        let state = make_state(Duration::from_millis(200));
        let uid = UserId::from("u1");
        let hardware = StubHardware::new();
        state.lifecycle.on_session(uid.clone(), hardware.clone()).await;
        let user = state.registry.get(&uid).unwrap();
        // A previous stored turn that would normally be replayed as history.
        user.history().add_turn("old q", "old r", false, None).await;

        hardware.say("hey lumen what time is it");
        // Silence window elapses; the pipeline starts and parks on the
        // agent's pending response.
        tokio::time::sleep(Duration::from_millis(1600)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // Subscriber opens mid-flight, before the agent responds. The queue
        // flush replays everything since connect, but no `history` event.
        let mut open = open_chat(&state, &uid, "web");
        let types = drain_types(&mut open.rx);
        assert_eq!(
            types,
            ["connected", "session_started", "processing", "message", "session_heartbeat"]
        );

        // Let the agent finish.
        tokio::time::sleep(Duration::from_millis(300)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let rest = drain_types(&mut open.rx);
        assert_eq!(rest, ["message", "idle"]);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_after_grace_expiry_sees_only_connected_and_inactive_heartbeat() {
        let state = make_state(Duration::ZERO);
        let uid = UserId::from("u1");
        state
            .lifecycle
            .on_session(uid.clone(), StubHardware::new())
            .await;
        state.lifecycle.on_stop(&uid, "battery died");

        tokio::time::sleep(GRACE_PERIOD + Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(state.registry.get(&uid).is_none());

        let mut open = open_chat(&state, &uid, "web");
        let lines: Vec<String> = std::iter::from_fn(|| open.rx.try_recv().ok()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"connected\""));
        assert!(lines[1].contains("\"type\":\"session_heartbeat\""));
        assert!(lines[1].contains("\"active\":false"));
    }

    #[tokio::test]
    async fn plain_streams_send_connected_then_heartbeat() {
        let state = make_state(Duration::ZERO);
        let uid = UserId::from("u1");

        let mut open = open_plain(&state, &uid, Topic::Transcription);
        let types = drain_types(&mut open.rx);
        assert_eq!(types, ["connected", "heartbeat"]);

        let mut open = open_plain(&state, &uid, Topic::Photo);
        let types = drain_types(&mut open.rx);
        assert_eq!(types, ["connected", "heartbeat"]);
    }
}

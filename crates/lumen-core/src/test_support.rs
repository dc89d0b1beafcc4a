//! Shared fakes for unit tests: a scriptable hardware session, a canned
//! agent, and bus collection helpers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use lumen_agent::{AgentClient, AgentContext, AgentError, AgentReply};
use lumen_common::errors::HardwareError;
use lumen_common::events::Topic;
use lumen_common::id::{new_id, UserId};
use lumen_common::types::{Capabilities, Coordinates, TranscriptionEvent};

use crate::bus::{EventBus, Subscriber, SUBSCRIBER_BUFFER};
use crate::hardware::{CapturedPhoto, HardwareEvent, HardwareSession};

pub(crate) struct MockHardware {
    caps: Capabilities,
    events: broadcast::Sender<HardwareEvent>,
    spoken: Mutex<Vec<String>>,
    shown: Mutex<Vec<String>>,
    played: Mutex<Vec<String>>,
    photo_fails: AtomicBool,
    location: Mutex<Coordinates>,
}

impl MockHardware {
    fn new(caps: Capabilities) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            caps,
            events,
            spoken: Mutex::new(Vec::new()),
            shown: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
            photo_fails: AtomicBool::new(false),
            location: Mutex::new(Coordinates {
                lat: 52.52,
                lng: 13.405,
                accuracy: Some(12.0),
            }),
        })
    }

    /// Display + speaker, no camera.
    pub fn display_glasses() -> Arc<Self> {
        Self::new(Capabilities {
            has_camera: false,
            has_display: true,
            has_speaker: true,
            model_name: "Lumen G2 Display".into(),
        })
    }

    /// Camera + speaker, no display.
    pub fn camera_glasses() -> Arc<Self> {
        Self::new(Capabilities {
            has_camera: true,
            has_display: false,
            has_speaker: true,
            model_name: "Lumen G1 Camera".into(),
        })
    }

    pub fn emit(&self, event: HardwareEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_transcription(&self, event: TranscriptionEvent) {
        self.emit(HardwareEvent::Transcription(event));
    }

    pub fn fail_photos(&self) {
        self.photo_fails.store(true, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl HardwareSession for MockHardware {
    fn capabilities(&self) -> Capabilities {
        self.caps.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<HardwareEvent> {
        self.events.subscribe()
    }

    async fn capture_photo(&self) -> Result<CapturedPhoto, HardwareError> {
        if self.photo_fails.load(Ordering::SeqCst) {
            return Err(HardwareError::Device("lens unavailable".into()));
        }
        Ok(CapturedPhoto {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
            mime_type: "image/jpeg".into(),
            filename: "capture.jpg".into(),
        })
    }

    async fn speak(&self, text: &str) -> Result<(), HardwareError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn show_text(&self, text: &str, _hold: Duration) -> Result<(), HardwareError> {
        self.shown.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn play_audio(&self, url: &str) -> Result<(), HardwareError> {
        self.played.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn stop_audio(&self) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn latest_location(&self) -> Result<Coordinates, HardwareError> {
        Ok(*self.location.lock().unwrap())
    }
}

pub(crate) struct MockAgent {
    reply: Option<String>,
    delay: Duration,
}

impl MockAgent {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl AgentClient for MockAgent {
    async fn generate(
        &self,
        _query: &str,
        _photos: &[Vec<u8>],
        _context: &AgentContext,
    ) -> Result<AgentReply, AgentError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.reply {
            Some(ref response) => Ok(AgentReply {
                response: response.clone(),
            }),
            None => Err(AgentError::ApiError("scripted failure".into())),
        }
    }
}

/// Attach a collecting subscriber to `(user_id, topic)`.
pub(crate) fn collect(
    bus: &Arc<EventBus>,
    user_id: &UserId,
    topic: Topic,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    bus.subscribe(user_id, topic, Subscriber::new(new_id(), tx));
    rx
}

/// Drain everything currently delivered and return the `type` tags.
pub(crate) fn event_types(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut types = Vec::new();
    while let Ok(line) = rx.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&line).expect("valid event json");
        types.push(value["type"].as_str().unwrap_or("?").to_string());
    }
    types
}

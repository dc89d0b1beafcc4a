//! Seam to the wearable SDK.
//!
//! The host process hands each user a capability object; the core only ever
//! talks to the device through this trait. Mutation of the attachment is the
//! lifecycle controller's job; everything else treats the handle read-only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use lumen_common::errors::HardwareError;
use lumen_common::types::{Capabilities, Coordinates, TranscriptionEvent};

/// Default deadline applied to individual device calls.
pub const HARDWARE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Push events delivered by the device while a session is attached.
#[derive(Debug, Clone)]
pub enum HardwareEvent {
    Transcription(TranscriptionEvent),
    Location(Coordinates),
    Notification(serde_json::Value),
    /// A device-side setting changed, e.g. key `"timezone"` with an IANA
    /// zone name value.
    SettingChanged { key: String, value: serde_json::Value },
}

/// One captured camera frame.
#[derive(Debug, Clone)]
pub struct CapturedPhoto {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

/// Live connection to one pair of glasses.
#[async_trait]
pub trait HardwareSession: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Subscribe to the device's push events. Each call returns an
    /// independent receiver positioned at the current point in the stream.
    fn subscribe(&self) -> broadcast::Receiver<HardwareEvent>;

    async fn capture_photo(&self) -> Result<CapturedPhoto, HardwareError>;

    async fn speak(&self, text: &str) -> Result<(), HardwareError>;

    async fn show_text(&self, text: &str, hold: Duration) -> Result<(), HardwareError>;

    async fn play_audio(&self, url: &str) -> Result<(), HardwareError>;

    async fn stop_audio(&self) -> Result<(), HardwareError>;

    async fn latest_location(&self) -> Result<Coordinates, HardwareError>;
}

pub type SharedHardware = Arc<dyn HardwareSession>;

/// Run a device call under the standard deadline.
pub async fn with_deadline<T, F>(fut: F) -> Result<T, HardwareError>
where
    F: std::future::Future<Output = Result<T, HardwareError>>,
{
    match tokio::time::timeout(HARDWARE_CALL_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(HardwareError::Timeout),
    }
}

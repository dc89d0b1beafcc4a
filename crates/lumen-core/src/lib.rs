//! Session and query orchestration core for the glasses assistant.
//!
//! Accepts live transcription from the wearable, detects the wake phrase,
//! accumulates utterances into queries, runs each query through photo /
//! location / notification enrichment and the agent, and fans lifecycle
//! events out to browser subscribers. Per-user state lives in memory and
//! survives transient disconnects for a grace period.

pub mod accumulator;
pub mod bus;
pub mod hardware;
pub mod history;
pub mod lifecycle;
pub mod location;
pub mod notify;
pub mod photo;
pub mod pipeline;
pub mod registry;
pub mod user;
pub mod wake;

#[cfg(test)]
pub(crate) mod test_support;

pub use accumulator::TranscriptionAccumulator;
pub use bus::{EventBus, Subscriber};
pub use hardware::{CapturedPhoto, HardwareEvent, HardwareSession, SharedHardware};
pub use history::{ChatArchive, ChatHistory, JsonlArchive};
pub use lifecycle::LifecycleController;
pub use location::{Geocoder, LocationManager, LocationSnapshot};
pub use notify::NotificationStore;
pub use photo::{PhotoStore, StoredPhoto};
pub use registry::{SessionRegistry, GRACE_PERIOD};
pub use user::{SettingsPatch, User, UserConfig, UserSettings};
pub use wake::WakeWordMatcher;

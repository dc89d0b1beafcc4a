pub mod errors;
pub mod events;
pub mod id;
pub mod types;

pub use errors::{CoreError, HardwareError};
pub use events::{ChatEvent, ChatMessage, PhotoEvent, Topic, TranscriptEvent};
pub use id::{new_id, new_request_id, UserId};
pub use types::{Capabilities, ChatTurn, Coordinates, GlassesKind, TranscriptionEvent};

pub type Result<T> = std::result::Result<T, CoreError>;

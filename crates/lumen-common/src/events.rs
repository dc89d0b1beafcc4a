//! Wire shapes for the three server-push topics.
//!
//! Every event carries a `type` tag and a `timestamp`; browsers key off the
//! tag, so additions must stay backwards-compatible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;
use crate::types::GlassesKind;

/// Sender id used for assistant-authored chat messages.
pub const AGENT_SENDER_ID: &str = "lumen";

/// Fan-out channel of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Chat,
    Transcription,
    Photo,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Chat => "chat",
            Topic::Transcription => "transcription",
            Topic::Photo => "photo",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendered chat entry, as replayed in `history` and sent in `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Events on the `chat` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Connected {
        timestamp: DateTime<Utc>,
    },
    History {
        messages: Vec<ChatMessage>,
        timestamp: DateTime<Utc>,
    },
    Message {
        #[serde(flatten)]
        message: ChatMessage,
    },
    Processing {
        timestamp: DateTime<Utc>,
    },
    Idle {
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        glasses_type: GlassesKind,
        timestamp: DateTime<Utc>,
    },
    SessionReconnecting {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SessionReconnected {
        glasses_type: GlassesKind,
        timestamp: DateTime<Utc>,
    },
    SessionEnded {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    SessionHeartbeat {
        active: bool,
        timestamp: DateTime<Utc>,
    },
}

impl ChatEvent {
    pub fn connected() -> Self {
        Self::Connected {
            timestamp: Utc::now(),
        }
    }

    pub fn history(messages: Vec<ChatMessage>) -> Self {
        Self::History {
            messages,
            timestamp: Utc::now(),
        }
    }

    pub fn message(message: ChatMessage) -> Self {
        Self::Message { message }
    }

    pub fn processing() -> Self {
        Self::Processing {
            timestamp: Utc::now(),
        }
    }

    pub fn idle() -> Self {
        Self::Idle {
            timestamp: Utc::now(),
        }
    }

    pub fn session_started(glasses_type: GlassesKind) -> Self {
        Self::SessionStarted {
            glasses_type,
            timestamp: Utc::now(),
        }
    }

    pub fn session_reconnecting(reason: impl Into<String>) -> Self {
        Self::SessionReconnecting {
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn session_reconnected(glasses_type: GlassesKind) -> Self {
        Self::SessionReconnected {
            glasses_type,
            timestamp: Utc::now(),
        }
    }

    pub fn session_ended(reason: impl Into<String>) -> Self {
        Self::SessionEnded {
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn session_heartbeat(active: bool) -> Self {
        Self::SessionHeartbeat {
            active,
            timestamp: Utc::now(),
        }
    }
}

/// Events on the `transcription` topic (debugging subscribers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    Connected {
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Transcription {
        text: String,
        is_final: bool,
        timestamp: DateTime<Utc>,
    },
}

impl TranscriptEvent {
    pub fn connected() -> Self {
        Self::Connected {
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn transcription(text: impl Into<String>, is_final: bool) -> Self {
        Self::Transcription {
            text: text.into(),
            is_final,
            timestamp: Utc::now(),
        }
    }
}

/// Events on the `photo` topic. Payloads carry metadata and an optional URL
/// reference; raw bytes never travel on this topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PhotoEvent {
    Connected {
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Photo {
        request_id: String,
        mime_type: String,
        filename: String,
        size: usize,
        user_id: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_url: Option<String>,
    },
}

impl PhotoEvent {
    pub fn connected() -> Self {
        Self::Connected {
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }
}

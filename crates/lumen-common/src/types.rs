use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device capabilities reported by the wearable host when a hardware
/// session is established.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub has_camera: bool,
    pub has_display: bool,
    pub has_speaker: bool,
    pub model_name: String,
}

impl Capabilities {
    /// Coarse classification used in session lifecycle events so the UI can
    /// pick an appropriate layout.
    pub fn glasses_kind(&self) -> GlassesKind {
        if self.has_display {
            GlassesKind::Display
        } else {
            GlassesKind::Camera
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlassesKind {
    Display,
    Camera,
}

/// One transcription update from the speech provider.
///
/// Within a single `utterance_id`, `text` is cumulative: each update replaces
/// the previous one. Across utterance ids the text restarts from empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionEvent {
    pub text: String,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utterance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
}

/// Last known device coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// One completed query/response exchange.
///
/// Photos are referenced by capture request id, never inlined, so the ring
/// and any durable archive stay small.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub had_photo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glasses_kind_prefers_display() {
        let caps = Capabilities {
            has_camera: true,
            has_display: true,
            has_speaker: true,
            model_name: "G2".into(),
        };
        assert_eq!(caps.glasses_kind(), GlassesKind::Display);

        let caps = Capabilities {
            has_display: false,
            ..caps
        };
        assert_eq!(caps.glasses_kind(), GlassesKind::Camera);
    }

    #[test]
    fn transcription_event_optional_fields_default() {
        let json = r#"{"text":"hello","isFinal":false}"#;
        let event: TranscriptionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.text, "hello");
        assert!(!event.is_final);
        assert!(event.utterance_id.is_none());
        assert!(event.speaker_id.is_none());
    }

    #[test]
    fn chat_turn_serializes_camel_case() {
        let turn = ChatTurn {
            query: "what time is it".into(),
            response: "Half past nine.".into(),
            timestamp: Utc::now(),
            had_photo: true,
            photo_ref: Some("abc123".into()),
        };
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains("\"hadPhoto\":true"));
        assert!(json.contains("\"photoRef\":\"abc123\""));
    }

    #[test]
    fn chat_turn_omits_absent_photo_ref() {
        let turn = ChatTurn {
            query: "q".into(),
            response: "r".into(),
            timestamp: Utc::now(),
            had_photo: false,
            photo_ref: None,
        };
        let json = serde_json::to_string(&turn).unwrap();
        assert!(!json.contains("photoRef"));
    }
}

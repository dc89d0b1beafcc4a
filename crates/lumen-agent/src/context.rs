//! Agent context: everything the model is told beyond the query itself.

use lumen_common::types::ChatTurn;

/// Device coordinates plus optional reverse-geocoded address.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationContext {
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
}

/// Context options recognised by the agent adapter. Everything is optional;
/// the prompt only mentions what is present.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub has_display: bool,
    pub has_speakers: bool,
    pub has_camera: bool,
    pub location: Option<LocationContext>,
    pub local_time: Option<String>,
    pub timezone: Option<String>,
    pub notifications: Option<String>,
    pub conversation_history: Vec<ChatTurn>,
}

impl AgentContext {
    /// Render the context into the system-prompt preamble.
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are a voice assistant running on smart glasses. \
             Answer briefly; the user is hearing or glancing at your reply.",
        );

        let mut outputs = Vec::new();
        if self.has_display {
            outputs.push("a small text display");
        }
        if self.has_speakers {
            outputs.push("a speaker");
        }
        if !outputs.is_empty() {
            prompt.push_str(&format!("\nThe device has {}.", outputs.join(" and ")));
        }
        if self.has_camera {
            prompt.push_str(
                "\nAttached photos were just captured from the user's point of view; \
                 use them when the question refers to what the user sees.",
            );
        }

        if let Some(ref loc) = self.location {
            match loc.address {
                Some(ref addr) => prompt.push_str(&format!(
                    "\nThe user is at {addr} ({:.5}, {:.5}).",
                    loc.lat, loc.lng
                )),
                None => prompt.push_str(&format!(
                    "\nThe user is at coordinates ({:.5}, {:.5}).",
                    loc.lat, loc.lng
                )),
            }
        }

        if let Some(ref time) = self.local_time {
            match self.timezone {
                Some(ref tz) => prompt.push_str(&format!("\nLocal time: {time} ({tz}).")),
                None => prompt.push_str(&format!("\nLocal time: {time}.")),
            }
        }

        if let Some(ref notifications) = self.notifications {
            prompt.push_str(&format!(
                "\nRecent phone notifications:\n{notifications}"
            ));
        }

        prompt
    }

    /// Render the bounded conversation history as alternating turns for the
    /// request body.
    pub fn history_messages(&self) -> Vec<(String, String)> {
        let mut messages = Vec::with_capacity(self.conversation_history.len() * 2);
        for turn in &self.conversation_history {
            messages.push(("user".to_string(), turn.query.clone()));
            messages.push(("assistant".to_string(), turn.response.clone()));
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn empty_context_is_just_the_preamble() {
        let ctx = AgentContext::default();
        let prompt = ctx.system_prompt();
        assert!(prompt.starts_with("You are a voice assistant"));
        assert!(!prompt.contains("Local time"));
        assert!(!prompt.contains("coordinates"));
    }

    #[test]
    fn location_prefers_address() {
        let ctx = AgentContext {
            location: Some(LocationContext {
                lat: 40.7128,
                lng: -74.006,
                address: Some("Lower Manhattan, New York".into()),
            }),
            ..Default::default()
        };
        let prompt = ctx.system_prompt();
        assert!(prompt.contains("Lower Manhattan, New York"));
    }

    #[test]
    fn time_and_timezone_render_together() {
        let ctx = AgentContext {
            local_time: Some("Tuesday 14:05".into()),
            timezone: Some("Europe/Berlin".into()),
            ..Default::default()
        };
        assert!(ctx
            .system_prompt()
            .contains("Local time: Tuesday 14:05 (Europe/Berlin)."));
    }

    #[test]
    fn history_alternates_roles() {
        let turn = ChatTurn {
            query: "what time is it".into(),
            response: "Ten past nine.".into(),
            timestamp: Utc::now(),
            had_photo: false,
            photo_ref: None,
        };
        let ctx = AgentContext {
            conversation_history: vec![turn],
            ..Default::default()
        };
        let msgs = ctx.history_messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].0, "user");
        assert_eq!(msgs[1].0, "assistant");
        assert_eq!(msgs[1].1, "Ten past nine.");
    }
}

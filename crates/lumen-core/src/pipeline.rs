//! End-to-end handling of one finished query.
//!
//! Steps run in a fixed order on the user's worker task, each tolerating
//! partial failure: a dead camera or a slow geocoder degrades the answer, it
//! never kills the turn. Two ordering rules matter for replay correctness:
//! the user's `message` event goes out before the agent call starts, and the
//! agent's `message` event goes out before the turn is written to history,
//! so a late subscriber's queue flush is exactly the in-flight turn.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use lumen_agent::context::LocationContext;
use lumen_agent::{format_for_speech, AgentContext, APOLOGY};
use lumen_common::events::{ChatEvent, ChatMessage, Topic, AGENT_SENDER_ID};
use lumen_common::id::new_id;

use crate::hardware::with_deadline;
use crate::history::photo_url;
use crate::user::User;

/// Returned when a query arrives with no live hardware session.
pub const NO_SESSION_APOLOGY: &str =
    "I can't reach your glasses right now. Please check the connection and try again.";

impl User {
    /// Run one query through capture, enrichment, the agent, and output.
    /// Returns the response text (an apology on agent failure).
    pub(crate) async fn run_query(&self, query: String, speaker_id: Option<String>) -> String {
        let Some(hardware) = self.hardware() else {
            debug!(user_id = %self.id(), "Dropping query: no hardware session");
            return NO_SESSION_APOLOGY.to_string();
        };
        let caps = hardware.capabilities();
        info!(user_id = %self.id(), query = %query, speaker_id = ?speaker_id, "Processing query");

        self.bus
            .broadcast(self.id(), Topic::Chat, &ChatEvent::processing());

        if let Some(url) = self.config.processing_sound.clone() {
            let audio = Arc::clone(&hardware);
            tokio::spawn(async move {
                if let Err(e) = audio.play_audio(&url).await {
                    debug!(error = %e, "Processing sound failed");
                }
            });
        }

        let mut photo_ref = None;
        let mut photo_bytes = Vec::new();
        if caps.has_camera {
            match self.photos.capture(&hardware).await {
                Ok(photo) => {
                    photo_ref = Some(photo.request_id.clone());
                    photo_bytes = self.photos.context_bytes();
                }
                Err(e) => {
                    debug!(user_id = %self.id(), error = %e, "Photo capture failed, continuing without")
                }
            }
        } else if self.matcher.is_vision_query(&query) {
            debug!(user_id = %self.id(), "Vision query on a camera-less device");
        }

        let location = self.location.refresh(&query, Some(&hardware)).await;

        let context = AgentContext {
            has_display: caps.has_display,
            has_speakers: caps.has_speaker,
            has_camera: caps.has_camera,
            location: location.map(|snapshot| LocationContext {
                lat: snapshot.coords.lat,
                lng: snapshot.coords.lng,
                address: snapshot.address,
            }),
            local_time: Some(self.location.local_time()),
            timezone: self.location.timezone_name(),
            notifications: self.notifications.formatted(5),
            conversation_history: self.history.recent_turns(self.config.context_turns, None),
        };

        // The user's side of the turn, broadcast before the agent runs.
        self.bus.broadcast(
            self.id(),
            Topic::Chat,
            &ChatEvent::message(ChatMessage {
                id: new_id(),
                sender_id: self.id().to_string(),
                recipient_id: AGENT_SENDER_ID.to_string(),
                content: query.clone(),
                timestamp: Utc::now(),
                image: photo_ref.as_deref().map(photo_url),
            }),
        );

        let response = match tokio::time::timeout(
            self.config.agent_deadline,
            self.agent.generate(&query, &photo_bytes, &context),
        )
        .await
        {
            Ok(Ok(reply)) => reply.response,
            Ok(Err(e)) => {
                warn!(user_id = %self.id(), error = %e, "Agent call failed");
                APOLOGY.to_string()
            }
            Err(_) => {
                warn!(user_id = %self.id(), "Agent call exceeded deadline");
                APOLOGY.to_string()
            }
        };

        let spoken = if caps.has_speaker && !caps.has_display {
            format_for_speech(&response)
        } else {
            response.clone()
        };

        if caps.has_display {
            if let Err(e) = with_deadline(hardware.show_text(&response, self.config.display_hold)).await
            {
                debug!(user_id = %self.id(), error = %e, "Display output failed");
            }
        }
        if caps.has_speaker {
            if let Err(e) = with_deadline(hardware.speak(&spoken)).await {
                debug!(user_id = %self.id(), error = %e, "Speech output failed");
            }
        }

        self.bus.broadcast(
            self.id(),
            Topic::Chat,
            &ChatEvent::message(ChatMessage {
                id: new_id(),
                sender_id: AGENT_SENDER_ID.to_string(),
                recipient_id: self.id().to_string(),
                content: response.clone(),
                timestamp: Utc::now(),
                image: None,
            }),
        );

        self.history
            .add_turn(query, response.clone(), photo_ref.is_some(), photo_ref)
            .await;

        self.bus.broadcast(self.id(), Topic::Chat, &ChatEvent::idle());
        response
    }
}

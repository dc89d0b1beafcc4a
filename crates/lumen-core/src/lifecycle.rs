//! Reactions to wearable host events: session up, session down.
//!
//! Reconnect detection hinges on ordering: the pending-removal check must
//! happen before `get_or_create`, otherwise every reconnect looks like a
//! fresh session.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use lumen_common::events::{ChatEvent, Topic};
use lumen_common::id::UserId;

use crate::hardware::SharedHardware;
use crate::registry::{SessionRegistry, GRACE_PERIOD};

pub struct LifecycleController {
    registry: Arc<SessionRegistry>,
    grace: Duration,
    welcome_sound: Option<String>,
}

impl LifecycleController {
    pub fn new(registry: Arc<SessionRegistry>, welcome_sound: Option<String>) -> Self {
        Self {
            registry,
            grace: GRACE_PERIOD,
            welcome_sound,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The host established a hardware session for `user_id`.
    pub async fn on_session(&self, user_id: UserId, session: SharedHardware) {
        let was_reconnect = self.registry.cancel_removal(&user_id);
        let user = self.registry.get_or_create(&user_id);

        if !was_reconnect {
            user.initialize().await;
        }
        user.set_app_session(Arc::clone(&session));

        let kind = session.capabilities().glasses_kind();
        if was_reconnect {
            info!(user_id = %user_id, "Session reconnected");
            self.registry.bus().broadcast(
                &user_id,
                Topic::Chat,
                &ChatEvent::session_reconnected(kind),
            );
        } else {
            info!(user_id = %user_id, model = %session.capabilities().model_name, "Session started");
            self.registry
                .bus()
                .broadcast(&user_id, Topic::Chat, &ChatEvent::session_started(kind));
            if let Some(url) = self.welcome_sound.clone() {
                tokio::spawn(async move {
                    if let Err(e) = session.play_audio(&url).await {
                        debug!(error = %e, "Welcome sound failed");
                    }
                });
            }
        }
    }

    /// The host lost the hardware session. The user goes into the grace
    /// window; pending events are preserved for a reconnecting subscriber.
    pub fn on_stop(&self, user_id: &UserId, reason: &str) {
        info!(user_id = %user_id, reason = %reason, "Session stopped");
        self.registry.bus().broadcast(
            user_id,
            Topic::Chat,
            &ChatEvent::session_reconnecting(reason),
        );
        self.registry.soft_remove(user_id, self.grace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lumen_common::types::TranscriptionEvent;

    use crate::bus::EventBus;
    use crate::registry::SessionRegistry;
    use crate::test_support::{collect, event_types, MockAgent, MockHardware};
    use crate::user::UserConfig;

    fn controller() -> LifecycleController {
        let registry = SessionRegistry::new(
            Arc::new(EventBus::new()),
            Arc::new(MockAgent::replying("It's late.")),
            None,
            None,
            UserConfig::default(),
        );
        LifecycleController::new(registry, None)
    }

    #[tokio::test]
    async fn fresh_session_broadcasts_session_started() {
        let controller = controller();
        let uid = UserId::from("u1");
        let mut rx = collect(controller.registry().bus(), &uid, Topic::Chat);

        controller
            .on_session(uid.clone(), MockHardware::display_glasses())
            .await;

        let types = event_types(&mut rx);
        assert_eq!(types, ["session_started"]);
        assert!(controller.registry().get(&uid).unwrap().has_hardware());
    }

    #[tokio::test]
    async fn welcome_sound_plays_on_fresh_session_only() {
        let registry = SessionRegistry::new(
            Arc::new(EventBus::new()),
            Arc::new(MockAgent::replying("ok")),
            None,
            None,
            UserConfig::default(),
        );
        let controller =
            LifecycleController::new(registry, Some("https://sounds/welcome.mp3".into()));
        let uid = UserId::from("u1");
        let hardware = MockHardware::display_glasses();

        controller.on_session(uid.clone(), hardware.clone()).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(hardware.played(), ["https://sounds/welcome.mp3"]);

        // Reconnect path: no second welcome.
        controller.on_stop(&uid, "glasses sleep");
        controller.on_session(uid.clone(), hardware.clone()).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(hardware.played().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_reconnect_within_grace_is_a_reconnect() {
        let controller = controller();
        let uid = UserId::from("u1");
        let mut rx = collect(controller.registry().bus(), &uid, Topic::Chat);
        controller
            .on_session(uid.clone(), MockHardware::display_glasses())
            .await;
        let user = controller.registry().get(&uid).unwrap();
        user.history().add_turn("q", "r", false, None).await;

        controller.on_stop(&uid, "connection lost");

        tokio::time::sleep(Duration::from_secs(30)).await;
        controller
            .on_session(uid.clone(), MockHardware::display_glasses())
            .await;

        let types = event_types(&mut rx);
        assert_eq!(
            types,
            ["session_started", "session_reconnecting", "session_reconnected"]
        );

        // Same user, state intact, next query works.
        let user_after = controller.registry().get(&uid).unwrap();
        assert!(Arc::ptr_eq(&user, &user_after));
        assert_eq!(user_after.history().len(), 1);
        let response = user_after.run_query("what time is it".into(), None).await;
        assert_eq!(response, "It's late.");
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resets_the_accumulator_destroyed_flag() {
        let controller = controller();
        let uid = UserId::from("u1");
        let hardware = MockHardware::display_glasses();
        controller.on_session(uid.clone(), hardware.clone()).await;

        controller.on_stop(&uid, "connection lost");
        tokio::time::sleep(Duration::from_secs(5)).await;

        let hardware2 = MockHardware::display_glasses();
        controller.on_session(uid.clone(), hardware2.clone()).await;

        // The re-attached session must deliver queries end to end.
        hardware2.emit_transcription(TranscriptionEvent {
            text: "hey lumen what time is it".into(),
            is_final: true,
            utterance_id: Some("1".into()),
            speaker_id: None,
        });
        tokio::time::sleep(Duration::from_millis(1600)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(hardware2.shown(), ["It's late."]);
        // The old session's stream no longer feeds anything.
        assert!(hardware.shown().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_past_grace_ends_the_session_for_good() {
        let controller = controller();
        let uid = UserId::from("u1");
        let mut rx = collect(controller.registry().bus(), &uid, Topic::Chat);
        controller
            .on_session(uid.clone(), MockHardware::display_glasses())
            .await;

        controller.on_stop(&uid, "battery died");

        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let types = event_types(&mut rx);
        assert_eq!(
            types,
            ["session_started", "session_reconnecting", "session_ended"]
        );
        assert!(controller.registry().get(&uid).is_none());
        assert_eq!(
            controller.registry().bus().pending_count(&uid, Topic::Chat),
            0
        );
    }

    #[tokio::test]
    async fn double_session_attach_keeps_one_listener() {
        let controller = controller();
        let uid = UserId::from("u1");
        let first = MockHardware::display_glasses();
        let second = MockHardware::display_glasses();

        controller.on_session(uid.clone(), first.clone()).await;
        // Ungraceful reconnect: no on_stop in between.
        controller.on_session(uid.clone(), second.clone()).await;

        let user = controller.registry().get(&uid).unwrap();
        let mut rx = collect(
            controller.registry().bus(),
            &uid,
            Topic::Transcription,
        );

        second.emit_transcription(TranscriptionEvent {
            text: "hello".into(),
            is_final: false,
            utterance_id: None,
            speaker_id: None,
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // Exactly one forwarded copy: the first session's listener is gone.
        let types = event_types(&mut rx);
        assert_eq!(types, ["transcription"]);
        assert!(user.has_hardware());

        // Events from the replaced session are ignored entirely.
        first.emit_transcription(TranscriptionEvent {
            text: "stale".into(),
            is_final: false,
            utterance_id: None,
            speaker_id: None,
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(event_types(&mut rx).is_empty());
    }
}

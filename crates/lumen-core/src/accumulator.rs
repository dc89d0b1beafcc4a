//! Per-utterance transcription accumulation and query emission.
//!
//! The speech provider delivers cumulative partial updates per utterance and
//! a final update at each utterance boundary. Once a wake phrase arms the
//! accumulator, confirmed (final) utterances are concatenated while the
//! latest partial rides along; a silence timer closes the query.
//!
//! Emission is gated by a `destroyed` flag that the user aggregate sets on
//! detach and must clear on re-attach. A stale accumulator firing into a
//! torn-down session was a recurring bug shape, so the flag lives here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use lumen_common::types::TranscriptionEvent;

use crate::wake::WakeWordMatcher;

/// Silence window after which the accumulated query is emitted.
pub const DEFAULT_SILENCE_WINDOW: Duration = Duration::from_millis(1500);

/// Callback invoked with `(query, last_final_speaker_id)` when a query is
/// ready. Must not block; the user aggregate hands queries to its worker
/// channel here.
pub type QueryReadyFn = Arc<dyn Fn(String, Option<String>) + Send + Sync>;

#[derive(Default)]
struct AccState {
    listening: bool,
    confirmed: String,
    current: String,
    last_confirmed_utterance: Option<String>,
    last_speaker: Option<String>,
    timer: Option<JoinHandle<()>>,
}

impl AccState {
    fn reset(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.listening = false;
        self.confirmed.clear();
        self.current.clear();
        self.last_confirmed_utterance = None;
        self.last_speaker = None;
    }
}

pub struct TranscriptionAccumulator {
    matcher: Arc<WakeWordMatcher>,
    silence: Duration,
    destroyed: AtomicBool,
    on_query: QueryReadyFn,
    state: Mutex<AccState>,
}

impl TranscriptionAccumulator {
    pub fn new(matcher: Arc<WakeWordMatcher>, silence: Duration, on_query: QueryReadyFn) -> Self {
        Self {
            matcher,
            silence,
            destroyed: AtomicBool::new(false),
            on_query,
            state: Mutex::new(AccState::default()),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().expect("accumulator lock").listening
    }

    /// Feed one transcription event.
    pub fn handle_event(self: &Arc<Self>, event: &TranscriptionEvent) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }

        let mut state = self.state.lock().expect("accumulator lock");

        if !state.listening {
            let Some(detection) = self.matcher.detect(&event.text) else {
                return;
            };
            debug!(index = detection.index, "Wake phrase detected");
            state.reset();
            state.listening = true;
            state.last_speaker = event.speaker_id.clone();
            if event.is_final {
                // The arming utterance already closed: its tail is confirmed
                // text, not a partial to be overwritten.
                state.confirmed = detection.tail;
                state.last_confirmed_utterance = event.utterance_id.clone();
            } else {
                state.current = detection.tail;
            }
            self.arm_timer(&mut state);
            return;
        }

        let stripped = self.matcher.strip_residue(&event.text);
        let clean = self.matcher.remove_wake_word(&stripped);

        if event.is_final {
            let duplicate = event.utterance_id.is_some()
                && event.utterance_id == state.last_confirmed_utterance;
            if duplicate {
                // SDK re-delivered an already-confirmed final.
                return;
            }
            if !clean.is_empty() {
                if !state.confirmed.is_empty() {
                    state.confirmed.push(' ');
                }
                state.confirmed.push_str(&clean);
            }
            state.current.clear();
            state.last_confirmed_utterance = event.utterance_id.clone();
            if event.speaker_id.is_some() {
                state.last_speaker = event.speaker_id.clone();
            }
        } else {
            state.current = clean;
        }
        self.arm_timer(&mut state);
    }

    /// Close out the current accumulation. Runs when the silence timer fires;
    /// resets to idle whether or not anything is emitted.
    pub fn process_current_query(&self) {
        let (query, speaker) = {
            let mut state = self.state.lock().expect("accumulator lock");
            let mut full = state.confirmed.clone();
            if !state.current.is_empty() {
                if !full.is_empty() {
                    full.push(' ');
                }
                full.push_str(&state.current);
            }
            let speaker = state.last_speaker.clone();
            state.reset();

            // Safety net: a wake phrase or residue that slipped through the
            // per-event cleaning (e.g. arrived whole in a single final).
            let trimmed = full.trim().to_string();
            let stripped = self.matcher.strip_residue(&trimmed);
            (self.matcher.remove_wake_word(&stripped), speaker)
        };

        if query.is_empty() || self.destroyed.load(Ordering::Acquire) {
            return;
        }
        debug!(query = %query, "Query ready");
        (self.on_query)(query, speaker);
    }

    /// Tear down: no further emission until `reset_for_attach`.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.state.lock().expect("accumulator lock").reset();
    }

    /// Re-enable after a hardware session is (re)attached.
    pub fn reset_for_attach(&self) {
        self.state.lock().expect("accumulator lock").reset();
        self.destroyed.store(false, Ordering::Release);
    }

    fn arm_timer(self: &Arc<Self>, state: &mut AccState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let acc = Arc::clone(self);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(acc.silence).await;
            acc.process_current_query();
        }));
    }
}

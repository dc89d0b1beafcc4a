//! Bounded per-user conversation history with optional durable append.
//!
//! The in-memory ring is authoritative; the archive is best-effort and keyed
//! by (user, calendar date) so a day's conversation lands in one document.
//! Turns reference photos by capture request id only.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use lumen_common::events::{ChatMessage, AGENT_SENDER_ID};
use lumen_common::id::{new_id, UserId};
use lumen_common::types::ChatTurn;

/// Turns retained in memory.
pub const HISTORY_CAP: usize = 30;

/// Deadline for one archive append before the pipeline moves on.
pub const ARCHIVE_DEADLINE: Duration = Duration::from_secs(5);

/// Durable store seam. Absent database configuration means no archive at
/// all; the ring alone serves history replay.
#[async_trait]
pub trait ChatArchive: Send + Sync {
    async fn append(
        &self,
        user_id: &UserId,
        date: NaiveDate,
        turn: &ChatTurn,
    ) -> lumen_common::Result<()>;
}

/// Append-only JSON-lines archive, one file per (user, date).
pub struct JsonlArchive {
    dir: PathBuf,
}

impl JsonlArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ChatArchive for JsonlArchive {
    async fn append(
        &self,
        user_id: &UserId,
        date: NaiveDate,
        turn: &ChatTurn,
    ) -> lumen_common::Result<()> {
        let dir = self.dir.join(user_id.as_str());
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{date}.jsonl"));
        let mut line = serde_json::to_string(turn)
            .map_err(|e| lumen_common::CoreError::Archive(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

pub struct ChatHistory {
    user_id: UserId,
    cap: usize,
    archive: Option<Arc<dyn ChatArchive>>,
    durable_enabled: AtomicBool,
    turns: Mutex<VecDeque<ChatTurn>>,
}

impl ChatHistory {
    pub fn new(user_id: UserId, archive: Option<Arc<dyn ChatArchive>>) -> Self {
        Self {
            user_id,
            cap: HISTORY_CAP,
            archive,
            durable_enabled: AtomicBool::new(true),
            turns: Mutex::new(VecDeque::new()),
        }
    }

    /// User preference toggle; gates archive appends, never the ring.
    pub fn set_durable_enabled(&self, enabled: bool) {
        self.durable_enabled.store(enabled, Ordering::Release);
    }

    pub async fn add_turn(
        &self,
        query: impl Into<String>,
        response: impl Into<String>,
        had_photo: bool,
        photo_ref: Option<String>,
    ) {
        let turn = ChatTurn {
            query: query.into(),
            response: response.into(),
            timestamp: Utc::now(),
            had_photo,
            photo_ref,
        };

        {
            let mut turns = self.turns.lock().expect("history lock");
            if turns.len() >= self.cap {
                turns.pop_front();
            }
            turns.push_back(turn.clone());
        }

        if !self.durable_enabled.load(Ordering::Acquire) {
            return;
        }
        let Some(ref archive) = self.archive else {
            return;
        };
        let date = turn.timestamp.date_naive();
        match tokio::time::timeout(ARCHIVE_DEADLINE, archive.append(&self.user_id, date, &turn))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(user_id = %self.user_id, error = %e, "Archive append failed"),
            Err(_) => warn!(user_id = %self.user_id, "Archive append timed out"),
        }
    }

    /// Youngest-last recent turns, optionally age-filtered.
    pub fn recent_turns(&self, limit: usize, max_age: Option<Duration>) -> Vec<ChatTurn> {
        let turns = self.turns.lock().expect("history lock");
        let now = Utc::now();
        let mut recent: Vec<ChatTurn> = turns
            .iter()
            .rev()
            .filter(|turn| match max_age {
                Some(max_age) => {
                    (now - turn.timestamp).to_std().unwrap_or_default() < max_age
                }
                None => true,
            })
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    pub fn len(&self) -> usize {
        self.turns.lock().expect("history lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.lock().expect("history lock").is_empty()
    }

    /// Expand turns into the alternating user/agent entries a chat stream
    /// replays on open.
    pub fn replay_messages(&self, recipient_id: &str) -> Vec<ChatMessage> {
        let turns = self.turns.lock().expect("history lock");
        let mut messages = Vec::with_capacity(turns.len() * 2);
        for turn in turns.iter() {
            messages.push(ChatMessage {
                id: new_id(),
                sender_id: self.user_id.to_string(),
                recipient_id: recipient_id.to_string(),
                content: turn.query.clone(),
                timestamp: turn.timestamp,
                image: turn.photo_ref.as_ref().map(|id| photo_url(id)),
            });
            messages.push(ChatMessage {
                id: new_id(),
                sender_id: AGENT_SENDER_ID.to_string(),
                recipient_id: self.user_id.to_string(),
                content: turn.response.clone(),
                timestamp: turn.timestamp,
                image: None,
            });
        }
        messages
    }
}

/// URL reference for a stored photo; the UI fetches bytes on demand.
pub fn photo_url(request_id: &str) -> String {
    format!("/api/photo/{request_id}")
}

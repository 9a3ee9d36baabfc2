//! Per-conversation state binding a resolved URL to a later selection
//!
//! One session per conversation, latest write wins. Sessions live for the
//! lifetime of the process only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::extraction::Variant;
use crate::formats::RankedShortlist;

/// Identity of one conversation (chat + user)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConversationId {
    pub chat: i64,
    pub user: i64,
}

impl ConversationId {
    pub fn new(chat: i64, user: i64) -> Self {
        Self { chat, user }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat, self.user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub url: String,
    pub title: String,
    pub shortlist: RankedShortlist,
    /// Chain index of the strategy that produced `shortlist`
    pub strategy_index: usize,
    /// Assigned by [`SessionStore::put`]; selections must quote it back
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        shortlist: RankedShortlist,
        strategy_index: usize,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            shortlist,
            strategy_index,
            generation: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no session for conversation {0}")]
    NotFound(ConversationId),

    #[error("selection no longer matches the current choices")]
    StaleSelection,
}

/// A validated selection: the session it was made against and the chosen variant
#[derive(Debug, Clone)]
pub struct Selection {
    pub session: Session,
    pub index: usize,
}

impl Selection {
    pub fn variant(&self) -> Option<&Variant> {
        self.session.shortlist.get(self.index)
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ConversationId, Session>>,
    next_generation: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session` for `conversation`, replacing any previous one.
    /// Returns the generation assigned to it.
    pub async fn put(&self, conversation: ConversationId, mut session: Session) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        session.generation = generation;

        let replaced = self.sessions.write().await.insert(conversation, session);
        debug!(
            %conversation,
            generation,
            replaced = replaced.is_some(),
            "Session stored"
        );
        generation
    }

    pub async fn get(&self, conversation: ConversationId) -> Result<Session, SessionError> {
        self.sessions
            .read()
            .await
            .get(&conversation)
            .cloned()
            .ok_or(SessionError::NotFound(conversation))
    }

    /// Validate a selection against the current session.
    ///
    /// Missing session, a generation other than the current one, or an index
    /// outside the shortlist are all [`SessionError::StaleSelection`].
    pub async fn select(
        &self,
        conversation: ConversationId,
        generation: u64,
        index: usize,
    ) -> Result<Selection, SessionError> {
        let session = self
            .get(conversation)
            .await
            .map_err(|_| SessionError::StaleSelection)?;

        if session.generation != generation || index >= session.shortlist.len() {
            debug!(
                %conversation,
                generation,
                current = session.generation,
                index,
                len = session.shortlist.len(),
                "Stale selection"
            );
            return Err(SessionError::StaleSelection);
        }

        Ok(Selection { session, index })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

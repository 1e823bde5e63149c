//! Conversation thread and session storage.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};

/// Default idle timeout before a session is swept (1 hour).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Held for the duration of one chat turn on a session.
pub type TurnGuard = OwnedMutexGuard<()>;

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message typed by the end user.
    User,
    /// Reply produced by the upstream model.
    Assistant,
}

impl MessageRole {
    /// Wire name used by the upstream API.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Creation time in epoch seconds.
    pub timestamp: i64,
}

impl Message {
    /// A message typed by the end user.
    #[must_use]
    pub fn user(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp,
        }
    }

    /// A reply produced by the upstream model.
    #[must_use]
    pub fn assistant(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp,
        }
    }
}

/// Point-in-time copy of a session, suitable for serialization.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub messages: Vec<Message>,
}

/// Aggregate counters over every live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_messages: usize,
}

/// A single conversation session.
///
/// `Session` is a handle: clones refer to the same conversation. Message
/// history is append-only and can only be wiped as a whole.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    /// Unique session identifier.
    id: String,
    /// Creation time in epoch seconds.
    created_at: i64,
    /// History and last access time, guarded together.
    state: RwLock<SessionState>,
    /// Serializes chat turns on this session.
    turn_lock: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
struct SessionState {
    messages: Vec<Message>,
    last_accessed_at: i64,
}

impl Session {
    fn new(id: String, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            inner: Arc::new(SessionInner {
                id,
                created_at: now,
                state: RwLock::new(SessionState {
                    messages: Vec::new(),
                    last_accessed_at: now,
                }),
                turn_lock: Arc::new(Mutex::new(())),
                clock,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Creation time in epoch seconds.
    #[must_use]
    pub fn created_at(&self) -> i64 {
        self.inner.created_at
    }

    /// Last access time in epoch seconds.
    #[must_use]
    pub fn last_accessed_at(&self) -> i64 {
        self.read().last_accessed_at
    }

    /// Get a copy of the message history.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.read().messages.clone()
    }

    /// Get the number of messages in the conversation.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.read().messages.len()
    }

    /// Consistent copy of the whole session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.read();
        SessionSnapshot {
            session_id: self.inner.id.clone(),
            created_at: self.inner.created_at,
            last_accessed_at: state.last_accessed_at,
            messages: state.messages.clone(),
        }
    }

    /// Append one turn (user message, then assistant reply) atomically.
    ///
    /// Returns the message count after the append.
    pub fn append_turn(&self, user: impl Into<String>, assistant: impl Into<String>) -> usize {
        let now = self.inner.clock.now();
        let mut state = self.write();
        state.messages.push(Message::user(user, now));
        state.messages.push(Message::assistant(assistant, now));
        state.last_accessed_at = now.max(state.last_accessed_at);
        state.messages.len()
    }

    /// Clear all messages from the session.
    pub fn clear(&self) {
        let now = self.inner.clock.now();
        let mut state = self.write();
        state.messages.clear();
        state.last_accessed_at = now.max(state.last_accessed_at);
    }

    /// Update the last access timestamp.
    fn touch(&self) {
        let now = self.inner.clock.now();
        let mut state = self.write();
        state.last_accessed_at = now.max(state.last_accessed_at);
    }

    /// Seconds since last access, as seen at `now`.
    fn idle_secs(&self, now: i64) -> i64 {
        now - self.read().last_accessed_at
    }

    /// Wait for exclusive use of this session for one chat turn.
    ///
    /// Turns are granted in request order, so concurrent requests on the
    /// same session never interleave their history reads and appends.
    pub async fn begin_turn(&self) -> TurnGuard {
        Arc::clone(&self.inner.turn_lock).lock_owned().await
    }
}

/// Thread-safe store for sessions.
///
/// All structural changes (insert, remove, expiry sweep) go through one
/// write lock on the backing map.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

#[derive(Debug)]
struct SessionStoreInner {
    sessions: RwLock<HashMap<String, Session>>,
    clock: Arc<dyn Clock>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create a new session store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new session store driven by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                clock,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a session, creating one when `id` is absent or unknown.
    ///
    /// A known id refreshes the session's last access time. An unknown id is
    /// never adopted: the new session always gets a freshly generated id.
    pub fn get_or_create(&self, id: Option<&str>) -> (String, Session) {
        let mut guard = self.write();

        if let Some(session) = id.filter(|id| !id.trim().is_empty()).and_then(|id| guard.get(id)) {
            session.touch();
            info!(
                session_id = %session.id(),
                message_count = session.message_count(),
                "Retrieved existing session"
            );
            return (session.id().to_string(), session.clone());
        }

        if let Some(requested) = id {
            debug!(requested_id = %requested, "Requested session not found, creating a new one");
        }

        let session_id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !guard.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Session::new(session_id.clone(), Arc::clone(&self.inner.clock));
        guard.insert(session_id.clone(), session.clone());
        info!(session_id = %session_id, "Created new session");
        (session_id, session)
    }

    /// Get a session by ID without refreshing it.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.read().get(id).cloned()
    }

    /// Wipe the history of a session, keeping the record.
    ///
    /// Returns `false` if the session is unknown.
    pub fn clear(&self, id: &str) -> bool {
        let guard = self.write();
        if let Some(session) = guard.get(id) {
            session.clear();
            info!(session_id = %id, "Cleared session");
            true
        } else {
            warn!(session_id = %id, "Attempted to clear non-existent session");
            false
        }
    }

    /// Remove a session entirely.
    ///
    /// Returns `false` if the session is unknown.
    pub fn delete(&self, id: &str) -> bool {
        if self.write().remove(id).is_some() {
            info!(session_id = %id, "Deleted session");
            true
        } else {
            warn!(session_id = %id, "Attempted to delete non-existent session");
            false
        }
    }

    /// Remove sessions that have been idle for longer than `timeout`.
    ///
    /// A session idle for exactly `timeout` survives. Returns the number of
    /// sessions removed.
    pub fn expire_older_than(&self, timeout: Duration) -> usize {
        let timeout = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
        let now = self.inner.clock.now();

        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|id, session| {
            let keep = session.idle_secs(now) <= timeout;
            if !keep {
                info!(session_id = %id, "Removed expired session");
            }
            keep
        });
        let removed = before - guard.len();

        if removed > 0 {
            info!(removed, remaining = guard.len(), "Cleaned up expired sessions");
        }
        removed
    }

    /// Snapshot of session and message totals.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let guard = self.read();
        SessionStats {
            total_sessions: guard.len(),
            total_messages: guard.values().map(Session::message_count).sum(),
        }
    }

    /// Get the number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

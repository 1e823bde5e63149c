//! Session and conversation thread management.
//!
//! This module provides in-memory session storage for managing conversation
//! state across multiple requests. Sessions are identified by UUID and contain
//! the full message history. Nothing outlives the process.
//!
//! # Architecture
//!
//! - [`Session`]: Represents a single conversation session
//! - [`SessionStore`]: Thread-safe store for all active sessions
//! - [`spawn_expiry_sweeper`]: Periodic removal of idle sessions
//! - [`Clock`]: Time source, swappable for deterministic tests
//!
//! # Example
//!
//! ```rust
//! use chat_relay::session::SessionStore;
//!
//! let store = SessionStore::new();
//! let (id, session) = store.get_or_create(None);
//! session.append_turn("Hello!", "Hi, how can I help?");
//!
//! assert_eq!(store.get(&id).unwrap().message_count(), 2);
//! assert_eq!(store.stats().total_messages, 2);
//! ```

mod clock;
mod sweeper;
mod thread;

pub use clock::{Clock, ManualClock, SystemClock};
pub use sweeper::spawn_expiry_sweeper;
pub use thread::{
    DEFAULT_SESSION_TIMEOUT, Message, MessageRole, Session, SessionSnapshot, SessionStats,
    SessionStore, TurnGuard,
};

//! Conversation store — in-memory, per-user history partitioned by provider family.
//!
//! Each `(family, user)` partition sits behind its own `tokio::sync::Mutex`.
//! Callers hold that lock for the whole provider round-trip, which is what keeps
//! two concurrent turns for the same user from interleaving their entries.
//!
//! Nothing is persisted; histories live until they go idle and are swept.

pub mod store;

pub use store::{ConversationHistory, ConversationStore, DEFAULT_HISTORY_LIMIT};

//! PenBot core — types and shared state used by every other crate.
//!
//! - [`types`]: conversation entries and chat-completion wire types
//! - [`session`]: the per-user, per-provider-family conversation store
//! - [`bus`]: inbound/outbound message queues between channels and the dispatcher
//! - [`config`]: schema, loading, and startup validation
//! - [`moderation`]: the guild moderation capability the chat platform provides

pub mod bus;
pub mod config;
pub mod moderation;
pub mod session;
pub mod types;
pub mod utils;

pub use session::ConversationStore;
pub use types::{ConversationEntry, ProviderFamily, Role};

//! LLM provider layer for PenBot.
//!
//! # Architecture
//!
//! - [`traits::ChatProvider`] — trait every backend implements
//! - [`http_provider::HttpProvider`] — OpenAI-compatible client (OpenRouter)
//! - [`gemini::GeminiProvider`] — Gemini `generateContent` client with its own sessions
//! - [`registry`] — static backend specs and the chain builder
//! - [`fallback::FallbackOrchestrator`] — tries the chain in order until one answers

pub mod error;
pub mod fallback;
pub mod gemini;
pub mod http_provider;
pub mod registry;
pub mod traits;

// Re-export main types for convenience
pub use error::ProviderError;
pub use fallback::{ChainOutcome, ChainReply, FallbackOrchestrator};
pub use gemini::GeminiProvider;
pub use http_provider::HttpProvider;
pub use registry::{build_chain, ProviderSpec, PROVIDERS};
pub use traits::{ChatProvider, ProviderResult};

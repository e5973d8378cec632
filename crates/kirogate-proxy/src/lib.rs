//! kirogate - Anthropic-compatible gateway over the Kiro streaming backend.
//!
//! The public edge speaks (a subset of) Anthropic's `/v1/messages` API. The
//! private edge speaks the Kiro/CodeWhisperer protocol: a JSON request, a
//! binary event-stream response (decoded by the `kirogate-wire` crate), and
//! an OAuth refresh-token flow for short-lived access tokens.
//!
//! Design goals:
//! - Accept Anthropic wire-format traffic unchanged (including SSE streaming).
//! - Translate requests into the upstream `conversationState` shape.
//! - Re-emit upstream events as Anthropic SSE, or aggregate them into one
//!   JSON response for non-streaming calls.
//! - Keep exactly one refresh in flight no matter how many requests race.

pub mod auth;
pub mod config;
pub mod error;
pub mod kiro;
pub mod models;
pub mod server;
pub mod streaming;
pub mod tokens;
pub mod translation;
pub mod types;
pub mod upstream;

pub use config::Config;
pub use server::serve;

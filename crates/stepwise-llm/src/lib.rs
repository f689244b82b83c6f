//! Chat-completion boundary for stepwise.
//!
//! The agent crate talks to a language model exclusively through the types in this crate:
//! a role-tagged [`Message`] transcript plus [`ToolDefinition`]s go out as a [`Request`], and a
//! single [`Response`] choice comes back carrying text, optional [`ToolCall`]s and a
//! [`FinishReason`].

pub mod client;
pub mod errors;
pub mod openai;
pub mod provider;
pub mod types;

pub use client::*;
pub use errors::*;
pub use openai::*;
pub use provider::*;
pub use types::*;

//! Task orchestration and sandboxed execution for stepwise.
//!
//! A [`Workflow`] decomposes a user goal through a shared [`TaskLedger`]: an orchestrator
//! [`AgentLoop`] creates one task at a time, a worker loop completes it with file and shell tools
//! dispatched by a [`ToolRegistry`], and an optional context-refine loop tidies what the worker
//! recorded. Shell commands run through the [`sandbox::SandboxedExecutor`], which reports the
//! files a command touched without disturbing the repository's own index; edits go through the
//! [`patch::PatchApplier`].

pub mod agent_loop;
pub mod config;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod mcp;
pub mod patch;
pub mod profiles;
pub mod sandbox;
pub mod schema;
pub mod tools;
pub mod truncation;
pub mod workflow;

pub use agent_loop::{AbortHandle, AgentLoop, LoopOutcome, LoopState};
pub use config::*;
pub use errors::*;
pub use events::*;
pub use ledger::{ContextEntry, SharedLedger, TaskItem, TaskLedger};
pub use profiles::AgentRole;
pub use tools::{
    BashResult, RegisteredTool, Tool, ToolExecutionRecord, ToolExecutor, ToolFuture,
    ToolRegistry, render_envelope,
};
pub use truncation::*;
pub use workflow::Workflow;

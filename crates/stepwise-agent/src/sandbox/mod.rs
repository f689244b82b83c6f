//! Shell execution with change tracking.

mod classify;
mod executor;
mod parse;

pub use classify::{READ_ONLY_WHITELIST, RunMode, classify};
pub use executor::{ExecOutcome, FileChanges, SandboxedExecutor};
pub use parse::{
    CommandName, Invocation, ParsedScript, Redirect, RedirectKind, Word, parse_command,
};

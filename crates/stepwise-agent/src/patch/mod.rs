//! Unified-diff application for single files.

mod apply;
mod parser;
mod types;

pub use apply::PatchApplier;
pub use parser::{summarize_diff, validate_diff};
pub use types::{AppliedPatch, DiffSummary, HunkHeader};

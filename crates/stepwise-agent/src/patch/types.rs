use std::path::PathBuf;

/// Hunk header of a unified diff. Counts are optional in the wire format and default to 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HunkHeader {
    pub old_start: u64,
    pub old_len: u64,
    pub new_start: u64,
    pub new_len: u64,
}

/// What validation needs to know about a diff before any process is spawned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffSummary {
    /// Paths named by `+++` headers, with an optional `b/` prefix removed.
    pub targets: Vec<String>,
    pub hunks: Vec<HunkHeader>,
}

/// Outcome of a successful application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedPatch {
    pub path: PathBuf,
    pub hunks: usize,
}

//! Conflict detection and resolution.
//!
//! Detection is a pure three-way comparison of the current local and remote
//! timestamps against the last-synced snapshot. No I/O happens here; the
//! dispatcher gathers the inputs and acts on the verdict.

use chrono::{DateTime, Utc};
use marksync_core::SyncSnapshot;

/// Timestamp difference below which two timestamps count as unchanged.
///
/// Absorbs clock drift and filesystem timestamp granularity.
pub const TIMESTAMP_TOLERANCE_MS: i64 = 5000;

/// Which side of the sync pair changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The local document.
    Local,
    /// The remote record.
    Remote,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// How a detected situation should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Push the local document to the remote record.
    LocalWins,
    /// Pull the remote record into the local document.
    RemoteWins,
    /// Both sides changed; a human must merge.
    ManualMerge,
}

/// The verdict of a three-way timestamp comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResult {
    /// True when both sides changed since the last sync.
    pub has_conflict: bool,
    /// The resolution to apply.
    pub strategy: ResolutionStrategy,
    /// Diagnostic explanation of the verdict.
    pub reason: String,
    /// Exactly which sides exceeded tolerance.
    pub changed_sides: Vec<Side>,
    /// Unified diff of the two contents, when one was generated.
    pub content_diff: Option<String>,
}

/// Compares current timestamps against the last-synced snapshot.
///
/// With no snapshot this is a first sync: nothing to protect, local wins.
/// Otherwise a side counts as changed when its timestamp moved more than
/// [`TIMESTAMP_TOLERANCE_MS`] from the snapshot baseline.
pub fn detect_conflict(
    local_modified_at: DateTime<Utc>,
    remote_updated_at: DateTime<Utc>,
    snapshot: Option<&SyncSnapshot>,
) -> ConflictResult {
    let Some(snapshot) = snapshot else {
        return ConflictResult {
            has_conflict: false,
            strategy: ResolutionStrategy::LocalWins,
            reason: "no previous sync state; treating as first sync".into(),
            changed_sides: Vec::new(),
            content_diff: None,
        };
    };

    let local_changed = exceeds_tolerance(local_modified_at, snapshot.local_modified_at);
    let remote_changed = exceeds_tolerance(remote_updated_at, snapshot.remote_updated_at);

    let mut changed_sides = Vec::new();
    if local_changed {
        changed_sides.push(Side::Local);
    }
    if remote_changed {
        changed_sides.push(Side::Remote);
    }

    let (has_conflict, strategy, reason) = match (local_changed, remote_changed) {
        (false, false) => (
            false,
            ResolutionStrategy::LocalWins,
            "neither side changed since last sync".to_string(),
        ),
        (true, false) => (
            false,
            ResolutionStrategy::LocalWins,
            "only the local document changed since last sync".to_string(),
        ),
        (false, true) => (
            false,
            ResolutionStrategy::RemoteWins,
            "only the remote record changed since last sync".to_string(),
        ),
        (true, true) => (
            true,
            ResolutionStrategy::ManualMerge,
            "both sides changed since last sync".to_string(),
        ),
    };

    ConflictResult {
        has_conflict,
        strategy,
        reason,
        changed_sides,
        content_diff: None,
    }
}

fn exceeds_tolerance(current: DateTime<Utc>, baseline: DateTime<Utc>) -> bool {
    (current - baseline).num_milliseconds().abs() > TIMESTAMP_TOLERANCE_MS
}

/// The outcome of applying a resolution strategy to two contents.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConflict {
    /// The nominal winner: what gets written back locally.
    pub winner: Side,
    /// The resolved content.
    pub content: String,
    /// Human-readable summary of what was decided.
    pub summary: String,
    /// True when the content contains conflict markers to resolve by hand.
    pub requires_manual: bool,
}

/// Applies a resolution strategy to the two sides' contents.
///
/// `LocalWins` and `RemoteWins` select a side outright. `ManualMerge`
/// frames both versions with textual conflict markers and reports local as
/// the nominal winner, flagging that a human has to finish the job.
pub fn resolve_conflict(
    strategy: ResolutionStrategy,
    local: &str,
    remote: &str,
) -> ResolvedConflict {
    match strategy {
        ResolutionStrategy::LocalWins => ResolvedConflict {
            winner: Side::Local,
            content: local.to_string(),
            summary: "kept the local version".into(),
            requires_manual: false,
        },
        ResolutionStrategy::RemoteWins => ResolvedConflict {
            winner: Side::Remote,
            content: remote.to_string(),
            summary: "took the remote version".into(),
            requires_manual: false,
        },
        ResolutionStrategy::ManualMerge => {
            let mut content = String::new();
            content.push_str("<<<<<<< LOCAL\n");
            content.push_str(local);
            if !local.ends_with('\n') && !local.is_empty() {
                content.push('\n');
            }
            content.push_str("=======\n");
            content.push_str(remote);
            if !remote.ends_with('\n') && !remote.is_empty() {
                content.push('\n');
            }
            content.push_str(">>>>>>> REMOTE\n");
            ResolvedConflict {
                winner: Side::Local,
                content,
                summary: "both sides changed; conflict markers inserted for manual merge".into(),
                requires_manual: true,
            }
        }
    }
}

/// Generates a unified diff between remote and local content.
///
/// The header is fixed (`--- remote`, `+++ local`); hunk lines carry
/// `-` for remote-only lines, `+` for local-only lines, and a space for
/// common lines, using line-granularity LCS.
pub fn generate_content_diff(local: &str, remote: &str) -> String {
    let remote_lines: Vec<&str> = remote.lines().collect();
    let local_lines: Vec<&str> = local.lines().collect();

    let mut out = String::from("--- remote\n+++ local\n");
    for op in diff_ops(&remote_lines, &local_lines) {
        match op {
            DiffOp::Common(line) => {
                out.push(' ');
                out.push_str(line);
                out.push('\n');
            }
            DiffOp::Removed(line) => {
                out.push('-');
                out.push_str(line);
                out.push('\n');
            }
            DiffOp::Added(line) => {
                out.push('+');
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

enum DiffOp<'a> {
    Common(&'a str),
    Removed(&'a str),
    Added(&'a str),
}

/// Line-granularity LCS walk over the two sides.
fn diff_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<DiffOp<'a>> {
    // Classic LCS length table, then a backward walk to emit operations.
    let n = old.len();
    let m = new.len();
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(DiffOp::Common(old[i]));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push(DiffOp::Removed(old[i]));
            i += 1;
        } else {
            ops.push(DiffOp::Added(new[j]));
            j += 1;
        }
    }
    while i < n {
        ops.push(DiffOp::Removed(old[i]));
        i += 1;
    }
    while j < m {
        ops.push(DiffOp::Added(new[j]));
        j += 1;
    }
    ops
}

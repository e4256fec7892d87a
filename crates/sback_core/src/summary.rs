//! Deterministic session naming and tagging.

use crate::config::TagConfig;
use crate::types::{ChangeRecord, Trigger};
use std::collections::BTreeSet;
use std::path::Path;

/// How many file stems the display name carries before falling back.
const NAME_STEMS: usize = 3;

/// Aggregate edit metrics computed at finalize from blob contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditStats {
    /// Total lines added across all changes (after − before, clamped).
    pub added_lines: u64,
}

/// Burst metrics supplied by a collaborator (e.g. the editor integration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstMetrics {
    /// Change events per minute over the session.
    pub events_per_min: u32,
}

/// Counts logical lines in a byte buffer.
///
/// A trailing partial line counts; empty content is zero lines.
pub fn line_count(bytes: &[u8]) -> u64 {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count() as u64;
    if bytes.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}

/// Produces the deterministic display name for a finalized session.
///
/// The first [`NAME_STEMS`] unique file stems in event order become
/// `Updated a, b, c`; when no stem can be extracted the name falls back to
/// `Updated N files` over the distinct path count.
pub fn session_name(changes: &[ChangeRecord]) -> String {
    let mut seen = BTreeSet::new();
    let mut stems = Vec::new();

    for change in changes {
        if stems.len() >= NAME_STEMS {
            break;
        }
        let file_name = change.path.rsplit('/').next().unwrap_or(&change.path);
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        if stem.is_empty() {
            continue;
        }
        if seen.insert(stem.to_string()) {
            stems.push(stem.to_string());
        }
    }

    if stems.is_empty() {
        let distinct: BTreeSet<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        format!("Updated {} files", distinct.len())
    } else {
        format!("Updated {}", stems.join(", "))
    }
}

/// Derives the ordered tag set for a finalized session.
pub fn session_tags(
    changes: &[ChangeRecord],
    started_at: i64,
    ended_at: i64,
    triggers: &[Trigger],
    config: &TagConfig,
    edits: Option<&EditStats>,
    burst: Option<&BurstMetrics>,
) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: &str, tags: &mut Vec<String>| {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    };

    let distinct_paths: BTreeSet<&str> = changes.iter().map(|c| c.path.as_str()).collect();
    if distinct_paths.len() > config.multi_file_paths {
        push("multi-file", &mut tags);
    }

    let duration_ms = (ended_at - started_at).max(0) as u64;
    if duration_ms > config.long_session_ms {
        push("long-session", &mut tags);
    } else if duration_ms < config.short_session_ms {
        push("short-session", &mut tags);
    }

    if let Some(edits) = edits {
        if edits.added_lines > config.large_edit_lines {
            push("large-edits", &mut tags);
        }
    }

    for trigger in triggers {
        match trigger {
            Trigger::Manual => push("manual", &mut tags),
            Trigger::IdleFinalize => push("idle-break", &mut tags),
            Trigger::Blur => push("blur", &mut tags),
            Trigger::PreCommit => push("commit", &mut tags),
            Trigger::Task => push("task", &mut tags),
            Trigger::MaxDuration => push("max-duration", &mut tags),
            Trigger::Filewatch => {}
        }
    }

    if let Some(burst) = burst {
        if burst.events_per_min > config.burst_events_per_min {
            push("burst", &mut tags);
        }
    }

    tags
}

//! Append-only task journal (JSON Lines).
//!
//! A run's entries are serialized up front and written with a single
//! `write_all` on an append-mode handle, so one run never interleaves with
//! another as long as there is one writer per journal at a time.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use super::protocol::DispatchRequest;
use super::reconciler::BlockedJournalEntry;
use crate::{clog_debug, Result};

/// One journal line: a task request (dispatch or follow-up) or a blocked entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JournalEntry {
    Request(DispatchRequest),
    Blocked(BlockedJournalEntry),
}

/// Order entries for the journal: dispatches, then follow-ups, then blocked.
pub fn journal_batch(
    dispatch_entries: &[DispatchRequest],
    follow_ups: &[DispatchRequest],
    blocked_entries: &[BlockedJournalEntry],
) -> Vec<JournalEntry> {
    dispatch_entries
        .iter()
        .chain(follow_ups)
        .cloned()
        .map(JournalEntry::Request)
        .chain(blocked_entries.iter().cloned().map(JournalEntry::Blocked))
        .collect()
}

/// Append `entries` to the journal, one JSON record per line.
///
/// Returns the number of lines written. An empty batch touches nothing.
pub fn append_journal(path: &Path, entries: &[JournalEntry]) -> Result<usize> {
    if entries.is_empty() {
        return Ok(0);
    }

    let mut buffer = String::new();
    for entry in entries {
        buffer.push_str(&serde_json::to_string(entry)?);
        buffer.push('\n');
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(buffer.as_bytes())?;
    file.flush()?;

    clog_debug!("appended {} entries to {}", entries.len(), path.display());
    Ok(entries.len())
}

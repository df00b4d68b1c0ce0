//! Reconstruction of destination notes from a ticket's flat change log.
//!
//! Trac records an attachment as two consecutive change-log rows: the
//! `attachment` row naming the file, then a `comment` row carrying its
//! description. The walk is a two-state machine over those rows.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{ChangeKind, ChangeLogEntry};

/// A note derived from the change log, still in source terms: the author is
/// a Trac identity, the body unconverted markup and the attachment only a
/// filename whose payload has not been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryNote {
    pub at: DateTime<Utc>,
    pub author: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryState {
    Idle,
    PendingAttachment {
        at: DateTime<Utc>,
        author: String,
        filename: String,
    },
}

/// Advance the machine by one change-log row, returning the notes it completes.
///
/// An attachment row arriving while another attachment is still pending
/// flushes the earlier one as its own empty-body note.
pub fn step(state: HistoryState, entry: &ChangeLogEntry) -> (HistoryState, Vec<HistoryNote>) {
    match (&entry.kind, state) {
        (ChangeKind::Attachment, pending) => {
            let flushed = flush(pending).into_iter().collect();
            let next = HistoryState::PendingAttachment {
                at: entry.at,
                author: entry.author.clone(),
                filename: entry.new_value.clone(),
            };
            (next, flushed)
        }
        (ChangeKind::Comment, HistoryState::PendingAttachment { filename, .. }) => {
            let note = HistoryNote {
                at: entry.at,
                author: entry.author.clone(),
                body: entry.new_value.clone(),
                attachment: Some(filename),
            };
            (HistoryState::Idle, vec![note])
        }
        (ChangeKind::Comment, HistoryState::Idle) => {
            if entry.new_value.is_empty() {
                return (HistoryState::Idle, Vec::new());
            }
            let note = HistoryNote {
                at: entry.at,
                author: entry.author.clone(),
                body: entry.new_value.clone(),
                attachment: None,
            };
            (HistoryState::Idle, vec![note])
        }
        (ChangeKind::FieldUpdate, state) => (state, Vec::new()),
    }
}

/// Close out the walk: a still-pending attachment becomes an empty-body note.
pub fn flush(state: HistoryState) -> Option<HistoryNote> {
    match state {
        HistoryState::Idle => None,
        HistoryState::PendingAttachment {
            at,
            author,
            filename,
        } => Some(HistoryNote {
            at,
            author,
            body: String::new(),
            attachment: Some(filename),
        }),
    }
}

/// Turn a chronologically ordered change log into the ordered note sequence.
pub fn reconstruct(change_log: &[ChangeLogEntry]) -> Vec<HistoryNote> {
    let mut notes = Vec::new();
    let mut state = HistoryState::Idle;
    for entry in change_log {
        let (next, emitted) = step(state, entry);
        notes.extend(emitted);
        state = next;
    }
    notes.extend(flush(state));
    notes
}

use serde::Serialize;

use crate::model::{IssueState, MilestoneId, MilestoneState};

/// What a run did, in the order it did it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub project: String,
    pub project_id: u64,
    pub overwrite: bool,
    pub cleared_issues: usize,
    pub milestones: Vec<MilestoneOutcome>,
    pub tickets: Vec<TicketOutcome>,
    /// Source ticket ids left out by the allow-list.
    pub skipped: Vec<u64>,
    pub wiki: Vec<WikiOutcome>,
    /// Pages whose whole history belongs to excluded authors.
    pub excluded_pages: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneOutcome {
    pub name: String,
    pub id: MilestoneId,
    pub state: MilestoneState,
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketOutcome {
    pub source_id: u64,
    pub iid: u64,
    pub title: String,
    pub state: Option<IssueState>,
    pub labels: Vec<String>,
    pub notes: usize,
    pub attachments: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiOutcome {
    pub source: String,
    pub name: String,
    pub version: u32,
    pub author: String,
    pub attachments: Vec<String>,
    /// Attachments listed in the generated section because nothing linked them.
    pub unlinked: Vec<String>,
}

impl MigrationReport {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn note_count(&self) -> usize {
        self.tickets.iter().map(|t| t.notes).sum()
    }
}

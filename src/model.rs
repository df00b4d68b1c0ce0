use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Free-form ticket attributes as Trac reports them. Every field defaults to
/// the empty string so tickets from trimmed-down Trac setups still parse.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketFields {
    pub summary: String,
    pub description: String,
    pub priority: String,
    pub resolution: String,
    pub version: String,
    pub component: String,
    pub status: String,
    pub owner: String,
    pub reporter: String,
    pub milestone: String,
}

impl TicketFields {
    /// Referenced milestone name, if the ticket carries one.
    pub fn milestone(&self) -> Option<&str> {
        let name = self.milestone.trim();
        (!name.is_empty()).then_some(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fields: TicketFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Comment,
    Attachment,
    FieldUpdate,
}

impl ChangeKind {
    /// Trac reports the change kind through the field name of the change.
    pub fn from_field(field: &str) -> Self {
        match field {
            "comment" => Self::Comment,
            "attachment" => Self::Attachment,
            _ => Self::FieldUpdate,
        }
    }
}

/// One row of a ticket's change log, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub at: DateTime<Utc>,
    pub author: String,
    pub kind: ChangeKind,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMilestone {
    pub name: String,
    pub description: String,
    pub completed: bool,
    pub due: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiPageInfo {
    pub name: String,
    pub author: String,
    pub version: u32,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Opened,
    Reopened,
    Closed,
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Reopened => write!(f, "reopened"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl IssueState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "opened" => Some(Self::Opened),
            "reopened" => Some(Self::Reopened),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneState {
    Active,
    Closed,
}

impl std::fmt::Display for MilestoneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

pub type ProjectId = u64;
pub type UserId = u64;
pub type MilestoneId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMilestone {
    pub title: String,
    pub description: String,
    pub state: MilestoneState,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    /// Forced issue number (overwrite mode); `None` lets the destination allocate.
    pub iid: Option<u64>,
    pub title: String,
    pub description: String,
    /// `None` leaves the destination default (opened) in place.
    pub state: Option<IssueState>,
    pub labels: Vec<String>,
    pub assignee: Option<UserId>,
    pub author: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub milestone: Option<MilestoneId>,
}

/// Handle to an issue the destination has just created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreatedIssue {
    pub id: u64,
    pub iid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteAttachment {
    pub filename: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub body: String,
    pub author: UserId,
    pub created_at: DateTime<Utc>,
    pub attachment: Option<NoteAttachment>,
}

/// A converted wiki page ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiPage {
    pub name: String,
    pub body: String,
    pub version: u32,
    pub last_modified: DateTime<Utc>,
    pub author: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_fields_tolerate_missing_keys() {
        let fields: TicketFields =
            serde_json::from_str(r#"{"summary": "Crash on save", "status": "new"}"#).unwrap();
        assert_eq!(fields.summary, "Crash on save");
        assert_eq!(fields.component, "");
        assert_eq!(fields.milestone(), None);
    }

    #[test]
    fn blank_milestone_is_no_reference() {
        let fields = TicketFields {
            milestone: "  ".into(),
            ..TicketFields::default()
        };
        assert_eq!(fields.milestone(), None);

        let fields = TicketFields {
            milestone: "1.0".into(),
            ..TicketFields::default()
        };
        assert_eq!(fields.milestone(), Some("1.0"));
    }

    #[test]
    fn change_kind_from_trac_field() {
        assert_eq!(ChangeKind::from_field("comment"), ChangeKind::Comment);
        assert_eq!(ChangeKind::from_field("attachment"), ChangeKind::Attachment);
        assert_eq!(ChangeKind::from_field("status"), ChangeKind::FieldUpdate);
    }

    #[test]
    fn issue_state_serializes_snake_case() {
        let json = serde_json::to_string(&IssueState::Reopened).unwrap();
        assert_eq!(json, r#""reopened""#);
        assert_eq!(IssueState::parse("closed"), Some(IssueState::Closed));
        assert_eq!(IssueState::parse(""), None);
    }
}

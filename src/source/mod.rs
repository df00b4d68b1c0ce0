pub mod rpc;

use crate::error::Result;
use crate::model::{ChangeLogEntry, SourceMilestone, Ticket, WikiPageInfo};

/// Read-only view of the tracker being migrated from.
pub trait Source {
    fn milestone_names(&self) -> Result<Vec<String>>;
    fn milestone(&self, name: &str) -> Result<SourceMilestone>;

    /// All ticket ids, ascending.
    fn ticket_ids(&self) -> Result<Vec<u64>>;
    /// Ticket details for `ids`, fetched as one logical request.
    fn tickets(&self, ids: &[u64]) -> Result<Vec<Ticket>>;
    /// The ticket's change log in chronological order.
    fn change_log(&self, ticket: u64) -> Result<Vec<ChangeLogEntry>>;
    fn ticket_attachment(&self, ticket: u64, filename: &str) -> Result<Vec<u8>>;

    fn wiki_page_names(&self) -> Result<Vec<String>>;
    /// Latest revision info when `version` is `None`.
    fn wiki_page_info(&self, name: &str, version: Option<u32>) -> Result<WikiPageInfo>;
    fn wiki_page(&self, name: &str) -> Result<String>;
    /// Attachment paths of the form `Page/filename`.
    fn wiki_attachment_names(&self, page: &str) -> Result<Vec<String>>;
    fn wiki_attachment(&self, path: &str) -> Result<Vec<u8>>;
}

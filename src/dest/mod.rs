pub mod api;
pub mod direct;

use std::path::Path;

use crate::error::Result;
use crate::model::{
    CreatedIssue, MilestoneId, NewIssue, NewMilestone, Note, ProjectId, UserId, WikiPage,
};
use crate::store::wiki::WikiRepo;

/// Write access to the tracker being migrated into.
pub trait Destination {
    /// Fails with `ProjectNotFound` when no project carries `name`.
    fn project_id(&self, name: &str) -> Result<ProjectId>;

    /// `None` when the destination has no such user.
    fn user_id(&self, username: &str) -> Result<Option<UserId>>;

    fn create_milestone(&self, project: ProjectId, milestone: &NewMilestone)
    -> Result<MilestoneId>;

    /// Bring an existing milestone's description, state and due date in line.
    fn update_milestone(
        &self,
        project: ProjectId,
        id: MilestoneId,
        milestone: &NewMilestone,
    ) -> Result<()>;

    fn find_milestone(&self, project: ProjectId, title: &str) -> Result<Option<MilestoneId>>;

    /// Remove every issue (and its notes) of `project`; returns how many went.
    fn clear_issues(&self, project: ProjectId) -> Result<usize>;

    /// Honors `issue.iid` when set, otherwise allocates the next number.
    fn create_issue(&self, project: ProjectId, issue: &NewIssue) -> Result<CreatedIssue>;

    fn comment_issue(&self, project: ProjectId, issue: &CreatedIssue, note: &Note) -> Result<u64>;

    /// Store a wiki attachment and return the link target pages should use.
    fn save_wiki_attachment(&self, project: ProjectId, name: &str, payload: &[u8])
    -> Result<String>;

    /// Persist a page into the wiki repository at `target`.
    fn save_wiki_page(&self, page: &WikiPage, target: &Path) -> Result<()> {
        WikiRepo::open_or_init(target)?.save_page(page)
    }
}

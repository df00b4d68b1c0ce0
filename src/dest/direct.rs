//! Direct-storage destination: writes the GitLab-shaped tables of a SQLite
//! database and places uploaded files under an uploads directory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::dest::Destination;
use crate::error::{MigrateError, Result};
use crate::markup::convert::MIGRATED_UPLOADS;
use crate::model::{
    CreatedIssue, IssueState, MilestoneId, MilestoneState, NewIssue, NewMilestone, Note,
    ProjectId, UserId,
};
use crate::store::lock;

pub struct DirectStore {
    conn: Connection,
    uploads: PathBuf,
    _lock: Option<File>,
}

/// An issue row as stored, with its labels in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIssue {
    pub id: u64,
    pub iid: u64,
    pub title: String,
    pub description: String,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub author_id: Option<UserId>,
    pub assignee_id: Option<UserId>,
    pub milestone_id: Option<MilestoneId>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNote {
    pub id: u64,
    pub body: String,
    pub author_id: Option<UserId>,
    pub attachment: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMilestone {
    pub id: MilestoneId,
    pub title: String,
    pub state: String,
    pub due_date: Option<String>,
}

impl DirectStore {
    /// Open (creating if needed) the database at `path`, holding an exclusive
    /// run lock next to it until the store is dropped.
    pub fn open(path: &Path, uploads: &Path) -> Result<Self> {
        let lock_path = path.with_extension("lock");
        let lock_file = lock::acquire_lock(&lock_path)?;
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn,
            uploads: uploads.to_path_buf(),
            _lock: Some(lock_file),
        };
        store.create_tables()?;
        Ok(store)
    }

    pub fn open_memory(uploads: &Path) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn,
            uploads: uploads.to_path_buf(),
            _lock: None,
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS milestones (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL REFERENCES projects(id),
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT 'active',
                due_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS issues (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL REFERENCES projects(id),
                iid INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT 'opened',
                author_id INTEGER REFERENCES users(id),
                assignee_id INTEGER REFERENCES users(id),
                milestone_id INTEGER REFERENCES milestones(id),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (project_id, iid)
            );
            CREATE TABLE IF NOT EXISTS labels (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL REFERENCES projects(id),
                title TEXT NOT NULL,
                UNIQUE (project_id, title)
            );
            CREATE TABLE IF NOT EXISTS label_links (
                issue_id INTEGER NOT NULL REFERENCES issues(id),
                label_id INTEGER NOT NULL REFERENCES labels(id),
                position INTEGER NOT NULL,
                PRIMARY KEY (issue_id, label_id)
            );
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL REFERENCES projects(id),
                noteable_type TEXT NOT NULL DEFAULT 'Issue',
                noteable_id INTEGER NOT NULL REFERENCES issues(id),
                note TEXT NOT NULL,
                author_id INTEGER REFERENCES users(id),
                attachment TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);
            CREATE INDEX IF NOT EXISTS idx_notes_noteable ON notes(noteable_id);",
        )?;
        Ok(())
    }

    pub fn add_project(&self, name: &str) -> Result<ProjectId> {
        self.conn
            .execute("INSERT INTO projects (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid() as ProjectId)
    }

    pub fn add_user(&self, username: &str) -> Result<UserId> {
        self.conn
            .execute("INSERT INTO users (username) VALUES (?1)", params![username])?;
        Ok(self.conn.last_insert_rowid() as UserId)
    }

    fn next_iid(&self, project: ProjectId) -> Result<u64> {
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(iid), 0) + 1 FROM issues WHERE project_id = ?1",
            params![project],
            |row| row.get(0),
        )?;
        Ok(next as u64)
    }

    fn label_id(&self, project: ProjectId, title: &str) -> Result<u64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO labels (project_id, title) VALUES (?1, ?2)",
            params![project, title],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM labels WHERE project_id = ?1 AND title = ?2",
            params![project, title],
            |row| row.get(0),
        )?;
        Ok(id as u64)
    }

    fn note_attachment_dir(&self, note_id: u64) -> PathBuf {
        self.uploads
            .join("note")
            .join("attachment")
            .join(note_id.to_string())
    }

    pub fn issues(&self, project: ProjectId) -> Result<Vec<StoredIssue>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, iid, title, description, state, author_id, assignee_id, milestone_id, created_at
             FROM issues WHERE project_id = ?1 ORDER BY iid",
        )?;
        let rows = stmt.query_map(params![project], |row| {
            let state: String = row.get(4)?;
            Ok(StoredIssue {
                id: row.get(0)?,
                iid: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                state: IssueState::parse(&state).unwrap_or(IssueState::Opened),
                labels: Vec::new(),
                author_id: row.get(5)?,
                assignee_id: row.get(6)?,
                milestone_id: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;
        let mut issues = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        for issue in &mut issues {
            issue.labels = self.issue_labels(issue.id)?;
        }
        Ok(issues)
    }

    fn issue_labels(&self, issue_id: u64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.title FROM label_links ll JOIN labels l ON l.id = ll.label_id
             WHERE ll.issue_id = ?1 ORDER BY ll.position",
        )?;
        let rows = stmt.query_map(params![issue_id], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<String>, _>>()?)
    }

    pub fn notes(&self, issue_id: u64) -> Result<Vec<StoredNote>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, note, author_id, attachment, created_at FROM notes
             WHERE noteable_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![issue_id], |row| {
            Ok(StoredNote {
                id: row.get(0)?,
                body: row.get(1)?,
                author_id: row.get(2)?,
                attachment: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn milestones(&self, project: ProjectId) -> Result<Vec<StoredMilestone>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, state, due_date FROM milestones WHERE project_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![project], |row| {
            Ok(StoredMilestone {
                id: row.get(0)?,
                title: row.get(1)?,
                state: row.get(2)?,
                due_date: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn milestone_state(state: MilestoneState) -> &'static str {
    match state {
        MilestoneState::Active => "active",
        MilestoneState::Closed => "closed",
    }
}

/// Last usable path component, so a source filename cannot leave the
/// note's attachment directory.
fn attachment_filename(name: &str) -> &str {
    name.rsplit(['/', '\\'])
        .find(|part| !part.is_empty() && *part != "." && *part != "..")
        .unwrap_or("attachment")
}

impl Destination for DirectStore {
    fn project_id(&self, name: &str) -> Result<ProjectId> {
        self.conn
            .query_row(
                "SELECT id FROM projects WHERE name = ?1",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|id| id as ProjectId)
            .ok_or_else(|| MigrateError::ProjectNotFound(name.to_string()))
    }

    fn user_id(&self, username: &str) -> Result<Option<UserId>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![username],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|id| id as UserId))
    }

    fn create_milestone(
        &self,
        project: ProjectId,
        milestone: &NewMilestone,
    ) -> Result<MilestoneId> {
        let now = timestamp(&Utc::now());
        self.conn.execute(
            "INSERT INTO milestones (project_id, title, description, state, due_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                project,
                milestone.title,
                milestone.description,
                milestone_state(milestone.state),
                milestone.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid() as MilestoneId)
    }

    fn update_milestone(
        &self,
        project: ProjectId,
        id: MilestoneId,
        milestone: &NewMilestone,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE milestones SET description = ?1, state = ?2, due_date = ?3, updated_at = ?4
             WHERE id = ?5 AND project_id = ?6",
            params![
                milestone.description,
                milestone_state(milestone.state),
                milestone.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
                timestamp(&Utc::now()),
                id,
                project,
            ],
        )?;
        Ok(())
    }

    fn find_milestone(&self, project: ProjectId, title: &str) -> Result<Option<MilestoneId>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM milestones WHERE project_id = ?1 AND title = ?2 ORDER BY id LIMIT 1",
                params![project, title],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|id| id as MilestoneId))
    }

    fn clear_issues(&self, project: ProjectId) -> Result<usize> {
        let note_ids: Vec<u64> = {
            let mut stmt = self.conn.prepare(
                "SELECT n.id FROM notes n JOIN issues i ON i.id = n.noteable_id
                 WHERE i.project_id = ?1 AND n.attachment IS NOT NULL",
            )?;
            let rows = stmt.query_map(params![project], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM notes WHERE noteable_id IN (SELECT id FROM issues WHERE project_id = ?1)",
            params![project],
        )?;
        tx.execute(
            "DELETE FROM label_links WHERE issue_id IN (SELECT id FROM issues WHERE project_id = ?1)",
            params![project],
        )?;
        let removed = tx.execute("DELETE FROM issues WHERE project_id = ?1", params![project])?;
        tx.commit()?;

        for note_id in note_ids {
            let dir = self.note_attachment_dir(note_id);
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        Ok(removed)
    }

    fn create_issue(&self, project: ProjectId, issue: &NewIssue) -> Result<CreatedIssue> {
        let iid = match issue.iid {
            Some(iid) => iid,
            None => self.next_iid(project)?,
        };
        let state = issue.state.unwrap_or(IssueState::Opened).to_string();

        let label_ids = issue
            .labels
            .iter()
            .map(|label| self.label_id(project, label))
            .collect::<Result<Vec<_>>>()?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO issues (project_id, iid, title, description, state, author_id, assignee_id, milestone_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                project,
                iid,
                issue.title,
                issue.description,
                state,
                issue.author,
                issue.assignee,
                issue.milestone,
                timestamp(&issue.created_at),
                timestamp(&issue.updated_at),
            ],
        )?;
        let id = tx.last_insert_rowid() as u64;
        for (position, label_id) in label_ids.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO label_links (issue_id, label_id, position) VALUES (?1, ?2, ?3)",
                params![id, label_id, position as i64],
            )?;
        }
        tx.commit()?;
        debug!(iid, id, "stored issue");
        Ok(CreatedIssue { id, iid })
    }

    fn comment_issue(&self, project: ProjectId, issue: &CreatedIssue, note: &Note) -> Result<u64> {
        let at = timestamp(&note.created_at);
        self.conn.execute(
            "INSERT INTO notes (project_id, noteable_id, note, author_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![project, issue.id, note.body, note.author, at],
        )?;
        let note_id = self.conn.last_insert_rowid() as u64;

        if let Some(attachment) = &note.attachment {
            let filename = attachment_filename(&attachment.filename);
            let dir = self.note_attachment_dir(note_id);
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(filename), &attachment.payload)?;
            self.conn.execute(
                "UPDATE notes SET attachment = ?1 WHERE id = ?2",
                params![filename, note_id],
            )?;
        }
        Ok(note_id)
    }

    fn save_wiki_attachment(
        &self,
        _project: ProjectId,
        name: &str,
        payload: &[u8],
    ) -> Result<String> {
        let dir = self.uploads.join("migrated");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(name), payload)?;
        Ok(format!("{MIGRATED_UPLOADS}{name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NoteAttachment;
    use chrono::{NaiveDate, TimeZone};
    use tempfile::tempdir;

    fn issue(iid: Option<u64>, title: &str, labels: &[&str], author: UserId) -> NewIssue {
        let at = Utc.with_ymd_and_hms(2012, 5, 1, 8, 0, 0).unwrap();
        NewIssue {
            iid,
            title: title.into(),
            description: String::new(),
            state: None,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            assignee: None,
            author,
            created_at: at,
            updated_at: at,
            milestone: None,
        }
    }

    #[test]
    fn project_lookup_fails_for_unknown_name() {
        let dir = tempdir().unwrap();
        let store = DirectStore::open_memory(dir.path()).unwrap();
        store.add_project("acme/web").unwrap();
        assert!(store.project_id("acme/web").is_ok());
        let err = store.project_id("acme/api").unwrap_err();
        assert!(matches!(err, MigrateError::ProjectNotFound(name) if name == "acme/api"));
    }

    #[test]
    fn issue_numbers_are_forced_or_allocated() {
        let dir = tempdir().unwrap();
        let store = DirectStore::open_memory(dir.path()).unwrap();
        let project = store.add_project("p").unwrap();
        let user = store.add_user("root").unwrap();

        let forced = store.create_issue(project, &issue(Some(7), "seven", &[], user)).unwrap();
        assert_eq!(forced.iid, 7);
        let next = store.create_issue(project, &issue(None, "next", &[], user)).unwrap();
        assert_eq!(next.iid, 8);
    }

    #[test]
    fn labels_keep_insertion_order_and_default_state() {
        let dir = tempdir().unwrap();
        let store = DirectStore::open_memory(dir.path()).unwrap();
        let project = store.add_project("p").unwrap();
        let user = store.add_user("root").unwrap();
        store
            .create_issue(project, &issue(Some(1), "t", &["ui", "core", "high priority"], user))
            .unwrap();

        let issues = store.issues(project).unwrap();
        assert_eq!(issues[0].labels, vec!["ui", "core", "high priority"]);
        assert_eq!(issues[0].state, IssueState::Opened);
        assert_eq!(issues[0].author_id, Some(user));
    }

    #[test]
    fn note_attachment_lands_in_uploads_and_clear_removes_it() {
        let dir = tempdir().unwrap();
        let store = DirectStore::open_memory(dir.path()).unwrap();
        let project = store.add_project("p").unwrap();
        let user = store.add_user("root").unwrap();
        let created = store.create_issue(project, &issue(Some(1), "t", &[], user)).unwrap();

        let note_id = store
            .comment_issue(
                project,
                &created,
                &Note {
                    body: String::new(),
                    author: user,
                    created_at: Utc::now(),
                    attachment: Some(NoteAttachment {
                        filename: "bug.png".into(),
                        payload: vec![1, 2, 3],
                    }),
                },
            )
            .unwrap();
        let path = dir
            .path()
            .join(format!("note/attachment/{note_id}/bug.png"));
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3]);
        assert_eq!(
            store.notes(created.id).unwrap()[0].attachment.as_deref(),
            Some("bug.png")
        );

        assert_eq!(store.clear_issues(project).unwrap(), 1);
        assert!(store.issues(project).unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn milestones_round_trip_through_lookup() {
        let dir = tempdir().unwrap();
        let store = DirectStore::open_memory(dir.path()).unwrap();
        let project = store.add_project("p").unwrap();
        let id = store
            .create_milestone(
                project,
                &NewMilestone {
                    title: "1.0".into(),
                    description: "first".into(),
                    state: MilestoneState::Closed,
                    due_date: NaiveDate::from_ymd_opt(2013, 6, 1),
                },
            )
            .unwrap();
        assert_eq!(store.find_milestone(project, "1.0").unwrap(), Some(id));
        assert_eq!(store.find_milestone(project, "2.0").unwrap(), None);
        let stored = store.milestones(project).unwrap();
        assert_eq!(stored[0].state, "closed");
        assert_eq!(stored[0].due_date.as_deref(), Some("2013-06-01"));
    }

    #[test]
    fn note_attachment_names_stay_inside_the_note_directory() {
        let dir = tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let store = DirectStore::open_memory(&uploads).unwrap();
        let project = store.add_project("p").unwrap();
        let user = store.add_user("root").unwrap();
        let created = store.create_issue(project, &issue(Some(1), "t", &[], user)).unwrap();

        let note_id = store
            .comment_issue(
                project,
                &created,
                &Note {
                    body: String::new(),
                    author: user,
                    created_at: Utc::now(),
                    attachment: Some(NoteAttachment {
                        filename: "../../../../escape.txt".into(),
                        payload: b"x".to_vec(),
                    }),
                },
            )
            .unwrap();
        assert!(!dir.path().join("escape.txt").exists());
        assert!(
            uploads
                .join(format!("note/attachment/{note_id}/escape.txt"))
                .exists()
        );
        assert_eq!(
            store.notes(created.id).unwrap()[0].attachment.as_deref(),
            Some("escape.txt")
        );

        assert_eq!(attachment_filename("/etc/passwd"), "passwd");
        assert_eq!(attachment_filename("dir\\shot.png"), "shot.png");
        assert_eq!(attachment_filename(".."), "attachment");
    }

    #[test]
    fn reused_milestone_takes_the_new_state() {
        let dir = tempdir().unwrap();
        let store = DirectStore::open_memory(dir.path()).unwrap();
        let project = store.add_project("p").unwrap();
        let mut milestone = NewMilestone {
            title: "2.0".into(),
            description: "planned".into(),
            state: MilestoneState::Active,
            due_date: None,
        };
        let id = store.create_milestone(project, &milestone).unwrap();

        milestone.state = MilestoneState::Closed;
        milestone.due_date = NaiveDate::from_ymd_opt(2014, 1, 31);
        store.update_milestone(project, id, &milestone).unwrap();

        let stored = store.milestones(project).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].state, "closed");
        assert_eq!(stored[0].due_date.as_deref(), Some("2014-01-31"));
    }

    #[test]
    fn second_open_on_same_database_is_locked() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("gitlab.sqlite");
        let _first = DirectStore::open(&db, dir.path()).unwrap();
        let err = DirectStore::open(&db, dir.path()).err().unwrap();
        assert!(matches!(err, MigrateError::Locked(_)));
    }

    #[test]
    fn wiki_attachment_link_points_at_migrated_uploads() {
        let dir = tempdir().unwrap();
        let store = DirectStore::open_memory(dir.path()).unwrap();
        let link = store.save_wiki_attachment(1, "diagram.svg", b"<svg/>").unwrap();
        assert_eq!(link, "/uploads/migrated/diagram.svg");
        assert!(dir.path().join("migrated/diagram.svg").exists());
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Repository, Signature, Time};
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::model::WikiPage;

/// A git-backed wiki working tree. Each saved page becomes one commit
/// authored by the page's last editor at its last-modified time.
pub struct WikiRepo {
    repo: Repository,
    root: PathBuf,
}

impl WikiRepo {
    /// Open the repository at `path`, creating directory and repo when missing.
    pub fn open_or_init(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;
        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(_) => {
                debug!(path = %path.display(), "initializing wiki repository");
                Repository::init(path)?
            }
        };
        let root = repo
            .workdir()
            .ok_or_else(|| MigrateError::Config(format!("{} is a bare repository", path.display())))?
            .to_path_buf();
        Ok(Self { repo, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File a page is written to, relative to the repository root.
    pub fn page_path(name: &str) -> PathBuf {
        let mut path: PathBuf = name
            .split('/')
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .collect();
        let file = format!(
            "{}.md",
            path.file_name().and_then(|f| f.to_str()).unwrap_or("page")
        );
        path.set_file_name(file);
        path
    }

    pub fn save_page(&self, page: &WikiPage) -> Result<()> {
        let relative = Self::page_path(&page.name);
        let absolute = self.root.join(&relative);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&absolute, &page.body)?;

        let mut index = self.repo.index()?;
        index.add_path(&relative)?;
        index.write()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;

        let when = Time::new(page.last_modified.timestamp(), 0);
        let author = Signature::new(&page.author, &author_email(&page.author), &when)?;
        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<_> = parent.iter().collect();
        let message = format!("{} (version {})", page.name, page.version);
        self.repo
            .commit(Some("HEAD"), &author, &author, &message, &tree, &parents)?;
        debug!(page = %page.name, version = page.version, "committed wiki page");
        Ok(())
    }
}

fn author_email(author: &str) -> String {
    if author.contains('@') {
        author.to_string()
    } else {
        format!("{author}@trac")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn page(name: &str, body: &str, author: &str) -> WikiPage {
        WikiPage {
            name: name.into(),
            body: body.into(),
            version: 3,
            last_modified: Utc.with_ymd_and_hms(2015, 6, 1, 12, 0, 0).unwrap(),
            author: author.into(),
        }
    }

    #[test]
    fn page_paths_keep_hierarchy_and_drop_traversal() {
        assert_eq!(WikiRepo::page_path("home"), PathBuf::from("home.md"));
        assert_eq!(
            WikiRepo::page_path("Guide/Install"),
            PathBuf::from("Guide").join("Install.md")
        );
        assert_eq!(WikiRepo::page_path("../etc/x"), PathBuf::from("etc").join("x.md"));
    }

    #[test]
    fn saved_pages_are_committed_as_their_author() {
        let dir = tempdir().unwrap();
        let wiki = WikiRepo::open_or_init(&dir.path().join("wiki")).unwrap();
        wiki.save_page(&page("home", "# Welcome\n", "alice")).unwrap();
        wiki.save_page(&page("Guide/Install", "steps\n", "bob@example.org"))
            .unwrap();

        let body = fs::read_to_string(wiki.root().join("Guide").join("Install.md")).unwrap();
        assert_eq!(body, "steps\n");

        let head = wiki.repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.author().name(), Some("bob@example.org"));
        assert_eq!(head.author().email(), Some("bob@example.org"));
        assert_eq!(head.time().seconds(), 1_433_160_000);
        assert_eq!(head.parent_count(), 1);

        let first = head.parent(0).unwrap();
        assert_eq!(first.author().email(), Some("alice@trac"));
        assert_eq!(first.parent_count(), 0);
    }

    #[test]
    fn reopening_existing_repository_appends() {
        let dir = tempdir().unwrap();
        WikiRepo::open_or_init(dir.path())
            .unwrap()
            .save_page(&page("A", "a", "alice"))
            .unwrap();
        let wiki = WikiRepo::open_or_init(dir.path()).unwrap();
        wiki.save_page(&page("B", "b", "alice")).unwrap();
        let head = wiki.repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 1);
        assert!(wiki.root().join("A.md").exists());
    }
}

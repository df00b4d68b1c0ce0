use std::collections::{HashMap, HashSet};

use regex::{Captures, Regex};
use tracing::{info, warn};

use super::{Migrator, WikiOutcome};
use crate::error::{MigrateError, Result};
use crate::markup::convert::{MIGRATED_UPLOADS, destination_page_name};
use crate::migrate::MigrationReport;
use crate::model::{ProjectId, WikiPage, WikiPageInfo};

/// A page that passed exclusion, with its attachments already stored.
struct StagedPage {
    name: String,
    info: WikiPageInfo,
    /// `(source path, stored name)` in source order.
    attachments: Vec<(String, String)>,
}

/// Stored link of every migrated attachment, keyed by its Trac path
/// (`Page/file`), so any page can cite any other page's files.
struct AttachmentLinks {
    links: HashMap<String, String>,
    cited: Regex,
}

impl AttachmentLinks {
    fn new() -> Self {
        let pattern = format!(
            r"(!?)\[([^\]]*)\]\({}([^)\s]+)\)",
            regex::escape(MIGRATED_UPLOADS)
        );
        Self {
            links: HashMap::new(),
            cited: Regex::new(&pattern).expect("attachment citation pattern compiles"),
        }
    }

    fn insert(&mut self, path: String, link: String) {
        self.links.insert(path, link);
    }

    fn get(&self, path: &str) -> Option<&str> {
        self.links.get(path).map(String::as_str)
    }

    /// Point citations at stored links. Citations of attachments that were
    /// never migrated fall back to their label as plain text.
    fn relink(&self, body: &str) -> String {
        self.cited
            .replace_all(body, |caps: &Captures<'_>| match self.links.get(&caps[3]) {
                Some(link) => format!("{}[{}]({link})", &caps[1], &caps[2]),
                None => format!("`{}`", &caps[2]),
            })
            .into_owned()
    }
}

impl Migrator<'_> {
    pub(super) fn migrate_wiki(
        &mut self,
        project: ProjectId,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let target = self
            .config
            .wiki
            .target_directory
            .as_deref()
            .ok_or_else(|| MigrateError::Config("wiki.target_directory is not set".into()))?;

        let mut stored_names = HashSet::new();
        let mut links = AttachmentLinks::new();
        let mut staged = Vec::new();
        for name in self.source.wiki_page_names()? {
            let info = self.source.wiki_page_info(&name, None)?;
            if !self.has_included_author(&name, &info)? {
                info!(page = %name, author = %info.author, "skipping page of excluded authors");
                report.excluded_pages.push(name);
                continue;
            }
            let mut attachments = Vec::new();
            for path in self.source.wiki_attachment_names(&name)? {
                let payload = self.source.wiki_attachment(&path)?;
                let stored = unique_name(&name, basename(&path), &mut stored_names);
                let link = self.dest.save_wiki_attachment(project, &stored, &payload)?;
                links.insert(path.clone(), link);
                attachments.push((path, stored));
            }
            staged.push(StagedPage {
                name,
                info,
                attachments,
            });
        }

        for StagedPage {
            name,
            info,
            attachments,
        } in staged
        {
            let raw = self.source.wiki_page(&name)?;
            let mut body = links.relink(&self.markup.convert(&raw, Some(&name)));
            let mut unlinked = Vec::new();
            for (path, stored) in &attachments {
                let Some(link) = links.get(path) else { continue };
                if !body.contains(&format!("({link})")) {
                    warn!(page = %name, attachment = %stored, "attachment not linked from page");
                    unlinked.push((stored.clone(), link.to_string()));
                }
            }
            append_attached_files(&mut body, &unlinked);

            let page = WikiPage {
                name: destination_page_name(&name).to_string(),
                body,
                version: info.version,
                last_modified: info.last_modified,
                author: info.author,
            };
            self.dest.save_wiki_page(&page, target)?;
            info!(page = %name, saved_as = %page.name, version = page.version, "migrated wiki page");

            report.wiki.push(WikiOutcome {
                source: name,
                name: page.name,
                version: page.version,
                author: page.author,
                attachments: attachments.into_iter().map(|(_, stored)| stored).collect(),
                unlinked: unlinked.into_iter().map(|(file, _)| file).collect(),
            });
        }
        Ok(())
    }

    /// Whether any revision of the page was written by a non-excluded author.
    /// Earlier revisions are only consulted when the latest author is excluded.
    fn has_included_author(&self, name: &str, latest: &WikiPageInfo) -> Result<bool> {
        let excluded = &self.config.wiki.exclude_authors;
        if !excluded.contains(&latest.author) {
            return Ok(true);
        }
        for version in (1..latest.version).rev() {
            let info = self.source.wiki_page_info(name, Some(version))?;
            if !excluded.contains(&info.author) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Attachments share one flat upload directory, so a name already taken by
/// another page gets the page's slug as prefix.
fn unique_name(page: &str, file: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(file.to_string()) {
        return file.to_string();
    }
    let slug: String = page
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let mut candidate = format!("{slug}_{file}");
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{slug}_{n}_{file}");
        n += 1;
    }
    candidate
}

fn append_attached_files(body: &mut String, unlinked: &[(String, String)]) {
    if unlinked.is_empty() {
        return;
    }
    body.push_str("\n\n##### Attached files:\n");
    for (file, link) in unlinked {
        body.push_str(&format!("- [{file}]({link})\n"));
    }
}

//! Read-only surveys of the source: nothing here touches the destination.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::classify::classify;
use crate::error::Result;
use crate::history;
use crate::identity::IdentityResolver;
use crate::model::IssueState;
use crate::source::Source;

/// How one ticket would be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketPreview {
    pub id: u64,
    pub title: String,
    pub state: Option<IssueState>,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub author: String,
    pub milestone: Option<String>,
    pub notes: usize,
    pub attachments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub tickets: Vec<TicketPreview>,
    pub skipped: Vec<u64>,
}

pub fn preview_tickets(
    source: &dyn Source,
    identities: &IdentityResolver,
    only: Option<&[u64]>,
) -> Result<Preview> {
    let (wanted, skipped): (Vec<u64>, Vec<u64>) = source
        .ticket_ids()?
        .into_iter()
        .partition(|id| only.is_none_or(|only| only.contains(id)));
    let mut preview = Preview {
        tickets: Vec::with_capacity(wanted.len()),
        skipped,
    };
    if wanted.is_empty() {
        return Ok(preview);
    }

    for ticket in source.tickets(&wanted)? {
        let fields = &ticket.fields;
        let classification = classify(fields);
        let notes = history::reconstruct(&source.change_log(ticket.id)?);
        let owner = fields.owner.trim();
        preview.tickets.push(TicketPreview {
            id: ticket.id,
            title: fields.summary.clone(),
            state: classification.state,
            labels: classification.labels,
            assignee: (!owner.is_empty()).then(|| identities.resolve(owner).to_string()),
            author: identities.resolve(&fields.reporter).to_string(),
            milestone: fields.milestone().map(String::from),
            attachments: notes.iter().filter(|n| n.attachment.is_some()).count(),
            notes: notes.len(),
            unknown_status: classification.unknown_status,
        });
    }
    Ok(preview)
}

/// A source identity and where it lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorEntry {
    pub identity: String,
    pub username: String,
    /// Not in the identity table, so the default user stands in.
    pub fallback: bool,
    /// Tickets, change-log rows and wiki pages attributed to this identity.
    pub occurrences: usize,
}

/// Every identity seen in tickets, change logs and (optionally) wiki pages.
pub fn collect_authors(
    source: &dyn Source,
    identities: &IdentityResolver,
    include_wiki: bool,
) -> Result<Vec<AuthorEntry>> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut count = |identity: &str| {
        let identity = identity.trim();
        if !identity.is_empty() {
            *seen.entry(identity.to_string()).or_default() += 1;
        }
    };

    let ids = source.ticket_ids()?;
    if !ids.is_empty() {
        for ticket in source.tickets(&ids)? {
            count(&ticket.fields.owner);
            count(&ticket.fields.reporter);
            for entry in source.change_log(ticket.id)? {
                count(&entry.author);
            }
        }
    }
    if include_wiki {
        for name in source.wiki_page_names()? {
            count(&source.wiki_page_info(&name, None)?.author);
        }
    }

    Ok(seen
        .into_iter()
        .map(|(identity, occurrences)| {
            let mapped = identities.mapped(&identity);
            AuthorEntry {
                username: identities.resolve(&identity).to_string(),
                fallback: mapped.is_none(),
                identity,
                occurrences,
            }
        })
        .collect())
}

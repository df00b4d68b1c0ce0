//! Run orchestration: milestones, then tickets with their notes, then wiki.
//!
//! Every phase is strictly sequential. The milestone name→id map is complete
//! before the first ticket is created and is read-only afterwards.

pub mod preview;
pub mod report;
mod wiki;

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::config::Config;
use crate::dest::Destination;
use crate::error::{MigrateError, Result};
use crate::history;
use crate::identity::IdentityResolver;
use crate::markup::Markup;
use crate::model::{
    MilestoneId, MilestoneState, NewIssue, NewMilestone, Note, NoteAttachment, ProjectId, Ticket,
    UserId,
};
use crate::source::Source;

pub use report::{MigrationReport, MilestoneOutcome, TicketOutcome, WikiOutcome};

pub struct Migrator<'a> {
    config: &'a Config,
    source: &'a dyn Source,
    dest: &'a dyn Destination,
    markup: Markup<'a>,
    identities: &'a IdentityResolver,
    users: HashMap<String, UserId>,
}

impl<'a> Migrator<'a> {
    pub fn new(
        config: &'a Config,
        source: &'a dyn Source,
        dest: &'a dyn Destination,
        markup: Markup<'a>,
        identities: &'a IdentityResolver,
    ) -> Self {
        Self {
            config,
            source,
            dest,
            markup,
            identities,
            users: HashMap::new(),
        }
    }

    pub fn run(&mut self) -> Result<MigrationReport> {
        let project_name = &self.config.target.project_name;
        let project = self.dest.project_id(project_name)?;
        let mut report = MigrationReport {
            project: project_name.clone(),
            project_id: project,
            overwrite: self.config.target.overwrite(),
            ..MigrationReport::default()
        };
        info!(project = %project_name, id = project, "migrating into project");

        if self.config.issues.migrate {
            if self.config.target.overwrite() {
                report.cleared_issues = self.dest.clear_issues(project)?;
                info!(removed = report.cleared_issues, "cleared destination issues");
            }
            let milestones = self.migrate_milestones(project, &mut report)?;
            self.migrate_tickets(project, &milestones, &mut report)?;
        }
        if self.config.wiki.migrate {
            self.migrate_wiki(project, &mut report)?;
        }
        Ok(report)
    }

    fn migrate_milestones(
        &mut self,
        project: ProjectId,
        report: &mut MigrationReport,
    ) -> Result<HashMap<String, MilestoneId>> {
        let mut ids = HashMap::new();
        for name in self.source.milestone_names()? {
            let milestone = self.source.milestone(&name)?;
            let state = if milestone.completed {
                MilestoneState::Closed
            } else {
                MilestoneState::Active
            };

            let new = NewMilestone {
                title: milestone.name.clone(),
                description: self.markup.convert(&milestone.description, None),
                state,
                due_date: milestone.due.map(|due| due.date_naive()),
            };
            let existing = if self.config.target.overwrite() {
                self.dest.find_milestone(project, &milestone.name)?
            } else {
                None
            };
            let (id, reused) = match existing {
                Some(id) => {
                    self.dest.update_milestone(project, id, &new)?;
                    (id, true)
                }
                None => (self.dest.create_milestone(project, &new)?, false),
            };
            info!(milestone = %name, id, %state, reused, "migrated milestone");

            ids.insert(name.clone(), id);
            report.milestones.push(MilestoneOutcome {
                name,
                id,
                state,
                reused,
            });
        }
        Ok(ids)
    }

    fn migrate_tickets(
        &mut self,
        project: ProjectId,
        milestones: &HashMap<String, MilestoneId>,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let (wanted, skipped): (Vec<u64>, Vec<u64>) = self
            .source
            .ticket_ids()?
            .into_iter()
            .partition(|id| self.is_wanted(*id));
        for id in &skipped {
            warn!(ticket = id, "skipping ticket outside the allow-list");
        }
        report.skipped = skipped;
        if wanted.is_empty() {
            return Ok(());
        }

        for ticket in self.source.tickets(&wanted)? {
            let outcome = self.migrate_ticket(project, &ticket, milestones, report)?;
            report.tickets.push(outcome);
        }
        Ok(())
    }

    fn is_wanted(&self, ticket: u64) -> bool {
        match &self.config.issues.only_issues {
            Some(only) => only.contains(&ticket),
            None => true,
        }
    }

    fn migrate_ticket(
        &mut self,
        project: ProjectId,
        ticket: &Ticket,
        milestones: &HashMap<String, MilestoneId>,
        report: &mut MigrationReport,
    ) -> Result<TicketOutcome> {
        let fields = &ticket.fields;
        let classification = classify(fields);
        if let Some(status) = &classification.unknown_status {
            warn!(ticket = ticket.id, %status, "unknown ticket status, leaving state unset");
            report.warn(format!("ticket #{}: unknown status '{status}'", ticket.id));
        }

        let assignee = match fields.owner.trim() {
            "" => None,
            owner => Some(self.resolve_user(owner, report)?),
        };
        let author = self.resolve_user(&fields.reporter, report)?;
        let milestone = match fields.milestone() {
            Some(name) => Some(
                *milestones
                    .get(name)
                    .ok_or_else(|| MigrateError::MilestoneNotFound(name.to_string()))?,
            ),
            None => None,
        };

        let issue = NewIssue {
            iid: self.config.target.overwrite().then_some(ticket.id),
            title: fields.summary.clone(),
            description: self.markup.convert(&fields.description, None),
            state: classification.state,
            labels: classification.labels.clone(),
            assignee,
            author,
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
            milestone,
        };
        let created = self.dest.create_issue(project, &issue)?;
        info!(
            ticket = ticket.id,
            iid = created.iid,
            state = ?classification.state,
            labels = ?classification.labels,
            "migrated ticket"
        );

        let change_log = self.source.change_log(ticket.id)?;
        let mut notes = 0;
        let mut attachments = 0;
        for entry in history::reconstruct(&change_log) {
            let attachment = match entry.attachment {
                Some(filename) => {
                    info!(ticket = ticket.id, %filename, "migrating attachment");
                    let payload = self.source.ticket_attachment(ticket.id, &filename)?;
                    attachments += 1;
                    Some(NoteAttachment { filename, payload })
                }
                None => None,
            };
            let note = Note {
                body: self.markup.convert(&entry.body, None),
                author: self.resolve_user(&entry.author, report)?,
                created_at: entry.at,
                attachment,
            };
            let note_id = self.dest.comment_issue(project, &created, &note)?;
            debug!(ticket = ticket.id, note = note_id, "created note");
            notes += 1;
        }

        Ok(TicketOutcome {
            source_id: ticket.id,
            iid: created.iid,
            title: fields.summary.clone(),
            state: classification.state,
            labels: classification.labels,
            notes,
            attachments,
        })
    }

    /// Destination user id for a source identity, going through the identity
    /// table and then the destination's user list.
    fn resolve_user(&mut self, identity: &str, report: &mut MigrationReport) -> Result<UserId> {
        let identities = self.identities;
        self.user_id(identities.resolve(identity), report)
    }

    fn user_id(&mut self, username: &str, report: &mut MigrationReport) -> Result<UserId> {
        if let Some(id) = self.users.get(username) {
            return Ok(*id);
        }
        let id = match self.dest.user_id(username)? {
            Some(id) => id,
            None => {
                let identities = self.identities;
                let default_user = identities.default_user();
                if username == default_user {
                    return Err(MigrateError::UserNotFound(default_user.to_string()));
                }
                warn!(user = %username, fallback = %default_user, "destination user missing, using default");
                report.warn(format!(
                    "destination user '{username}' not found, using '{default_user}'"
                ));
                self.user_id(default_user, report)?
            }
        };
        self.users.insert(username.to_string(), id);
        Ok(id)
    }
}

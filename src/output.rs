use clap::ValueEnum;
use colored::Colorize;

use crate::error::Result;
use crate::migrate::MigrationReport;
use crate::migrate::preview::{AuthorEntry, Preview};
use crate::model::IssueState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

pub fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() > max_len {
        let truncated: String = title.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    } else {
        title.to_string()
    }
}

fn state_label(state: Option<IssueState>) -> String {
    state.map_or_else(|| "-".to_string(), |s| s.to_string())
}

pub fn print_report(report: &MigrationReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            println!(
                "Migrated into '{}' (id {})",
                report.project.cyan().bold(),
                report.project_id
            );
            if report.cleared_issues > 0 {
                println!("  {} {}", "cleared:".dimmed(), report.cleared_issues);
            }
            for m in &report.milestones {
                let reused = if m.reused { " (reused)" } else { "" };
                println!("  {} {} [{}]{}", "milestone".green(), m.name, m.state, reused);
            }
            for t in &report.tickets {
                println!(
                    "  {} #{} -> !{} {} ({})",
                    "ticket".green(),
                    t.source_id,
                    t.iid,
                    t.title,
                    state_label(t.state)
                );
                if !t.labels.is_empty() {
                    println!("    {} {}", "labels:".dimmed(), t.labels.join(", "));
                }
                if t.notes > 0 {
                    println!(
                        "    {} {} ({} with attachment)",
                        "notes:".dimmed(),
                        t.notes,
                        t.attachments
                    );
                }
            }
            if !report.skipped.is_empty() {
                let skipped: Vec<String> = report.skipped.iter().map(|id| format!("#{id}")).collect();
                println!("  {} {}", "skipped:".dimmed(), skipped.join(", "));
            }
            for page in &report.wiki {
                println!(
                    "  {} {} -> {} (v{}, {})",
                    "wiki".green(),
                    page.source,
                    page.name,
                    page.version,
                    page.author
                );
                if !page.unlinked.is_empty() {
                    println!("    {} {}", "appended:".dimmed(), page.unlinked.join(", "));
                }
            }
            if !report.excluded_pages.is_empty() {
                println!("  {} {}", "excluded:".dimmed(), report.excluded_pages.join(", "));
            }
            for warning in &report.warnings {
                println!("  {} {}", "warning:".yellow().bold(), warning);
            }
        }
        Format::Minimal => {
            println!(
                "milestones={} tickets={} notes={} skipped={} wiki={} warnings={}",
                report.milestones.len(),
                report.tickets.len(),
                report.note_count(),
                report.skipped.len(),
                report.wiki.len(),
                report.warnings.len()
            );
        }
    }
    Ok(())
}

pub fn print_preview(preview: &Preview, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(preview)?),
        Format::Pretty => {
            for t in &preview.tickets {
                println!("[#{}] {} ({})", t.id, t.title.bold(), state_label(t.state));
                if !t.labels.is_empty() {
                    println!("  {} {}", "labels:".dimmed(), t.labels.join(", "));
                }
                println!(
                    "  {} {} | {} {}",
                    "author:".dimmed(),
                    t.author,
                    "assignee:".dimmed(),
                    t.assignee.as_deref().unwrap_or("-")
                );
                if let Some(ref milestone) = t.milestone {
                    println!("  {} {}", "milestone:".dimmed(), milestone);
                }
                println!("  {} {} ({} with attachment)", "notes:".dimmed(), t.notes, t.attachments);
                if let Some(ref status) = t.unknown_status {
                    println!("  {} unknown status '{}'", "warning:".yellow().bold(), status);
                }
                println!();
            }
            if !preview.skipped.is_empty() {
                let skipped: Vec<String> = preview.skipped.iter().map(|id| format!("#{id}")).collect();
                println!("{} {}", "skipped:".dimmed(), skipped.join(", "));
            }
        }
        Format::Minimal => {
            println!("{:>5} {:20} {:9} {:5} LABELS", "ID", "TITLE", "STATE", "NOTES");
            println!("{}", "-".repeat(50));
            for t in &preview.tickets {
                println!(
                    "{:>5} {:20} {:9} {:5} {}",
                    t.id,
                    truncate_title(&t.title, 20),
                    state_label(t.state),
                    t.notes,
                    t.labels.join(",")
                );
            }
        }
    }
    Ok(())
}

pub fn print_authors(authors: &[AuthorEntry], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(authors)?),
        Format::Pretty => {
            for a in authors {
                let target = if a.fallback {
                    format!("{} (default)", a.username).yellow().to_string()
                } else {
                    a.username.green().to_string()
                };
                println!("{} -> {} {}", a.identity.bold(), target, format!("x{}", a.occurrences).dimmed());
            }
        }
        Format::Minimal => {
            for a in authors {
                let marker = if a.fallback { "*" } else { "" };
                println!("{}\t{}{}\t{}", a.identity, a.username, marker, a.occurrences);
            }
        }
    }
    Ok(())
}

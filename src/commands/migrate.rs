use std::path::Path;

use tracing::info;

use crate::config::{Config, Overrides};
use crate::error::Result;
use crate::markup::Markup;
use crate::markup::convert::TracToMarkdown;
use crate::markup::rewrite::ChangesetRewriter;
use crate::migrate::Migrator;
use crate::output::{Format, print_report};

pub const WIKI_BASE: &str = "/wikis/";

pub fn run(config_path: &Path, overrides: &Overrides, format: Format) -> Result<()> {
    let config = Config::load(config_path, overrides)?;
    let source = super::open_source(&config);
    let dest = super::open_destination(&config)?;

    let rewriter = ChangesetRewriter::new();
    let converter = TracToMarkdown::new(WIKI_BASE);
    let identities = config.identities();
    let markup = Markup {
        rewriter: &rewriter,
        converter: &converter,
    };

    let report = Migrator::new(&config, &source, dest.as_ref(), markup, &identities).run()?;
    info!(
        milestones = report.milestones.len(),
        tickets = report.tickets.len(),
        wiki = report.wiki.len(),
        "migration finished"
    );
    print_report(&report, format)
}

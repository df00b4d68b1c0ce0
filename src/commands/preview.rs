use std::path::Path;

use crate::config::{Config, Overrides};
use crate::error::Result;
use crate::migrate::preview::preview_tickets;
use crate::output::{Format, print_preview};

pub fn run(config_path: &Path, only: Option<Vec<u64>>, format: Format) -> Result<()> {
    let overrides = Overrides {
        only,
        ..Overrides::default()
    };
    let config = Config::load(config_path, &overrides)?;
    let source = super::open_source(&config);
    let preview = preview_tickets(
        &source,
        &config.identities(),
        config.issues.only_issues.as_deref(),
    )?;
    print_preview(&preview, format)
}

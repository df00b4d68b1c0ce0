use std::path::Path;

use crate::config::{Config, Overrides};
use crate::error::Result;
use crate::migrate::preview::collect_authors;
use crate::output::{Format, print_authors};

pub fn run(config_path: &Path, format: Format) -> Result<()> {
    let config = Config::load(config_path, &Overrides::default())?;
    let source = super::open_source(&config);
    let authors = collect_authors(&source, &config.identities(), config.wiki.migrate)?;
    print_authors(&authors, format)
}

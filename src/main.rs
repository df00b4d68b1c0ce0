use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use trac2lab::config::{DEFAULT_CONFIG_FILE, Overrides};
use trac2lab::output::Format;

#[derive(Parser)]
#[command(
    name = "trac2lab",
    version,
    about = "Migrate Trac tickets, milestones and wiki pages into GitLab"
)]
struct Cli {
    /// Migration configuration (YAML)
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Migrate {
        /// Only migrate these ticket ids (comma-separated)
        #[arg(long, value_delimiter = ',')]
        only: Option<Vec<u64>>,
        /// Skip milestones and tickets
        #[arg(long)]
        no_issues: bool,
        /// Skip wiki pages
        #[arg(long)]
        no_wiki: bool,
        /// Keep existing issues and let the destination number new ones
        #[arg(long)]
        append: bool,
    },
    /// Show how tickets would be migrated without writing anything
    Preview {
        /// Only preview these ticket ids (comma-separated)
        #[arg(long, value_delimiter = ',')]
        only: Option<Vec<u64>>,
    },
    /// List source identities and the destination users they map to
    Authors,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli, format: Format) -> trac2lab::error::Result<()> {
    debug!(
        version = %trac2lab::build_info::long_version(),
        config = %cli.config.display(),
        "starting"
    );
    match cli.command {
        Commands::Migrate {
            only,
            no_issues,
            no_wiki,
            append,
        } => {
            let overrides = Overrides {
                only,
                no_issues,
                no_wiki,
                append,
            };
            trac2lab::commands::migrate::run(&cli.config, &overrides, format)
        }
        Commands::Preview { only } => trac2lab::commands::preview::run(&cli.config, only, format),
        Commands::Authors => trac2lab::commands::authors::run(&cli.config, format),
    }
}

fn main() {
    let cli = Cli::parse();
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    init_logging(cli.verbose);
    if let Err(e) = run(cli, format) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}

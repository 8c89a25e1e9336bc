// ABOUTME: CLI entry point for subset-export
// ABOUTME: Parses commands and routes to appropriate handlers

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use subset_export::assembly::OutputTarget;
use subset_export::commands;
use subset_export::config::ExportConfig;
use subset_export::export::ExportOptions;
use subset_export::filters::ExportFilter;
use subset_export::subset::DEFAULT_MAX_CLOSURE_ITERATIONS;

#[derive(Parser)]
#[command(name = "subset-export")]
#[command(about = "Dependency-ordered subset exports of multi-tenant databases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by commands that read the source and its policies
#[derive(Args)]
struct SourceArgs {
    /// PostgreSQL URL or SQLite file (.db, .sqlite, .sqlite3)
    #[arg(long)]
    source: String,
    /// TOML configuration; defaults to the built-in 'content' preset
    #[arg(long)]
    config: Option<PathBuf>,
    /// Shared table prefix, overrides [naming].prefix
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Args)]
struct FilterArgs {
    /// Include only these physical tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    include_tables: Option<Vec<String>>,
    /// Skip these physical tables entirely (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_tables: Option<Vec<String>>,
    /// Include only these tenant ids (comma-separated)
    #[arg(long, value_delimiter = ',')]
    include_tenants: Option<Vec<u32>>,
    /// Skip these tenant ids (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_tenants: Option<Vec<u32>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a subset of the source into one SQL file
    Export {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        filters: FilterArgs,
        /// Output file, or '-' for standard output
        #[arg(long, short = 'o')]
        output: String,
        /// Directory for temporary dump files
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show how tables would be handled without exporting anything
    Plan {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Drop leftover shadow tables and stale temporary directories
    Cleanup {
        #[command(flatten)]
        source: SourceArgs,
        /// Directory holding temporary dump directories
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Remove temp directories older than this many seconds
        #[arg(long, default_value_t = 86400)]
        max_age_secs: u64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn export_options(
    config: &ExportConfig,
    source: &SourceArgs,
    filters: FilterArgs,
) -> anyhow::Result<ExportOptions> {
    let filter = ExportFilter::new(
        filters.include_tables,
        filters.exclude_tables,
        filters.include_tenants,
        filters.exclude_tenants,
    )?;
    Ok(ExportOptions {
        prefix: source
            .prefix
            .clone()
            .unwrap_or_else(|| config.naming.prefix.clone()),
        filter,
        max_closure_iterations: config
            .max_closure_iterations
            .unwrap_or(DEFAULT_MAX_CLOSURE_ITERATIONS),
        ..ExportOptions::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `--output -` keeps stdout clean; default to INFO
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            source,
            filters,
            output,
            work_dir,
            json,
            no_progress,
            yes,
        } => {
            let config = commands::load_config(source.config.as_deref())?;
            let output = OutputTarget::parse(&output)?;
            let options = ExportOptions {
                work_dir,
                show_progress: !no_progress,
                ..export_options(&config, &source, filters)?
            };
            commands::export(&source.source, &config, &output, &options, yes, json).await
        }
        Commands::Plan { source, filters } => {
            let config = commands::load_config(source.config.as_deref())?;
            let options = export_options(&config, &source, filters)?;
            commands::plan(&source.source, &config, &options).await
        }
        Commands::Cleanup {
            source,
            work_dir,
            max_age_secs,
            json,
        } => {
            let config = commands::load_config(source.config.as_deref())?;
            commands::cleanup(
                &source.source,
                &config,
                work_dir.as_deref(),
                max_age_secs,
                json,
            )
            .await
        }
    }
}

//! # doc-harvest CLI (`harvest`)
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest init` | Create the catalog schema and storage root |
//! | `harvest sources` | List configured sources and their health |
//! | `harvest run [source]` | Fetch, store, extract and index new documents |
//! | `harvest status` | Catalog counts per source and status |
//! | `harvest requeue [source]` | Forget failed entries so the next run retries them |
//! | `harvest export json` | Print or write the index as JSON |
//! | `harvest export docx --out DIR` | One right-to-left `.docx` per record |
//! | `harvest pages <folder>` | PDF page counts |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use doc_harvest::pipeline::RunOptions;
use doc_harvest::progress::ProgressMode;
use doc_harvest::{config, export, migrate, pages, pipeline, sources, status};

/// doc-harvest: resumable document acquisition for government portals.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Resumable document acquisition: fetch, dedupe, store, OCR, index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the catalog schema, storage root and index directory.
    ///
    /// Idempotent.
    Init,

    /// List configured sources and whether they look usable.
    Sources,

    /// Run the pipeline over one source or all of them.
    ///
    /// Already extracted documents are skipped. An interrupted run picks up
    /// where it stopped, including the listing page it was on.
    Run {
        /// Source name, or `all`.
        #[arg(default_value = "all")]
        source: String,

        /// Process at most this many documents; the rest stay pending.
        #[arg(long)]
        limit: Option<usize>,

        /// List sources and report what would be processed, without
        /// touching the catalog, the store or the index.
        #[arg(long)]
        dry_run: bool,

        /// Skip listing requests and only work through pending entries.
        #[arg(long)]
        no_discover: bool,

        /// Progress on stderr: `human`, `json` or `off`.
        /// Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show catalog counts per source and status.
    Status {
        /// Also list every failed entry with its last error.
        #[arg(long)]
        failed: bool,
    },

    /// Forget failed entries so the next run rediscovers and retries them.
    Requeue {
        /// Source name, or `all`.
        #[arg(default_value = "all")]
        source: String,
    },

    /// Export index records.
    Export {
        #[command(subcommand)]
        format: ExportFormat,
    },

    /// Report page counts for the PDF files in a folder.
    Pages {
        /// Folder to scan.
        #[arg(default_value = ".")]
        folder: PathBuf,

        /// Include PDFs in subdirectories.
        #[arg(short, long)]
        recursive: bool,
    },
}

#[derive(Subcommand)]
enum ExportFormat {
    /// All records as a JSON document.
    Json {
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// One right-to-left Word document per record.
    Docx {
        /// Output directory.
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("doc_harvest=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Pages { folder, recursive } = &cli.command {
        return pages::run_pages(folder, *recursive);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Catalog initialized at {}", cfg.catalog.path.display());
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Run {
            source,
            limit,
            dry_run,
            no_discover,
            progress,
        } => {
            let mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(value) => ProgressMode::parse(value).ok_or_else(|| {
                    anyhow::anyhow!("Invalid --progress '{}': use human, json or off", value)
                })?,
            };
            let options = RunOptions {
                limit,
                dry_run,
                discover: !no_discover,
                ..RunOptions::default()
            };
            pipeline::run_harvest(&cfg, &source, options, mode).await?;
        }
        Commands::Status { failed } => {
            status::run_status(&cfg, failed).await?;
        }
        Commands::Requeue { source } => {
            status::run_requeue(&cfg, &source).await?;
        }
        Commands::Export { format } => match format {
            ExportFormat::Json { output } => {
                export::run_export_json(&cfg, output.as_deref()).await?;
            }
            ExportFormat::Docx { out } => {
                export::run_export_docx(&cfg, &out).await?;
            }
        },
        Commands::Pages { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

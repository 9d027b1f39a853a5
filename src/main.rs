//! # Dialog Harness CLI (`dlg`)
//!
//! ## Usage
//!
//! ```bash
//! dlg --config ./config/dlg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dlg init` | Create the user-state database |
//! | `dlg load [--force]` | Fetch and index the dataset if missing or stale |
//! | `dlg status` | Show checkpoint age and whether a load would refresh |
//! | `dlg dialogs` | List qid groups |
//! | `dlg show <qid>` | Print the rows of one group |
//! | `dlg serve` | Start the HTTP API |
//! | `dlg check <original> <translation>` | Score a translation via the relay |
//! | `dlg transcribe <file>` | Transcribe an audio file via the relay |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dialog_harness::cache::DatasetCache;
use dialog_harness::config::{self, Config};
use dialog_harness::inference::InferenceClient;
use dialog_harness::logging::{self, Verbosity};
use dialog_harness::models::{Dataset, LoadOutcome};
use dialog_harness::server;
use dialog_harness::userdata::UserStore;

/// Dialog Harness: dataset loader and practice-state service for the
/// dialog trainer.
#[derive(Parser)]
#[command(name = "dlg", version, about = "Dialog dataset loader and practice-state service")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dlg.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the user-state database. Safe to run repeatedly.
    Init,

    /// Fetch and index the dataset if it is missing or stale.
    Load {
        /// Refetch even if the checkpoint is fresh.
        #[arg(long)]
        force: bool,
    },

    /// Show the refresh checkpoint and whether a load would refetch.
    Status,

    /// List qid groups in workbook order.
    Dialogs {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the rows of one qid group.
    Show {
        qid: String,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Score a translation through the inference relay.
    Check {
        original: String,
        translation: String,
    },

    /// Transcribe an audio file through the inference relay.
    Transcribe {
        file: PathBuf,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        prompt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = UserStore::open(&cfg.db).await?;
            store.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Load { force } => {
            let cache = DatasetCache::from_config(&cfg)?;
            let outcome = cache.load(force).await;
            report_outcome(&outcome, &cache.snapshot())?;
        }
        Commands::Status => {
            let cache = DatasetCache::from_config(&cfg)?;
            let freshness = cache.freshness();
            println!("source:      {}", source_url(&cfg));
            println!("checkpoint:  {}", cfg.checkpoint.path.display());
            match freshness.checkpoint {
                Some(at) => {
                    println!("refreshed:   {}", format_ts(at));
                    println!(
                        "age:         {}",
                        format_age(freshness.age_ms().unwrap_or_default())
                    );
                }
                None => println!("refreshed:   never"),
            }
            println!("max age:     {}", format_age(freshness.max_age_ms));
            println!(
                "next load:   {}",
                if freshness.stale { "refetch" } else { "cached" }
            );
        }
        Commands::Dialogs { json } => {
            let cache = DatasetCache::from_config(&cfg)?;
            let ds = load_or_fail(&cache).await?;
            let groups = ds.groups();
            if json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else {
                for g in &groups {
                    println!("{:<12} {:>3} rows  {}  {}", g.qid, g.rows, g.kind, g.title);
                }
                println!("{} groups, {} rows", groups.len(), ds.rows.len());
            }
        }
        Commands::Show { qid, json } => {
            let cache = DatasetCache::from_config(&cfg)?;
            let ds = load_or_fail(&cache).await?;
            let rows = ds.group(&qid);
            if rows.is_empty() {
                bail!("no dialog with qid {}", qid);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("--- {} ({} rows) ---", qid, rows.len());
                for row in rows {
                    let marker = if row.is_question { "?" } else { " " };
                    println!("[{}]{} {}", row.id, marker, row.text);
                    for audio in [&row.audio1, &row.audio2] {
                        if !audio.is_empty() {
                            println!("      audio: {}", audio);
                        }
                    }
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Check {
            original,
            translation,
        } => {
            let client = inference_client(&cfg)?;
            let result = client.check_translation(&original, &translation).await?;
            println!("{}", result);
        }
        Commands::Transcribe {
            file,
            language,
            prompt,
        } => {
            let client = inference_client(&cfg)?;
            let audio = std::fs::read(&file)
                .with_context(|| format!("Failed to read audio file: {}", file.display()))?;
            let text = client
                .transcribe_audio(&audio, language.as_deref(), prompt.as_deref())
                .await?;
            println!("{}", text);
        }
    }

    Ok(())
}

fn report_outcome(outcome: &LoadOutcome, ds: &Dataset) -> Result<()> {
    match outcome {
        LoadOutcome::CacheHit => println!("Dataset is fresh; nothing fetched."),
        LoadOutcome::Loaded { rows, groups } => {
            println!("Loaded {} rows in {} groups.", rows, groups)
        }
        LoadOutcome::Joined { loaded } => {
            println!("Joined an in-flight load (loaded: {}).", loaded)
        }
        LoadOutcome::Failed(e) => bail!("load failed ({:?}): {}", e.kind(), e),
    }
    if let Some(at) = ds.last_updated_at {
        println!("Last updated {}.", format_ts(at));
    }
    Ok(())
}

async fn load_or_fail(cache: &DatasetCache) -> Result<std::sync::Arc<Dataset>> {
    if let LoadOutcome::Failed(e) = cache.load(false).await {
        bail!("load failed ({:?}): {}", e.kind(), e);
    }
    let ds = cache.snapshot();
    if !ds.loaded {
        bail!("dataset is not loaded");
    }
    Ok(ds)
}

fn inference_client(cfg: &Config) -> Result<InferenceClient> {
    let Some(inference) = &cfg.inference else {
        bail!("no [inference] section in config; set inference.relay_url");
    };
    InferenceClient::from_config(inference)
}

fn source_url(cfg: &Config) -> String {
    format!(
        "{}/{}",
        cfg.dataset.base_url.trim_end_matches('/'),
        cfg.dataset.path.trim_start_matches('/')
    )
}

fn format_ts(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn format_age(ms: i64) -> String {
    let secs = ms / 1000;
    if secs < 0 {
        return "in the future".to_string();
    }
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

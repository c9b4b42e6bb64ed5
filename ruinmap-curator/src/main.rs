//! ruinmap-curator - site curation from media mentions
//!
//! Links extracted site mentions to canonical records, identifies the rest
//! through the knowledge base and language-model adjudication, and promotes
//! complete results into the canonical dataset.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ruinmap_common::config::{default_config_path, load_toml_config, resolve_root_folder, TomlConfig};
use ruinmap_curator::config::{load_curator_config, resolve_anthropic_api_key};
use ruinmap_curator::db::discoveries;
use ruinmap_curator::services::Matcher;
use ruinmap_curator::Curator;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Command-line arguments for ruinmap-curator
#[derive(Parser, Debug)]
#[command(name = "ruinmap-curator")]
#[command(about = "Curates archaeological sites from media mentions")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long, env = "RUINMAP_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One Matcher pass over unresolved evidence
    Match,
    /// One identification cycle
    Identify,
    /// Matcher and identification on a fixed interval until Ctrl+C
    Run,
    /// Send a Discovery back for another identification pass
    Requeue {
        /// Discovery id
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path).context("Failed to load config file")?,
        None => TomlConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting ruinmap-curator v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let curator_config = match &config_path {
        Some(path) => load_curator_config(path).context("Failed to load [curator] config")?,
        None => Default::default(),
    };

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    let db_path = ruinmap_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let db = ruinmap_curator::db::init_database_pool(&db_path, &curator_config.curation_source_id)
        .await
        .context("Failed to open database")?;

    if let Command::Requeue { id } = args.command {
        match discoveries::requeue(&db, id).await {
            Ok(true) => info!(discovery_id = %id, "Discovery requeued for review"),
            Ok(false) => warn!(discovery_id = %id, "Discovery is promoted and cannot be requeued"),
            Err(ruinmap_common::Error::DiscoveryNotFound(_)) => warn!(discovery_id = %id, "No discovery with that id"),
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }

    if let Command::Match = args.command {
        // The Matcher needs no remote services
        let matcher = Matcher::new(db.clone(), curator_config.matcher_batch_size);
        let stats = matcher.run_pass().await?;
        info!(
            "Matcher: {} examined, {} linked, {} filed, {} ambiguous, {} unusable",
            stats.examined,
            stats.linked(),
            stats.filed,
            stats.ambiguous,
            stats.unusable
        );
        return Ok(());
    }

    let api_key = resolve_anthropic_api_key(&db, &toml_config).await?;
    let curator = Curator::with_remote_services(db, curator_config, api_key)?;

    match args.command {
        Command::Identify => {
            let stats = curator.engine.run_cycle().await?;
            info!("Identification: {}", stats.display_string());
        }
        Command::Run => run_loop(&curator).await,
        Command::Match | Command::Requeue { .. } => {}
    }

    log_status_counts(&curator).await;
    Ok(())
}

/// Matcher + identification every `cycle_interval_secs` until Ctrl+C.
///
/// A failed cycle is logged and retried on the next tick.
async fn run_loop(curator: &Curator) {
    let mut interval = tokio::time::interval(Duration::from_secs(curator.config.cycle_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = curator.matcher.run_pass().await {
                    error!(error = %e, "Matcher pass failed");
                }
                if let Err(e) = curator.engine.run_cycle().await {
                    error!(error = %e, "Identification cycle failed, retrying next interval");
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }
}

async fn log_status_counts(curator: &Curator) {
    match discoveries::count_by_status(&curator.db).await {
        Ok(counts) => {
            let summary: Vec<String> = counts
                .iter()
                .map(|(status, count)| format!("{} {}", count, status))
                .collect();
            info!("Discoveries: {}", summary.join(", "));
        }
        Err(e) => warn!(error = %e, "Could not count discoveries"),
    }
}

///
/// This module implements the CLI for salary-ingest: command parsing, wiring of the
/// S3 transport into the core pipeline, and user-visible output.
///
/// All pipeline logic (reading, filtering, archival, monitoring, the storage gateway)
/// lives in the [`salary-ingest-core`] crate. This module is strictly CLI glue.
///
/// ## Commands
/// - `watch`: probe storage, enable versioning, process existing files, then monitor until Ctrl-C
/// - `process`: one pass over the files already in the watch folder
/// - `bucket`: inspect and manage the configured bucket
///
/// ## How To Use
/// - For command-line users: run the `salary-ingest` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`salary-ingest-core`]: ../../salary-ingest-core/
use crate::load_config::{resolve_config, CliConfig};
use crate::s3::S3Store;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use salary_ingest_core::monitor::{list_candidates, DirectoryMonitor, MonitorConfig, ProcessedFiles};
use salary_ingest_core::pipeline::DataPipeline;
use salary_ingest_core::storage::StorageGateway;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// CLI for salary-ingest: filter incoming salary files and publish them to versioned storage.
#[derive(Parser)]
#[clap(
    name = "salary-ingest",
    version,
    about = "Watch a folder, keep rows with salary above a threshold, and publish them to S3-compatible storage"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process existing files, then monitor the watch folder until Ctrl-C
    Watch {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Write a sample employees CSV if the watch folder is empty
        #[clap(long)]
        seed_example: bool,
        /// Leave files already in the watch folder untouched
        #[clap(long)]
        skip_existing: bool,
    },
    /// Process the files currently in the watch folder once and exit
    Process {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Inspect or manage the configured bucket
    Bucket {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        #[clap(subcommand)]
        action: BucketAction,
    },
}

#[derive(Subcommand)]
pub enum BucketAction {
    /// Print bucket existence, versioning status and endpoint as JSON
    Info,
    /// List object keys
    List {
        #[clap(long, default_value = "")]
        prefix: String,
    },
    /// List object versions, optionally for keys starting with KEY
    Versions {
        #[clap(long)]
        key: Option<String>,
    },
    /// Turn on bucket versioning
    EnableVersioning,
    /// Download an object, optionally a specific version
    Download {
        #[clap(long)]
        key: String,
        #[clap(long)]
        dest: PathBuf,
        #[clap(long)]
        version: Option<String>,
    },
    /// Delete an object
    Delete {
        #[clap(long)]
        key: String,
    },
}

fn gateway(config: &CliConfig) -> Result<Arc<StorageGateway<S3Store>>> {
    let store = S3Store::connect(&config.storage).context("Failed to build S3 client")?;
    Ok(Arc::new(StorageGateway::with_max_in_flight(
        store,
        config.storage.max_in_flight,
    )))
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Watch {
            config,
            seed_example,
            skip_existing,
        } => {
            let config = resolve_config(config.as_deref())?;
            watch(config, seed_example, skip_existing).await
        }
        Commands::Process { config } => {
            let config = resolve_config(config.as_deref())?;
            let gateway = gateway(&config)?;
            let pipeline = DataPipeline::new(config.pipeline.clone(), gateway)?;
            let mut processed = ProcessedFiles::new();
            let count = pipeline.process_existing_files(&mut processed).await?;
            tracing::info!(command = "process", files = count, "Processing pass complete");
            println!("Processed {count} file(s)");
            Ok(())
        }
        Commands::Bucket { config, action } => {
            let config = resolve_config(config.as_deref())?;
            bucket(&config, action).await
        }
    }
}

async fn watch(config: CliConfig, seed_example: bool, skip_existing: bool) -> Result<()> {
    let gateway = gateway(&config)?;

    let keys = gateway.list_files("").await;
    tracing::info!(
        command = "watch",
        bucket = %gateway.bucket(),
        objects = keys.len(),
        "Storage probe finished"
    );
    if !gateway.enable_versioning().await {
        tracing::warn!(command = "watch", "Continuing without bucket versioning");
    }

    let pipeline = DataPipeline::new(config.pipeline.clone(), gateway)?;
    if seed_example {
        if let Some(path) = pipeline.write_example_file()? {
            println!("Example file written: {}", path.display());
        }
    }

    let mut processed = ProcessedFiles::new();
    if skip_existing {
        let existing = list_candidates(
            &config.pipeline.watch_folder,
            &config.pipeline.supported_formats,
        )
        .with_context(|| {
            format!(
                "Failed to list {}",
                config.pipeline.watch_folder.display()
            )
        })?;
        for path in &existing {
            processed.insert(path);
        }
        tracing::info!(
            command = "watch",
            skipped = existing.len(),
            "Existing files left untouched"
        );
    } else {
        pipeline.process_existing_files(&mut processed).await?;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Stop signal received, finishing current file"),
            Err(e) => tracing::error!(error = %e, "Could not listen for Ctrl-C"),
        }
        on_signal.cancel();
    });

    println!(
        "Watching {} (salary > {}). Press Ctrl-C to stop.",
        config.pipeline.watch_folder.display(),
        config.pipeline.filter_threshold
    );
    let monitor_config = MonitorConfig::from(&config.pipeline);
    let mut monitor = DirectoryMonitor::new(pipeline, monitor_config, processed);
    monitor.run(cancel).await;
    println!("Stopped after {} file(s)", monitor.processed().len());
    Ok(())
}

async fn bucket(config: &CliConfig, action: BucketAction) -> Result<()> {
    let gateway = gateway(config)?;
    match action {
        BucketAction::Info => {
            let info = gateway.bucket_info().await;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        BucketAction::List { prefix } => {
            for key in gateway.list_files(&prefix).await {
                println!("{key}");
            }
        }
        BucketAction::Versions { key } => {
            for v in gateway.list_versions(key.as_deref()).await {
                let modified = v
                    .last_modified
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let latest = if v.is_latest { " (latest)" } else { "" };
                println!("{}\t{}\t{}\t{}{}", v.key, v.version_id, v.size_bytes, modified, latest);
            }
        }
        BucketAction::EnableVersioning => {
            if !gateway.enable_versioning().await {
                bail!("Could not enable versioning on bucket {}", gateway.bucket());
            }
            println!("Versioning enabled on {}", gateway.bucket());
        }
        BucketAction::Download { key, dest, version } => {
            let ok = match &version {
                Some(v) => gateway.download_version(&key, &dest, v).await,
                None => gateway.download(&key, &dest).await,
            };
            if !ok {
                bail!("Download of {key} failed");
            }
            println!("Downloaded {key} to {}", dest.display());
        }
        BucketAction::Delete { key } => {
            if !gateway.delete_file(&key).await {
                bail!("Delete of {key} failed");
            }
            println!("Deleted {key}");
        }
    }
    Ok(())
}

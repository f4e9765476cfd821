//! mmdata - Inspect and convert microscopy datasets.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mm_datastore::{
    config::{Cli, Command, ConvertConfig, InfoConfig, TargetFormat},
    detect_format, DataError, DataManager, Datastore, LoadMode, NoopPublisher,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Info(config) => run_info(config).await,
        Command::Convert(config) => run_convert(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "mm_datastore=debug,mmdata=debug"
    } else {
        "mm_datastore=info,mmdata=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Info Command
// =============================================================================

async fn run_info(config: InfoConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let format = match detect_format(&config.dir).await {
        Ok(format) => format,
        Err(e) => {
            error!("Cannot read {}: {}", config.dir.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let manager = DataManager::new(Arc::new(NoopPublisher));
    let store = match manager.load_data(&config.dir, LoadMode::Virtual).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open {}: {}", config.dir.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let printed = print_info(&store, &config, format.name()).await;
    let closed = store.close().await;
    match printed.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn print_info(store: &Datastore, config: &InfoConfig, format: &str) -> Result<(), DataError> {
    println!("Dataset: {}", config.dir.display());
    println!("Format:  {}", format);
    println!("Images:  {}", store.image_count().await?);

    let axes = store.axes().await?;
    if !axes.is_empty() {
        println!("Axes:");
        for axis in &axes {
            println!("  {:<10} {}", axis, store.axis_length(axis).await?);
        }
    }

    let summary = store.summary_metadata().await?;
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => {
            println!();
            println!("Summary:");
            println!("{}", json);
        }
        Err(e) => error!("Cannot render summary: {}", e),
    }

    if config.list {
        println!();
        println!("Coordinates:");
        for coords in store.coords().await? {
            println!("  {}", coords);
        }
    }

    Ok(())
}

// =============================================================================
// Convert Command
// =============================================================================

async fn run_convert(config: ConvertConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match convert(&config).await {
        Ok(count) => {
            info!(
                "Converted {} image(s) from {} to {}",
                count,
                config.src.display(),
                config.dst.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Conversion failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn convert(config: &ConvertConfig) -> Result<usize, DataError> {
    let manager = DataManager::with_options(Arc::new(NoopPublisher), config.storage_options()?)?;

    let source = manager.load_data(&config.src, LoadMode::Virtual).await?;
    let target = match config.to {
        TargetFormat::Multipage => {
            manager
                .create_multipage_datastore(
                    &config.dst,
                    config.separate_metadata,
                    config.split_positions,
                )
                .await
        }
        TargetFormat::SinglePlane => manager.create_single_plane_datastore(&config.dst).await,
    };
    let target = match target {
        Ok(target) => target,
        Err(e) => {
            source.close().await?;
            return Err(e);
        }
    };

    let copied = target.copy_from(&source).await;
    let count = target.image_count().await;
    let source_closed = source.close().await;
    let target_closed = target.close().await;

    copied?;
    source_closed?;
    target_closed?;
    count
}

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use batch_subtitler::config::{Config, ConfigBuilder, DEFAULT_CONFIG_FILE};
use batch_subtitler::summary::report;
use batch_subtitler::{AudioExtractor, BatchProcessor, VideoDownloader, WhisperFactory};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Batch Subtitler")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Convert a directory of videos into SRT subtitles with Whisper")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Key/value configuration file")
                .default_value(DEFAULT_CONFIG_FILE),
        )
        .arg(
            Arg::new("input-dir")
                .short('i')
                .long("input-dir")
                .value_name("DIR")
                .help("Directory containing videos to process (overrides INPUT_DIR)"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Output directory for audio and subtitles (overrides OUTPUT_DIR)"),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("NUM")
                .help("Number of parallel workers (default: logical CPUs)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("URL")
                .help("Download this video with yt-dlp and subtitle it"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Initialize logging; RUST_LOG wins over the verbosity flag
    let default_filter = if matches.get_flag("verbose") {
        "batch_subtitler=debug,info"
    } else {
        "batch_subtitler=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut builder = ConfigBuilder::from_config(Config::resolve(&config_path));

    if let Some(dir) = matches.get_one::<String>("input-dir") {
        builder = builder.with_input_dir(PathBuf::from(dir));
    }
    if let Some(dir) = matches.get_one::<String>("output-dir") {
        builder = builder.with_output_dir(PathBuf::from(dir));
    }
    if let Some(&workers) = matches.get_one::<usize>("workers") {
        if workers == 0 {
            return Err(anyhow!("--workers must be at least 1"));
        }
        builder = builder.with_workers(workers);
    }
    let mut config = builder.build();

    // Remote trigger: fetch the video into a scratch directory and process that
    let download_dir = match matches.get_one::<String>("url") {
        Some(url) => {
            let dir = tempfile::Builder::new().prefix("subtitler_download_").tempdir()?;
            VideoDownloader::new().download(url, dir.path()).await?;
            config.input_dir = dir.path().to_path_buf();
            Some(dir)
        }
        None => None,
    };

    info!("🚀 Batch Subtitler starting...");
    info!("{}", config.summary());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("🛑 Interrupt received, stopping after cancelling in-flight videos");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let processor = BatchProcessor::new(
        AudioExtractor::new(),
        WhisperFactory::from_config(&config),
        config.available_parallelism(),
    )
    .with_shutdown(shutdown_rx);

    let run = processor.process_directory(&config).await?;
    report(&run);

    // Downloaded video and scratch directory go away with the guard
    drop(download_dir);

    Ok(())
}

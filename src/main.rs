use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use track_beacon::config::{EngineConfig, DEFAULT_DATA_DIR, FIX_CHANNEL_CAPACITY};
use track_beacon::device::resolve_device_id;
use track_beacon::position::{PositionSource, ReplayPositionSource, TermuxPositionSource};
use track_beacon::telegram::{TelegramClient, DEFAULT_API_BASE};
use track_beacon::Engine;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SourceKind {
    /// Poll termux-location (Termux:API)
    Termux,
    /// Replay fixes from a JSON file
    Replay,
}

#[derive(Parser, Debug)]
#[command(name = "track_beacon")]
#[command(about = "Adaptive location beacon with remote chat control", long_about = None)]
struct Args {
    /// Data directory (settings, day files, live status)
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Settings file (default: <data-dir>/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Device identifier written into reports
    #[arg(long)]
    device_id: Option<String>,

    /// Messaging API base URL
    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Position source
    #[arg(long, value_enum, default_value = "termux")]
    source: SourceKind,

    /// Fix file for --source replay (JSON array of fixes)
    #[arg(long, required_if_eq("source", "replay"))]
    replay_file: Option<PathBuf>,

    /// termux-location executable
    #[arg(long, default_value = "termux-location")]
    termux_program: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let device_id = resolve_device_id(args.device_id.as_deref());
    let mut config = EngineConfig::new(&args.data_dir, &device_id).with_api_base(&args.api_base);
    if let Some(path) = &args.settings {
        config = config.with_settings_path(path);
    }

    let (fix_tx, fix_rx) = mpsc::channel(FIX_CHANNEL_CAPACITY);
    let source: Arc<dyn PositionSource> = match args.source {
        SourceKind::Termux => Arc::new(TermuxPositionSource::with_program(
            fix_tx,
            &args.termux_program,
        )),
        SourceKind::Replay => {
            let path = args
                .replay_file
                .as_deref()
                .context("--replay-file is required with --source replay")?;
            let replay = ReplayPositionSource::from_file(fix_tx, path)
                .with_context(|| format!("loading replay file {}", path.display()))?;
            Arc::new(replay)
        }
    };

    let messenger = Arc::new(TelegramClient::new(&config.api_base));
    let engine = Engine::new(config, messenger, source, fix_rx)?;

    engine
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;

    Ok(())
}

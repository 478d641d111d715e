use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use track_beacon::config::DEFAULT_DATA_DIR;
use track_beacon::device::resolve_device_id;
use track_beacon::report::ReportGenerator;
use track_beacon::track_store::TrackStore;

/// Render a stored day into GeoJSON without running the beacon.
#[derive(Parser, Debug)]
#[command(name = "beacon_report")]
struct Args {
    /// Data directory of the beacon
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Day to render (YYYY-MM-DD, default: today)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Output file (default: stdout)
    #[arg(long)]
    out: Option<PathBuf>,

    /// List stored days instead of rendering one
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Device identifier written into the report
    #[arg(long)]
    device_id: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let tracks_dir = args.data_dir.join("tracks");
    if !tracks_dir.is_dir() {
        bail!("No day files under {}", tracks_dir.display());
    }
    let store = Arc::new(TrackStore::open(&tracks_dir)?);

    if args.list {
        for date in store.list_available_dates() {
            println!("{}  {} samples", date, store.load(date).len());
        }
        return Ok(());
    }

    let date = args.date.unwrap_or_else(|| Local::now().date_naive());
    let device_id = resolve_device_id(args.device_id.as_deref());
    let generator = ReportGenerator::new(store, &device_id, env!("CARGO_PKG_VERSION"));
    let Some(doc) = generator.generate(date) else {
        bail!("No location data for {}", date);
    };
    let json = doc.to_json_bytes()?;

    match &args.out {
        Some(path) => {
            fs::write(path, &json).with_context(|| format!("writing {}", path.display()))?;
            log::info!("{}", doc.summary().replace('\n', ", "));
            log::info!("Wrote {}", path.display());
        }
        None => println!("{}", String::from_utf8_lossy(&json)),
    }
    Ok(())
}

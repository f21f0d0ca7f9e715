// src/main.rs
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use potentiostat_link::connection::SIMULATOR_ADDRESS;
use potentiostat_link::drivers::{render_trace_png, PlotStyle, SimulatedInstrument};
use potentiostat_link::{
    ConfigProvider, ConnectionManager, DefaultConnector, JsonFileRecorder, JsonSettingsStore,
    MeasurementRecord, MeasurementSession, MeasurementType,
};

/// Run one CV or CA measurement and store the result.
#[derive(Parser)]
#[command(name = "potentiostat-link")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port of the instrument, or `sim` for the built-in simulator
    #[arg(short, long, default_value = SIMULATOR_ADDRESS)]
    address: String,

    /// Measurement to run (cv or ca)
    #[arg(short, long, default_value = "cv")]
    kind: MeasurementType,

    /// JSON settings file; missing means defaults
    #[arg(short, long, default_value = "settings.json")]
    settings: PathBuf,

    /// Directory for result files
    #[arg(short, long, default_value = "results")]
    out: PathBuf,

    /// Also render the raw and filtered trace to this PNG
    #[arg(long)]
    plot: Option<PathBuf>,

    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Noise seed for the simulator
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = JsonSettingsStore::new(&args.settings);
    // fail early on bad settings, before touching the port
    settings
        .load()
        .with_context(|| format!("loading {}", args.settings.display()))?;

    let connector = DefaultConnector {
        baud_rate: args.baud,
        simulator: SimulatedInstrument {
            seed: args.seed,
            ..SimulatedInstrument::default()
        },
        ..DefaultConnector::default()
    };
    let connection = Arc::new(ConnectionManager::new(connector));
    let session = MeasurementSession::new(
        Arc::clone(&connection),
        settings,
        JsonFileRecorder::new(&args.out),
    );

    session
        .start_measurement(args.kind, &args.address)
        .with_context(|| format!("starting {} on {}", args.kind, args.address))?;
    while !session.wait_until_idle(Duration::from_secs(1)) {
        info!("{} samples so far", session.raw_samples().len());
    }
    if let Some(err) = session.last_error() {
        bail!("measurement failed: {err}");
    }

    let raw = session.raw_samples();
    let filtered = session.filtered_samples();
    info!("{} samples stored under {}", raw.len(), args.out.display());

    if let Some(path) = &args.plot {
        let record = MeasurementRecord::from_samples(args.kind, &raw, &filtered);
        let png = render_trace_png(&record, &PlotStyle::default()).context("rendering trace")?;
        fs::write(path, png).with_context(|| format!("writing {}", path.display()))?;
        info!("trace written to {}", path.display());
    }
    connection.disconnect();
    Ok(())
}

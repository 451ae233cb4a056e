/*!
# Acquire

Command-line front end of the acquisition core. Runs one acquisition mode
against the simulated camera and scan generator and reports every result
bundle.

## Usage

### Single raster scan
```bash
acquire run --mode raster
```

### Continuous hyperspectral acquisition, JSON summaries on stdout
```bash
acquire run --mode raster-hyperspectral --continuous --cycles 5 --json
```

### Raster scan at half the configured field
```bash
acquire run --mode raster --scan halve
```

### Write a default configuration file
```bash
acquire config --output acquire.toml
```
*/

use acquisition::config::AppConfig;
use acquisition::{AcqState, AcquisitionController, HealthPoller, RunMode, SimulatedDriver, SimulatedSensor};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shared::{AcquisitionMode, ResultBundle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "acquire")]
#[command(about = "Callback-driven camera and scan acquisition")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "acquire.toml", global = true)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: Level,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm a mode, acquire and report bundles
    Run {
        /// Acquisition mode: frame, spectrum-cube, raster, raster-hyperspectral
        #[arg(short, long, default_value = "frame")]
        mode: String,

        /// Keep acquiring until interrupted or --cycles finals arrived
        #[arg(long)]
        continuous: bool,

        /// Stop after this many final bundles
        #[arg(long)]
        cycles: Option<u64>,

        /// Print one JSON summary per bundle on stdout
        #[arg(long)]
        json: bool,

        /// Resize the configured scan field before arming
        #[arg(long, value_enum)]
        scan: Option<ScanResize>,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "acquire.toml")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScanResize {
    /// Twice the scan pixel counts
    Double,
    /// Half the scan pixel counts, at least one pixel
    Halve,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr to keep stdout clean for summaries
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(cli.log_level)
        .init();

    match cli.command {
        Commands::Run { mode, continuous, cycles, json, scan } => {
            let mode = AcquisitionMode::from_name(&mode).ok_or_else(|| anyhow!("unknown acquisition mode '{}'", mode))?;
            let mut config = load_config(&cli.config)?;
            let field = &mut config.acquisition.scan;
            match scan {
                Some(ScanResize::Double) => *field = field.doubled(),
                Some(ScanResize::Halve) => *field = field.halved(),
                None => {}
            }
            run_acquisition(config, mode, continuous, cycles, json)
        }
        Commands::Config { output } => generate_config_file(output),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load_from_file(path)
    } else {
        warn!("⚠️ No config at {}, using defaults", path.display());
        Ok(AppConfig::new())
    }
}

/// Run one mode until it completes, is interrupted or produced `cycles` finals
fn run_acquisition(
    mut config: AppConfig,
    mode: AcquisitionMode,
    continuous: bool,
    cycles: Option<u64>,
    json: bool,
) -> Result<()> {
    config.acquisition.mode = mode;
    config.acquisition.run = if continuous { RunMode::Continuous } else { RunMode::Single };

    let mut health = if config.health.enabled {
        let (poller, reports) = HealthPoller::spawn(
            SimulatedSensor::default(),
            Duration::from_millis(config.health.interval_ms),
            config.acquisition.camera.set_point_c,
        )?;
        Some((poller, reports))
    } else {
        None
    };

    let driver = SimulatedDriver::new(&config.simulator);
    let (mut controller, sink) = AcquisitionController::new(driver, config.acquisition.clone(), &config.engine);

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        running_handler.store(false, Ordering::SeqCst);
    })?;

    info!("🚀 Starting {} acquisition", mode);
    controller.arm(mode).context("Failed to arm acquisition")?;
    controller.start().context("Failed to start acquisition")?;

    let mut finals = 0u64;
    while running.load(Ordering::SeqCst) {
        if let Some(bundle) = sink.next_final(Duration::from_millis(100)) {
            finals += 1;
            report(&bundle, json)?;
        }
        for bundle in sink.previews.try_iter() {
            if json {
                report(&bundle, json)?;
            }
        }
        if let Some((_, reports)) = &health {
            for reading in reports.try_iter() {
                info!("🌡️ {:.1} °C{}", reading.celsius, if reading.locked { " (locked)" } else { "" });
            }
        }

        if cycles.is_some_and(|limit| finals >= limit) {
            info!("🎯 Reached {} final bundle(s)", finals);
            break;
        }
        if controller.poll()? == AcqState::Idle {
            break;
        }
    }

    if let Err(e) = controller.stop(!running.load(Ordering::SeqCst)) {
        warn!("⚠️ {}", e);
    }
    for bundle in sink.finals.try_iter() {
        finals += 1;
        report(&bundle, json)?;
    }
    if let Some((mut poller, _)) = health.take() {
        poller.stop();
    }

    info!("✅ Acquisition completed: {} final bundle(s)", finals);
    Ok(())
}

fn report(bundle: &ResultBundle, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&bundle.summary())?);
        return Ok(());
    }
    let items: Vec<String> = bundle
        .items
        .iter()
        .map(|item| format!("{} {:?}", item.name, item.dims()))
        .collect();
    if bundle.is_degraded() {
        warn!("⚠️ Cycle {} final without {:?}: {}", bundle.cycle, bundle.missing, items.join(", "));
    } else {
        info!("📦 Cycle {} {:?}: {}", bundle.cycle, bundle.completeness, items.join(", "));
    }
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   acquire --config {} run", output_path.display());

    Ok(())
}

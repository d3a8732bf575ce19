//! Loopmeter - monitor-source capture driver
//!
//! Polls amplitude or spectrum snapshots and prints one comma-separated line
//! per snapshot on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use loopmeter::audio::cpal_backend::CpalBackend;
use loopmeter::{CaptureEngine, EngineConfig, PeakHold, SnapshotMode};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

struct Options {
    mode: SnapshotMode,
    hold: bool,
    config_path: Option<PathBuf>,
    interval: Duration,
    count: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: SnapshotMode::Spectrum,
            hold: false,
            config_path: None,
            interval: Duration::from_millis(20),
            count: None,
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging; stdout carries snapshot data
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("loopmeter=info".parse()?)
                .add_directive("loopmeter_core=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                let config = load_config(options.config_path.as_deref());
                return list_sources(config);
            }
            "--version" | "-v" => {
                println!(
                    "loopmeter {} ({})",
                    loopmeter::VERSION,
                    loopmeter::BUILD_DATE
                );
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--amplitude" | "-a" => options.mode = SnapshotMode::Amplitude,
            "--spectrum" | "-s" => options.mode = SnapshotMode::Spectrum,
            "--hold" => options.hold = true,
            "--config" | "-c" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: --config requires a path");
                    return Ok(());
                };
                options.config_path = Some(PathBuf::from(value));
                i += 1;
            }
            "--interval" | "-i" => {
                let Some(ms) = args.get(i + 1).and_then(|v| v.parse::<u64>().ok()) else {
                    eprintln!("Error: --interval requires a number of milliseconds");
                    return Ok(());
                };
                options.interval = Duration::from_millis(ms);
                i += 1;
            }
            "--count" | "-n" => {
                let Some(count) = args.get(i + 1).and_then(|v| v.parse::<u64>().ok()) else {
                    eprintln!("Error: --count requires a number");
                    return Ok(());
                };
                options.count = Some(count);
                i += 1;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    let config = load_config(options.config_path.as_deref());
    run(config, &options)
}

fn print_help() {
    println!("Usage: loopmeter [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -l, --list              List capture sources and exit");
    println!("  -a, --amplitude         Print per-frame loudness");
    println!("  -s, --spectrum          Print calibrated spectrum (default)");
    println!("      --hold              Hold peaks over the last 50 ms");
    println!(
        "  -c, --config PATH       Config file (default: {})",
        EngineConfig::default_path().display()
    );
    println!("  -i, --interval MS       Milliseconds between snapshots (default: 20)");
    println!("  -n, --count N           Stop after N snapshots");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Set RUST_LOG=loopmeter_core=debug for negotiation details.");
}

fn load_config(path: Option<&std::path::Path>) -> EngineConfig {
    match path {
        Some(path) => EngineConfig::load_or_default(path),
        None => EngineConfig::load_or_default(&EngineConfig::default_path()),
    }
}

fn list_sources(config: EngineConfig) -> Result<()> {
    let engine = CaptureEngine::new(CpalBackend::new(), config)?;
    let sources = engine.list_sources().context("Failed to list capture sources")?;

    if sources.is_empty() {
        println!("No capture sources found.");
        return Ok(());
    }

    println!("Found {} source(s):", sources.len());
    println!();
    for (i, source) in sources.iter().enumerate() {
        let kind = if source.is_monitor() { "monitor" } else { "input" };
        println!("  {}. {} [{}]", i + 1, source.label(), kind);
        if source.description.is_some() {
            println!("     name: {}", source.name);
        }
    }
    Ok(())
}

fn run(config: EngineConfig, options: &Options) -> Result<()> {
    let engine = CaptureEngine::new(CpalBackend::new(), config)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        error!("Failed to install Ctrl+C handler: {}", e);
    }

    let startup = engine.start()?;
    if let Err(e) = startup.wait() {
        error!("Capture failed to start: {}", e);
        return Err(e.into());
    }
    info!(bins = engine.bin_count(), mode = ?options.mode, "Capture running");

    let mut hold = PeakHold::new(engine.bin_count());
    let mut printed = 0u64;

    while running.load(Ordering::SeqCst) {
        if options.count.is_some_and(|count| printed >= count) {
            break;
        }
        if !engine.is_active() {
            if let Some(e) = engine.last_error() {
                error!("Capture ended: {}", e);
            }
            break;
        }

        let mut values = engine.snapshot(options.mode);
        if options.hold {
            hold.push(&values);
            values = hold.current();
        }
        println!("{}", format_line(&values));
        printed += 1;

        std::thread::sleep(options.interval);
    }

    info!(snapshots = printed, stats = ?engine.stats(), "Stopping capture");
    engine.stop()?;
    Ok(())
}

fn format_line(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| format!("{:.4}", v))
        .collect::<Vec<_>>()
        .join(",")
}

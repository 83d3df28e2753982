// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use wbflash_config::{BenchManifest, ControllerKind};
use wbflash_core::metrics::{BusMetrics, MetricsSnapshot};
use wbflash_core::scenario::{Scenario, ScenarioReport};

mod vcd_trace;

const EXIT_PASS: u8 = 0;
const EXIT_SCENARIO_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_PROTOCOL_ERROR: u8 = 3;

const REPORT_SCHEMA_VERSION: &str = "1.0";

fn parse_controller(s: &str) -> Result<ControllerKind, String> {
    s.parse::<ControllerKind>().map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Wishbone SPI flash controller test bench",
    long_about = None
)]
struct Cli {
    /// Controller variant to drive (overrides the manifest)
    #[arg(long, value_parser = parse_controller)]
    controller: Option<ControllerKind>,

    /// Path to the bench manifest (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for the flash contents and programmed payload (overrides the manifest)
    #[arg(long)]
    seed: Option<u64>,

    /// Write a VCD waveform of the bus and SPI lines
    #[arg(long)]
    vcd: Option<PathBuf>,

    /// Write a JSON run report
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log every bus transaction and flash command
    #[arg(short, long)]
    trace: bool,
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    result_schema_version: &'static str,
    status: &'static str,
    controller: ControllerKind,
    seed: u64,
    #[serde(flatten)]
    scenario: &'a ScenarioReport,
    metrics: MetricsSnapshot,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let manifest = match load_manifest(&cli) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("{:#}", e);
            println!("TEST FAILED");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    run(&cli, &manifest)
}

fn load_manifest(cli: &Cli) -> anyhow::Result<BenchManifest> {
    let mut manifest = match &cli.config {
        Some(path) => {
            info!("Loading bench manifest: {:?}", path);
            BenchManifest::from_file(path)?
        }
        None => BenchManifest::default(),
    };
    if let Some(kind) = cli.controller {
        manifest.controller = kind;
    }
    if let Some(seed) = cli.seed {
        manifest.scenario.seed = seed;
    }
    manifest.validate()?;
    Ok(manifest)
}

fn run(cli: &Cli, manifest: &BenchManifest) -> ExitCode {
    info!(
        "Starting WbFlash bench: {} (seed {})",
        manifest.controller, manifest.scenario.seed
    );

    let mut scenario = match Scenario::from_manifest(manifest) {
        Ok(scenario) => scenario,
        Err(e) => {
            error!("{:#}", e);
            println!("TEST FAILED");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let metrics = Arc::new(BusMetrics::new());
    scenario.bench_mut().add_observer(metrics.clone());

    if let Some(path) = &cli.vcd {
        match vcd_trace::VcdObserver::new(path.clone()) {
            Ok(observer) => {
                info!("Writing waveform to {:?}", path);
                scenario.bench_mut().add_observer(Arc::new(observer));
            }
            Err(e) => {
                error!("Failed to create VCD file {:?}: {:#}", path, e);
                println!("TEST FAILED");
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        }
    }

    let report = scenario.run();
    // Dropping the bench flushes the waveform.
    drop(scenario);

    let snapshot = metrics.snapshot();
    info!(
        "Ticks: {}, stall ticks: {}, acks: {}, SPI frames: {}",
        snapshot.ticks, snapshot.stall_ticks, snapshot.acks, snapshot.spi_frames
    );

    if let Some(path) = &cli.report {
        let run_report = RunReport {
            result_schema_version: REPORT_SCHEMA_VERSION,
            status: if report.success() { "pass" } else { "fail" },
            controller: manifest.controller,
            seed: manifest.scenario.seed,
            scenario: &report,
            metrics: snapshot,
        };
        if let Err(e) = write_report(path, &run_report) {
            error!("Failed to write report {:?}: {:#}", path, e);
        }
    }

    if report.success() {
        println!("SUCCESS!!");
        return ExitCode::from(EXIT_PASS);
    }

    println!("FAIL-HERE");
    println!("TEST FAILED");
    if report.protocol_violation {
        ExitCode::from(EXIT_PROTOCOL_ERROR)
    } else {
        ExitCode::from(EXIT_SCENARIO_FAIL)
    }
}

fn write_report(path: &Path, report: &RunReport<'_>) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

//! pti: command-line pipeline for three-detector PTI measurements.
//!
//! Three subcommands over one config file:
//! - `decimate`   raw capture file -> lock-in CSV, one row per second
//! - `phase-scan` lock-in CSV of a sweep -> calibration constants, written
//!   back into the config file
//! - `invert`     lock-in CSV + calibration -> PTI_Inversion.csv

use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use pti_core::block::DEFAULT_SAMPLES;
use pti_core::config::{
    calibration_from_config, delimiter_from_config, options_from_config, store_calibration, Config,
};
use pti_core::types::{Calibration, Result};
use pti_core::{inversion, optimizer, phase_scan};

mod capture;
mod csv_io;
mod trace;

/// Output file of the `invert` subcommand.
const INVERSION_OUTPUT: &str = "PTI_Inversion.csv";

#[derive(Parser)]
#[command(name = "pti", version, about = "Three-detector PTI signal processing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decimate a raw capture file into lock-in rows
    Decimate {
        /// Config file with paths and mode flags
        #[arg(short, long, default_value = "pti.conf")]
        config: PathBuf,

        /// Resume an interrupted run: append rows, skip the header
        #[arg(long)]
        append: bool,
    },

    /// Calibrate output and system phases from a phase-scan sweep
    PhaseScan {
        /// Config file; calibration results are written back into it
        #[arg(short, long, default_value = "pti.conf")]
        config: PathBuf,
    },

    /// Invert decimated rows into the PTI signal
    Invert {
        /// Config file with paths, mode flags, and calibration
        #[arg(short, long, default_value = "pti.conf")]
        config: PathBuf,
    },
}

fn main() {
    trace::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Decimate { config, append } => cmd_decimate(&config, append),
        Commands::PhaseScan { config } => cmd_phase_scan(&config),
        Commands::Invert { config } => cmd_invert(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_decimate(config_path: &Path, append: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let options = options_from_config(&config)?;
    if options.online {
        warn!("online mode is not supported; processing the capture offline");
    }
    let input = config.string("file", "decimation_path")?;
    let output = config.string("file", "pti_inversion")?;
    let delimiter = delimiter_from_config(&config)?;

    let mut stream = capture::BlockStream::open(input, DEFAULT_SAMPLES)?;
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(output)?;
    let mut writer = csv_io::DecimationWriter::new(BufWriter::new(file), delimiter);
    if !append {
        writer.write_header()?;
    }

    let blocks = capture::decimate_stream(&mut stream, &mut writer, options)?;
    info!(blocks, output, "decimation finished");
    Ok(())
}

fn cmd_phase_scan(config_path: &Path) -> Result<()> {
    let mut config = Config::load(config_path)?;
    let delimiter = delimiter_from_config(&config)?;
    let sweep_path = config.string("file", "pti_inversion")?.to_string();

    let rows = csv_io::read_decimation(
        BufReader::new(std::fs::File::open(&sweep_path)?),
        delimiter,
    )?;
    let sweeps = csv_io::dc_sweeps(&rows);

    let estimate = phase_scan::estimate(&sweeps)?;
    let intensities = optimizer::Intensities::new(
        &estimate.scaled[0],
        &estimate.scaled[1],
        &estimate.scaled[2],
    );
    let minimum = optimizer::system_phases(&intensities);

    let calibration = Calibration {
        min_intensity: estimate.min_intensity,
        max_intensity: estimate.max_intensity,
        output_phase: estimate.output_phase,
        system_phase: [
            0.0,
            minimum.phases[0].rem_euclid(std::f64::consts::TAU),
            minimum.phases[1].rem_euclid(std::f64::consts::TAU),
        ],
        swapped: estimate.swapped,
    };
    calibration.validate()?;

    store_calibration(&mut config, &calibration);
    config.save(config_path)?;
    info!(
        output_phase_2 = calibration.output_phase[1],
        output_phase_3 = calibration.output_phase[2],
        system_phase_2 = calibration.system_phase[1],
        system_phase_3 = calibration.system_phase[2],
        swapped = calibration.swapped,
        converged = minimum.converged,
        "phase-scan calibration written to config"
    );
    Ok(())
}

fn cmd_invert(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let options = options_from_config(&config)?;
    let calibration = calibration_from_config(&config)?;
    let delimiter = delimiter_from_config(&config)?;
    let rows_path = config.string("file", "pti_inversion")?;

    let rows = csv_io::read_decimation(
        BufReader::new(std::fs::File::open(rows_path)?),
        delimiter,
    )?;

    let mut engine = inversion::Inversion::new(calibration, options)?;
    let output = engine.invert(&rows);

    let file = std::fs::File::create(INVERSION_OUTPUT)?;
    csv_io::write_inversion(BufWriter::new(file), &output, delimiter)?;

    info!(rows = rows.len(), output = INVERSION_OUTPUT, "inversion finished");
    Ok(())
}

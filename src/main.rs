use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use easyservo::logging::{init_logging, parse_level};
use easyservo::monitor::{AxisTrace, Monitor};
use easyservo::{
    CommandChannel, DriverError, RegisterCatalog, SampleBatch, ScopeSession, Settings,
};

#[derive(Parser, Debug)]
#[command(name = "easyservo", about = "Read parameters and scope data from EasyServo drives")]
struct Args {
    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Drive to use, as NAME=PATH (e.g. z-axis=/dev/ttyUSB0). Repeatable.
    #[arg(long = "port", value_name = "NAME=PATH")]
    ports: Vec<String>,
    /// Register catalog (TOML) replacing the built-in parameter table
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Check that each drive answers the introduction
    Handshake,
    /// Read the drive parameter table
    Params,
    /// Read the alarm summary
    Alarms,
    /// Stream following-error captures
    Scope {
        /// Capture duration in 10 ms ticks
        #[arg(long)]
        duration_ticks: Option<u16>,
        /// Stop after this many batches
        #[arg(long)]
        batches: Option<usize>,
        /// Keep the configured calibration instead of reading it from the drive
        #[arg(long)]
        skip_params: bool,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn parse_ports(specs: &[String]) -> BTreeMap<String, String> {
    specs
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((name, path)) => (name.to_string(), path.to_string()),
            None => (entry.clone(), entry.clone()),
        })
        .collect()
}

/// Open every axis and require a successful introduction.
fn connect(settings: &Settings) -> Result<Vec<(String, CommandChannel)>> {
    let serial = settings.serial.settings();
    let mut channels = Vec::with_capacity(settings.axes.len());
    for (name, path) in &settings.axes {
        let mut channel = CommandChannel::open(path, &serial)
            .with_context(|| format!("Failed to open {name} at {path}"))?;
        if !channel.handshake()? {
            return Err(DriverError::HandshakeFailed)
                .with_context(|| format!("{name} on {path}"));
        }
        channels.push((name.clone(), channel));
    }
    Ok(channels)
}

fn print_batch(axis: &str, trace: &AxisTrace, batch: &SampleBatch) {
    let (min, max, mean) = match (trace.min(), trace.max(), trace.mean()) {
        (Some(min), Some(max), Some(mean)) => (min, max, mean),
        _ => return,
    };
    let crc = if batch.crc_ok { "" } else { " (crc mismatch)" };
    print!(
        "{axis}: {} samples over {:.3}s | window {:.1}s min {:.3} avg {:.3} max {:.3} mm{crc}",
        batch.len(),
        batch.finished - batch.started,
        trace.span(),
        min,
        mean,
        max
    );
    if let Some(timing) = &batch.timing {
        print!(" | capture {:?} readout {:?}", timing.capture, timing.readout);
    }
    println!();
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(parse_level(args.log_level.as_deref()));

    let mut settings = Settings::load_or_default(args.config.as_deref())?;
    if !args.ports.is_empty() {
        settings.axes = parse_ports(&args.ports);
    }
    let catalog = match &args.catalog {
        Some(path) => RegisterCatalog::load(path)?,
        None => RegisterCatalog::builtin(),
    };

    let channels = connect(&settings)?;

    match args.command {
        Cmd::Handshake => {
            for (name, _) in &channels {
                println!("{name}: ok");
            }
        }
        Cmd::Params => {
            for (name, mut channel) in channels {
                let values = channel.read_parameters(&catalog)?;
                println!("{name}:");
                for command in catalog.commands() {
                    match values.get(&command.description) {
                        Some(v) => println!("  {:<36} {v}", command.description),
                        None => println!("  {:<36} -", command.description),
                    }
                }
            }
        }
        Cmd::Alarms => {
            for (name, mut channel) in channels {
                match channel.read_alarms()? {
                    Some(alarm) => println!("{name}: {alarm:?}"),
                    None => println!("{name}: no response"),
                }
            }
        }
        Cmd::Scope {
            duration_ticks,
            batches,
            skip_params,
        } => {
            let ticks = duration_ticks.unwrap_or(settings.scope.duration_ticks);
            let mut monitor = Monitor::new(settings.scope.poll_interval());
            for (name, channel) in channels {
                let mut session = ScopeSession::new(channel, settings.mechanics.calibration());
                if !skip_params {
                    session.calibrate(&catalog)?;
                }
                session.configure(ticks)?;
                println!(
                    "{name}: following-error limit +/-{:.3} mm",
                    session.calibration().following_error_limit_mm()
                );
                monitor.add_axis(name, session, settings.scope.window_secs);
            }

            let mut sink = |axis: &str, trace: &AxisTrace, batch: &SampleBatch| {
                print_batch(axis, trace, batch)
            };
            monitor.run(&mut sink, batches)?;
        }
    }

    Ok(())
}

//! Stream received samples from a bladeRF to a file.
//!
//! # Usage
//!
//! ```sh
//! # Capture 1000 buffers to a file
//! cargo run -p bladerf-usb --example bladerf_rx -- --blocks 1000 -o samples.bin
//!
//! # Count buffers from the second device, with debug logs
//! cargo run -p bladerf-usb --example bladerf_rx -- --device-index 1 -vv
//!
//! # Show connected devices and their indices
//! cargo run -p bladerf-usb --example bladerf_rx -- --list
//! ```
//!
//! The FPGA must already be loaded.

use std::fs::File;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bladerf_stream::{Direction, StreamConfig, StreamController};
use bladerf_usb::{BladeRf, BulkConfig};
use clap::{ArgAction, Parser};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream RX samples from a bladeRF", long_about = None)]
struct Args {
    /// bladeRF device index
    #[arg(long, default_value_t = 0)]
    device_index: usize,

    /// List connected devices and exit
    #[arg(long)]
    list: bool,

    /// Number of buffers to capture
    #[arg(short, long, default_value_t = 1000)]
    blocks: usize,

    /// Output file (samples are discarded when omitted)
    #[arg(short, long)]
    output: Option<String>,

    /// Buffers per read call
    #[arg(long, default_value_t = 16)]
    batch: usize,

    /// Read timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Verbosity level (-v=info, -vv=debug, -vvv=trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.list {
        let devices = BladeRf::list_devices()?;
        if devices.is_empty() {
            println!("No bladeRF found");
        }
        for (index, location) in devices.iter().enumerate() {
            println!("{}: {}", index, location);
        }
        return Ok(());
    }

    let device = Arc::new(BladeRf::open_by_index(args.device_index)?);
    let (major, minor) = device.version()?;
    info!("firmware version {}.{}", major, minor);
    if !device.fpga_loaded()? {
        return Err("FPGA is not loaded".into());
    }

    let transport = Arc::new(device.transport(BulkConfig::default())?);
    let config = StreamConfig::default();
    let buffer_size = config.buffer_size;
    let controller = StreamController::new(config, transport, device)?;

    let mut output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(io::BufWriter::new(File::create(path)?)),
        None => Box::new(io::sink()),
    };

    let mut rx = controller.open(Direction::Rx)?;
    controller.enable(Direction::Rx)?;

    let timeout = Duration::from_millis(args.timeout_ms);
    let mut buf = vec![0u8; args.batch.max(1) * buffer_size];
    let mut received = 0;
    let start = Instant::now();

    while received < args.blocks {
        let wanted = (args.blocks - received).min(args.batch.max(1)) * buffer_size;
        match rx.read(&mut buf[..wanted], timeout) {
            Ok(n) => {
                output.write_all(&buf[..n])?;
                received += n / buffer_size;
            }
            Err(e) if e.is_timeout() => warn!("no samples for {:?}", timeout),
            Err(e) => return Err(e.into()),
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    output.flush()?;
    controller.disable(Direction::Rx)?;

    let stats = controller.stats(Direction::Rx);
    eprintln!(
        "Received {} buffers ({} bytes) in {:.2}s, {:.1} MB/s, {} overruns",
        received,
        stats.bytes_transferred,
        elapsed,
        stats.bytes_transferred as f64 / elapsed / 1e6,
        stats.overruns
    );
    Ok(())
}

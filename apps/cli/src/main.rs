//! `hfx` - command-line diagnostics for the USB hashing boards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rand::RngCore;
use tracing::{error, info, warn};

use hfx_core::parser::{Parser as FrameParser, ParserOptions};
use hfx_core::payload::Payload;
use hfx_core::protocol::constants::{
    REBOOT_MODE_APP, REBOOT_MODE_LOADER, U_MAGIC, USBCTRL_REBOOT, USBCTRL_VERSION,
};
use hfx_core::protocol::{Header, Opcode};
use hfx_core::transport::{NusbDevice, SessionConfig, UsbContext, UsbEvent, UsbSession};

/// The board misbehaves on exactly-64-byte transfers, so a ping frame
/// must stay under one full bulk packet.
const MAX_PING_QUARTETS: u8 = 13;

#[derive(Parser, Debug)]
#[command(author, version, about = "Diagnostic tool for USB hashing boards", long_about = None)]
struct Args {
    /// Select the device at this bus address
    #[arg(long)]
    addr: Option<u8>,

    /// Select the device on this bus
    #[arg(long)]
    bus: Option<String>,

    /// Talk to the boot loader interface instead of the application
    #[arg(long)]
    loader: bool,

    /// Load session options from a TOML file
    #[arg(long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send an OP_PING with a random payload and check the echo
    Ping {
        /// Payload size in 4-byte words (0-13)
        #[arg(long, default_value_t = 0)]
        quartets: u8,
    },
    /// Decode and print the inbound frame stream
    Dump {
        /// Stop after this many seconds (0 = run until removed)
        #[arg(long, default_value_t = 0)]
        seconds: u64,
        /// Expect a trailing CRC-32 after each payload
        #[arg(long)]
        data_crc: bool,
    },
    /// Ask the application firmware to jump into the boot loader
    EnterLoader,
    /// Set the two chassis fan speeds, percent
    SetFans { j9: u8, j11: u8 },
    /// Read firmware version information over the control pipe
    Version,
    /// Reboot the board
    Reboot {
        /// Restart into the boot loader instead of the application
        #[arg(long)]
        loader: bool,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading session config from {path}"))?,
        None => SessionConfig::default(),
    };
    if args.addr.is_some() {
        config.address = args.addr;
    }
    if args.bus.is_some() {
        config.bus = args.bus.clone();
    }
    if args.loader {
        config.loader = true;
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = session_config(&args)?;
    match args.command {
        Command::Ping { quartets } => ping(&config, quartets),
        Command::Dump { seconds, data_crc } => dump(&config, seconds, data_crc),
        Command::EnterLoader => enter_loader(&config),
        Command::SetFans { j9, j11 } => set_fans(&config, j9, j11),
        Command::Version => version(&config),
        Command::Reboot { loader } => reboot(&config, loader),
    }
}

/// Open a session that ignores inbound traffic; for commands that only
/// transmit.
fn open_quiet(config: &SessionConfig) -> Result<(UsbContext, UsbSession<NusbDevice>)> {
    let context = UsbContext::new(|event| {
        if let UsbEvent::Removed = event {
            warn!("device removed");
        }
    })
    .context("initializing USB transport")?;
    let session = context.open(config).context("opening device")?;
    Ok((context, session))
}

fn ping(config: &SessionConfig, quartets: u8) -> Result<()> {
    if quartets > MAX_PING_QUARTETS {
        bail!("{quartets} quartets is too large to send (maximum {MAX_PING_QUARTETS})");
    }

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let parser = Mutex::new(FrameParser::new(ParserOptions::default()));
    let context = UsbContext::new(move |event| {
        if let UsbEvent::Data(bytes) = event {
            parser.lock().unwrap().feed(bytes, |frame| {
                if frame.header.opcode() == Some(Opcode::Ping) {
                    let _ = tx.send(frame.payload.to_vec());
                }
            });
        }
    })
    .context("initializing USB transport")?;
    let session = context.open(config).context("opening device")?;

    let mut payload = vec![0u8; 4 * quartets as usize];
    rand::thread_rng().fill_bytes(&mut payload);

    let mut frame = Header::new(Opcode::Ping, 0, 0, 0, quartets).encode().to_vec();
    frame.extend_from_slice(&payload);

    let started = Instant::now();
    session.write(&frame).context("sending ping")?;

    let echoed = rx
        .recv_timeout(Duration::from_secs(1))
        .context("no ping reply within 1s")?;
    let elapsed = started.elapsed();

    if echoed != payload {
        bail!(
            "ping reply did not match: sent {} bytes, got {} bytes back",
            payload.len(),
            echoed.len()
        );
    }
    println!(
        "ping: {} payload bytes echoed in {:.1} ms",
        payload.len(),
        elapsed.as_secs_f64() * 1e3
    );
    Ok(())
}

fn dump(config: &SessionConfig, seconds: u64, data_crc: bool) -> Result<()> {
    let parser = Arc::new(Mutex::new(FrameParser::new(ParserOptions {
        include_data_crc: data_crc || config.include_data_crc,
    })));
    let removed = Arc::new(AtomicBool::new(false));

    let context = UsbContext::new({
        let parser = Arc::clone(&parser);
        let removed = Arc::clone(&removed);
        move |event| match event {
            UsbEvent::Data(bytes) => {
                parser.lock().unwrap().feed(bytes, print_frame);
            }
            UsbEvent::Removed => removed.store(true, Ordering::Release),
            UsbEvent::TransferError(e) => warn!("inbound transfer error: {e}"),
            UsbEvent::Hotplug {
                arrived,
                bus,
                address,
            } => info!(
                "device {} (bus {bus}, address {address})",
                if *arrived { "arrived" } else { "departed" }
            ),
        }
    })
    .context("initializing USB transport")?;
    let session = context.open(config).context("opening device")?;

    let deadline = (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds));
    loop {
        if removed.load(Ordering::Acquire) {
            warn!("device removed, stopping");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let stats = parser.lock().unwrap().stats();
    println!(
        "link: {} sync losses, {} bytes discarded, {} payload CRC errors",
        stats.sync_loss, stats.bytes_discarded, stats.data_crc_errors
    );
    session.close();
    Ok(())
}

fn print_frame(frame: &hfx_core::parser::Frame<'_>) {
    let header = frame.header;
    let op = match header.opcode() {
        Some(op) => op.to_string(),
        None => format!("op 0x{:02x}", header.operation_code),
    };
    match Payload::decode(&header, frame.payload) {
        Ok(Payload::Unknown(bytes)) if !bytes.is_empty() => {
            println!(
                "{op} chip {} core {} hdata 0x{:04x}: {} payload bytes",
                header.chip_address,
                header.core_address,
                header.hdata,
                bytes.len()
            );
        }
        Ok(Payload::Unknown(_)) => {
            println!(
                "{op} chip {} core {} hdata 0x{:04x}",
                header.chip_address, header.core_address, header.hdata
            );
        }
        Ok(payload) => println!("{op} chip {}: {payload:?}", header.chip_address),
        Err(e) => warn!("{op}: undecodable payload: {e}"),
    }
}

fn enter_loader(config: &SessionConfig) -> Result<()> {
    let (_context, session) = open_quiet(config)?;
    let frame = Header::new(Opcode::Dfu, 0, 0, 0, 0).encode();
    session.write(&frame).context("sending OP_DFU")?;
    println!("loader entry requested");
    Ok(())
}

fn set_fans(config: &SessionConfig, j9: u8, j11: u8) -> Result<()> {
    if j9 > 100 || j11 > 100 {
        bail!("fan speeds are percentages, 0-100");
    }
    let (_context, session) = open_quiet(config)?;

    // Two 6-byte fan records: a validity flag followed by the speed on
    // a 0-255 scale.
    let mut data = [0u8; 12];
    data[4] = 1;
    data[5] = (u16::from(j9) * 255 / 100) as u8;
    data[8] = 1;
    data[9] = (u16::from(j11) * 255 / 100) as u8;

    let mut frame = Header::new(Opcode::FanSettings, 0, 1, U_MAGIC, 3)
        .encode()
        .to_vec();
    frame.extend_from_slice(&data);
    session.write(&frame).context("sending OP_FAN_SETTINGS")?;
    println!("fan speeds set: J9 {j9}%, J11 {j11}%");
    Ok(())
}

fn version(config: &SessionConfig) -> Result<()> {
    let (_context, session) = open_quiet(config)?;
    let mut buf = [0u8; 64];
    let n = session
        .control_in(USBCTRL_VERSION, 0, 0, &mut buf)
        .context("version request")?;
    if n < 4 {
        bail!("short version reply: {n} bytes");
    }
    let word = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let mode = if word >> 31 != 0 { "loader" } else { "app" };
    println!("firmware version: {} ({mode})", word & 0x0FFF_FFFF);
    if n >= 9 {
        let crc = u32::from_le_bytes(buf[5..9].try_into().unwrap());
        println!("firmware crc32: 0x{crc:08x}");
    }
    Ok(())
}

fn reboot(config: &SessionConfig, loader: bool) -> Result<()> {
    let (_context, session) = open_quiet(config)?;
    let mode = if loader {
        REBOOT_MODE_LOADER
    } else {
        REBOOT_MODE_APP
    };
    session
        .control_out(USBCTRL_REBOOT, mode, 0, &[])
        .context("reboot request")?;
    println!(
        "reboot into {} requested",
        if loader { "loader" } else { "application" }
    );
    Ok(())
}

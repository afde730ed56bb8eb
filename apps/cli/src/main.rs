mod config;
mod output;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use spd_core::{
    Alert, AlertChannel, ClockMode, ModuleInfo, Pin, Programmer, SerialPortTransport, SpdEvent,
    SpdObserver, TracingObserver,
};
use tracing::{error, info, warn};

use crate::config::FileConfig;
use crate::output::{hex_dump, parse_u8};

#[derive(Parser, Debug)]
#[command(author, version, about = "SPD/PMIC programmer tool", long_about = None)]
struct Args {
    /// Serial port of the programmer (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overrides the config file
    #[arg(short, long)]
    baud: Option<u32>,

    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    Ports,
    /// Check that the programmer answers
    Ping,
    /// Firmware version, name, bus clock and RSWP support
    Info,
    /// List SPD addresses that acknowledge
    Scan,
    /// Detect module type and size
    Detect {
        /// SPD address; every responding address when omitted
        #[arg(value_parser = parse_u8)]
        address: Option<u8>,
    },
    /// Read a whole SPD image
    Read {
        #[arg(value_parser = parse_u8, default_value = "0x50")]
        address: u8,
        /// Save to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a whole SPD image from a file
    Write {
        #[arg(value_parser = parse_u8)]
        address: u8,
        input: PathBuf,
        /// Read back and compare after writing
        #[arg(long)]
        verify: bool,
    },
    /// Reversible write protection
    Rswp {
        #[command(subcommand)]
        action: RswpAction,
    },
    /// Permanent write protection
    Pswp {
        #[command(subcommand)]
        action: PswpAction,
    },
    /// I2C bus clock
    Clock {
        #[command(subcommand)]
        action: ClockAction,
    },
    /// SPD5 hub registers
    Hub {
        #[command(subcommand)]
        action: HubAction,
    },
    /// DDR5 PMIC registers
    Pmic {
        #[command(subcommand)]
        action: PmicAction,
    },
    /// Programmer control pins
    Pin {
        #[command(subcommand)]
        action: PinAction,
    },
    /// Read an internal settings byte
    Setting {
        #[arg(value_parser = parse_u8)]
        offset: u8,
    },
    /// Programmer name
    Name {
        #[command(subcommand)]
        action: NameAction,
    },
    /// Restore firmware defaults
    FactoryReset,
    /// Print alerts as they arrive
    Monitor {
        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum RswpAction {
    Set {
        #[arg(value_parser = parse_u8)]
        block: u8,
    },
    Get {
        #[arg(value_parser = parse_u8)]
        block: u8,
    },
    Clear,
    Support,
}

#[derive(Subcommand, Debug)]
enum PswpAction {
    Set {
        #[arg(value_parser = parse_u8)]
        address: u8,
        /// Confirm that the protection can never be removed
        #[arg(long)]
        yes: bool,
    },
    Get {
        #[arg(value_parser = parse_u8)]
        address: u8,
    },
}

#[derive(Subcommand, Debug)]
enum ClockAction {
    Get,
    Set { mode: ClockArg },
}

#[derive(Subcommand, Debug)]
enum HubAction {
    Get {
        #[arg(value_parser = parse_u8)]
        address: u8,
        #[arg(value_parser = parse_u8)]
        register: u8,
    },
    Set {
        #[arg(value_parser = parse_u8)]
        address: u8,
        #[arg(value_parser = parse_u8)]
        register: u8,
        #[arg(value_parser = parse_u8)]
        value: u8,
    },
}

#[derive(Subcommand, Debug)]
enum PmicAction {
    Read {
        #[arg(value_parser = parse_u8)]
        address: u8,
        #[arg(value_parser = parse_u8)]
        register: u8,
        #[arg(short, long, default_value_t = 1)]
        len: usize,
    },
    Write {
        #[arg(value_parser = parse_u8)]
        address: u8,
        #[arg(value_parser = parse_u8)]
        register: u8,
        #[arg(value_parser = parse_u8)]
        value: u8,
    },
}

#[derive(Subcommand, Debug)]
enum PinAction {
    Get { pin: PinArg },
    Set { pin: PinArg, state: Switch },
    Reset,
}

#[derive(Subcommand, Debug)]
enum NameAction {
    Get,
    Set { name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ClockArg {
    Standard,
    Fast,
}

impl From<ClockArg> for ClockMode {
    fn from(arg: ClockArg) -> Self {
        match arg {
            ClockArg::Standard => ClockMode::Standard,
            ClockArg::Fast => ClockMode::Fast,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PinArg {
    Offline,
    Sa1,
    Hv,
}

impl From<PinArg> for Pin {
    fn from(arg: PinArg) -> Self {
        match arg {
            PinArg::Offline => Pin::OfflineMode,
            PinArg::Sa1 => Pin::Sa1,
            PinArg::Hv => Pin::HighVoltage,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Switch {
    On,
    Off,
}

/// Logs through tracing and forwards alerts for `monitor`.
struct CliObserver {
    alerts: AlertChannel,
}

impl SpdObserver for CliObserver {
    fn on_event(&self, event: &SpdEvent) {
        TracingObserver.on_event(event);
        self.alerts.on_event(event);
    }
}

type Device = Programmer<SerialPortTransport, CliObserver>;

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
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if let Command::Ports = args.command {
        return list_ports();
    }

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let mut config = file.programmer;
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    let port = args
        .port
        .or(file.port)
        .context("no serial port given; pass --port or set `port` in the config file")?;

    let (alerts, alert_rx) = AlertChannel::new();
    let programmer = Programmer::open_with_observer(&port, config, Arc::new(CliObserver { alerts }))
        .with_context(|| format!("connecting to programmer on {}", port))?;

    let result = dispatch(&programmer, args.command, &alert_rx);
    programmer.disconnect();
    result
}

fn list_ports() -> Result<()> {
    let ports = SerialPortTransport::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match (port.usb_ids, port.product) {
            (Some((vid, pid)), Some(product)) => {
                println!("{}  [{:04x}:{:04x}] {}", port.name, vid, pid, product)
            }
            (Some((vid, pid)), None) => println!("{}  [{:04x}:{:04x}]", port.name, vid, pid),
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

fn dispatch(programmer: &Device, command: Command, alerts: &Receiver<(u8, Alert)>) -> Result<()> {
    match command {
        Command::Ports => list_ports()?,
        Command::Ping => {
            let start = Instant::now();
            if !programmer.ping()? {
                bail!("programmer did not answer ready");
            }
            println!("Ready ({} ms)", start.elapsed().as_millis());
        }
        Command::Info => {
            println!("Firmware: {}", programmer.version()?);
            println!("Name:     {}", programmer.name()?);
            println!("Clock:    {}", programmer.clock_mode()?);
            let support = programmer.rswp_support()?;
            println!(
                "RSWP:     DDR3 {}  DDR4 {}  DDR5 {}",
                yes_no(support.ddr3),
                yes_no(support.ddr4),
                yes_no(support.ddr5)
            );
        }
        Command::Scan => {
            let found = programmer.scan_bus()?;
            if found.is_empty() {
                println!("No modules found");
            }
            for address in found {
                println!("0x{:02X}", address);
            }
        }
        Command::Detect { address } => {
            let addresses = match address {
                Some(a) => vec![a],
                None => programmer.scan_bus()?,
            };
            for address in addresses {
                println!("{}", programmer.detect_module(address)?);
            }
        }
        Command::Read { address, output } => {
            let module = detect_present(programmer, address)?;
            let image = programmer.read_entire_spd(&module)?;
            match output {
                Some(path) => {
                    fs::write(&path, &image)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), bytes = image.len(), "SPD saved");
                }
                None => print!("{}", hex_dump(&image, 0)),
            }
        }
        Command::Write {
            address,
            input,
            verify,
        } => write_image(programmer, address, &input, verify)?,
        Command::Rswp { action } => match action {
            RswpAction::Set { block } => report(programmer.set_rswp(block)?, "RSWP set")?,
            RswpAction::Get { block } => {
                println!("Block {}: {}", block, protected(programmer.get_rswp(block)?))
            }
            RswpAction::Clear => report(programmer.clear_rswp()?, "RSWP cleared")?,
            RswpAction::Support => {
                let support = programmer.rswp_support()?;
                println!("{:?}", support);
            }
        },
        Command::Pswp { action } => match action {
            PswpAction::Set { address, yes } => {
                if !yes {
                    bail!("permanent write protection cannot be undone; re-run with --yes");
                }
                report(programmer.set_pswp(address)?, "PSWP set")?;
            }
            PswpAction::Get { address } => {
                println!("0x{:02X}: {}", address, protected(programmer.get_pswp(address)?))
            }
        },
        Command::Clock { action } => match action {
            ClockAction::Get => println!("{}", programmer.clock_mode()?),
            ClockAction::Set { mode } => {
                report(programmer.set_clock_mode(mode.into())?, "Clock mode set")?
            }
        },
        Command::Hub { action } => match action {
            HubAction::Get { address, register } => {
                let value = programmer.read_hub_register(address, register)?;
                println!("MR{} = 0x{:02X}", register, value);
            }
            HubAction::Set {
                address,
                register,
                value,
            } => report(
                programmer.write_hub_register(address, register, value)?,
                "Register written",
            )?,
        },
        Command::Pmic { action } => match action {
            PmicAction::Read {
                address,
                register,
                len,
            } => {
                let data = programmer.read_pmic(address, register, len)?;
                print!("{}", hex_dump(&data, register as usize));
            }
            PmicAction::Write {
                address,
                register,
                value,
            } => report(
                programmer.write_pmic(address, register, value)?,
                "Register written",
            )?,
        },
        Command::Pin { action } => match action {
            PinAction::Get { pin } => {
                let pin = Pin::from(pin);
                println!("{}: {}", pin, if programmer.get_pin(pin)? { "on" } else { "off" });
            }
            PinAction::Set { pin, state } => report(
                programmer.set_pin(pin.into(), matches!(state, Switch::On))?,
                "Pin set",
            )?,
            PinAction::Reset => report(programmer.reset_pins()?, "Pins reset")?,
        },
        Command::Setting { offset } => {
            println!("0x{:02X}", programmer.read_setting(offset)?);
        }
        Command::Name { action } => match action {
            NameAction::Get => println!("{}", programmer.name()?),
            NameAction::Set { name } => report(programmer.set_name(&name)?, "Name set")?,
        },
        Command::FactoryReset => report(programmer.factory_reset()?, "Factory defaults restored")?,
        Command::Monitor { seconds } => monitor(programmer, alerts, seconds)?,
    }
    Ok(())
}

fn detect_present(programmer: &Device, address: u8) -> Result<ModuleInfo> {
    let module = programmer.detect_module(address)?;
    if !module.is_present() {
        bail!("no module at 0x{:02X}", address);
    }
    info!(module = %module, "Module detected");
    Ok(module)
}

fn write_image(programmer: &Device, address: u8, input: &Path, verify: bool) -> Result<()> {
    let image = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let module = detect_present(programmer, address)?;
    if image.len() != module.size {
        bail!(
            "{} is {} bytes but the module holds {}",
            input.display(),
            image.len(),
            module.size
        );
    }

    programmer.write_entire_spd(&module, &image)?;
    info!(bytes = image.len(), "SPD written");

    if verify {
        let readback = programmer.read_entire_spd(&module)?;
        if let Some(offset) = image.iter().zip(&readback).position(|(a, b)| a != b) {
            bail!(
                "verify failed at 0x{:04X}: wrote 0x{:02X}, read 0x{:02X}",
                offset,
                image[offset],
                readback[offset]
            );
        }
        info!("Verify OK");
    }
    Ok(())
}

fn monitor(programmer: &Device, alerts: &Receiver<(u8, Alert)>, seconds: Option<u64>) -> Result<()> {
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    info!("Listening for alerts");

    while deadline.is_none_or(|d| Instant::now() < d) {
        programmer.poll_alerts(Duration::from_millis(200))?;
        for (code, alert) in alerts.try_iter() {
            println!("0x{:02X}  {}", code, alert);
            if alert.is_bus_change() {
                match programmer.scan_bus() {
                    Ok(found) => println!("      modules: {:02X?}", found),
                    Err(e) => warn!(error = %e, "Rescan failed"),
                }
            }
        }
    }
    Ok(())
}

fn report(ok: bool, what: &str) -> Result<()> {
    if !ok {
        bail!("{} failed: device reported failure", what);
    }
    println!("{}", what);
    Ok(())
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn protected(b: bool) -> &'static str {
    if b { "protected" } else { "not protected" }
}

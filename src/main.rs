//! Command-line front end for the CANopen diagnostic tool.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use canopen_rs::canopen::classifier::{FilterClass, MonitorFilter};
use canopen_rs::canopen::client::{NmtCommand, NmtTarget, NodeAddress, PersistenceStatus, SdoSize};
use canopen_rs::logging::init_logger;
use canopen_rs::{DiagnosticTool, Settings, TransceiverType};

#[derive(Parser)]
#[command(name = "canopen-cli", version, about = "CANopen fieldbus diagnostic tool")]
struct Cli {
    /// Settings file (default: ~/.config/canopen-rs/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured bit rate (kbit/s)
    #[arg(long, global = true)]
    bitrate: Option<u32>,

    /// Override the configured transceiver backend
    #[arg(long, global = true, value_enum)]
    transceiver: Option<TransceiverType>,

    /// Override the configured SocketCAN interface
    #[arg(long, global = true)]
    interface: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a node-address range for live devices
    Scan {
        /// First node address (default from settings)
        #[arg(long)]
        start: Option<u8>,
        /// Last node address (default from settings)
        #[arg(long)]
        end: Option<u8>,
    },
    /// Read an object dictionary entry
    Read {
        node: u8,
        /// Object index, e.g. 0x1018
        #[arg(value_parser = parse_u16)]
        index: u16,
        #[arg(default_value = "0")]
        sub_index: u8,
    },
    /// Write an object dictionary entry
    Write {
        node: u8,
        #[arg(value_parser = parse_u16)]
        index: u16,
        sub_index: u8,
        #[arg(value_parser = parse_u32)]
        value: u32,
        /// Payload width in bytes
        #[arg(long, default_value = "4", value_parser = clap::value_parser!(u8))]
        size: u8,
    },
    /// Send an NMT module-control command
    Nmt {
        #[arg(value_enum)]
        command: NmtCommandArg,
        /// Target node address; omit to address all nodes
        #[arg(long)]
        node: Option<u8>,
    },
    /// Permanently change a node's address
    ChangeId {
        current: u8,
        new: u8,
        /// Skip the non-volatile store step
        #[arg(long)]
        volatile: bool,
    },
    /// Check whether a node answers
    TestNode { node: u8 },
    /// Detect the bus bit rate
    Detect {
        /// Save the detected rate to the settings file
        #[arg(long)]
        save: bool,
    },
    /// Print decoded bus traffic
    Monitor {
        /// Only frames from this node
        #[arg(long)]
        node: Option<u8>,
        /// Lowest identifier to show
        #[arg(long, value_parser = parse_u32)]
        id_min: Option<u32>,
        /// Highest identifier to show
        #[arg(long, value_parser = parse_u32)]
        id_max: Option<u32>,
        /// Only frames of this class
        #[arg(long, value_enum)]
        class: Option<FilterClass>,
        /// Stop after this many frames (default: run until interrupted)
        #[arg(long)]
        count: Option<u64>,
    },
    /// Show or update the persisted settings
    Settings {
        /// Persist the current (possibly overridden) settings
        #[arg(long)]
        save: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum NmtCommandArg {
    Start,
    Stop,
    PreOperational,
    ResetNode,
    ResetCommunication,
}

impl From<NmtCommandArg> for NmtCommand {
    fn from(arg: NmtCommandArg) -> Self {
        match arg {
            NmtCommandArg::Start => NmtCommand::Start,
            NmtCommandArg::Stop => NmtCommand::Stop,
            NmtCommandArg::PreOperational => NmtCommand::EnterPreOperational,
            NmtCommandArg::ResetNode => NmtCommand::ResetNode,
            NmtCommandArg::ResetCommunication => NmtCommand::ResetCommunication,
        }
    }
}

fn parse_u16(text: &str) -> Result<u16, String> {
    parse_u32(text)?
        .try_into()
        .map_err(|_| format!("value out of range: {text}"))
}

fn parse_u32(text: &str) -> Result<u32, String> {
    let result = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    result.map_err(|_| format!("not a number: {text}"))
}

fn node(raw: u8) -> Result<NodeAddress> {
    NodeAddress::try_from(raw).map_err(Into::into)
}

fn sdo_size(bytes: u8) -> Result<SdoSize> {
    match bytes {
        1 => Ok(SdoSize::One),
        2 => Ok(SdoSize::Two),
        4 => Ok(SdoSize::Four),
        other => anyhow::bail!("unsupported payload width: {other} (valid: 1, 2, 4)"),
    }
}

fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(bitrate) = cli.bitrate {
        settings.bitrate_kbps = bitrate;
    }
    if let Some(transceiver) = cli.transceiver {
        settings.transceiver = transceiver;
    }
    if let Some(interface) = &cli.interface {
        settings.interface = interface.clone();
    }
    settings.validate()?;

    if let Command::Settings { save } = &cli.command {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        if *save {
            settings.save(&config_path)?;
            println!("saved to {}", config_path.display());
        }
        return Ok(());
    }

    let mut tool = DiagnosticTool::new(settings.clone())?;
    tool.connect()
        .with_context(|| format!("opening bus at {} kbit/s", settings.bitrate_kbps))?;
    tool.claim_command_line();

    match cli.command {
        Command::Scan { start, end } => {
            let start = node(start.unwrap_or(settings.scan_start))?;
            let end = node(end.unwrap_or(settings.scan_end))?;
            let found = tool.scan(start, end)?;
            if found.is_empty() {
                println!("no nodes found in {start}..={end}");
            } else {
                for n in &found {
                    println!("node {n} is alive");
                }
                println!("{} node(s) found", found.len());
            }
        }
        Command::Read { node: n, index, sub_index } => {
            let value = tool.read_parameter(node(n)?, index, sub_index)?;
            println!("0x{index:04X}:{sub_index:02X} = {value} (0x{value:08X})");
        }
        Command::Write { node: n, index, sub_index, value, size } => {
            tool.write_parameter(node(n)?, index, sub_index, value, sdo_size(size)?)?;
            println!("0x{index:04X}:{sub_index:02X} <- {value}");
        }
        Command::Nmt { command, node: target } => {
            let target = match target {
                Some(n) => NmtTarget::Node(node(n)?),
                None => NmtTarget::All,
            };
            tool.send_nmt(command.into(), target)?;
        }
        Command::ChangeId { current, new, volatile } => {
            let outcome = tool.change_node_address(node(current)?, node(new)?, !volatile)?;
            println!("node {current} is now node {new}");
            match outcome.persistence {
                PersistenceStatus::Stored => println!("change stored to non-volatile memory"),
                PersistenceStatus::Failed => {
                    println!("warning: store failed, change is lost on power cycle")
                }
                PersistenceStatus::NotRequested => {
                    println!("change is volatile (store not requested)")
                }
            }
        }
        Command::TestNode { node: n } => {
            if tool.test_node(node(n)?)? {
                println!("node {n} answers");
            } else {
                println!("node {n} does not answer");
                std::process::exit(1);
            }
        }
        Command::Detect { save } => {
            let rate = tool.detect_bitrate()?;
            println!("bus bit rate: {rate} kbit/s");
            if save {
                let mut updated = settings;
                updated.bitrate_kbps = rate;
                updated.save(&config_path)?;
                info!("settings saved to {}", config_path.display());
            }
        }
        Command::Monitor { node: n, id_min, id_max, class, count } => {
            let mut filter = MonitorFilter::default();
            if let Some(n) = n {
                filter.node = Some(node(n)?.get());
            }
            if let Some(min) = id_min {
                filter.id_min = min;
            }
            if let Some(max) = id_max {
                filter.id_max = max;
            }
            if let Some(class) = class {
                filter.class = class;
            }
            let mut remaining = count;
            loop {
                match tool.monitor_once(&filter) {
                    Some((frame, text)) => {
                        println!("{frame}  {text}");
                        if let Some(left) = remaining.as_mut() {
                            *left = left.saturating_sub(1);
                            if *left == 0 {
                                break;
                            }
                        }
                    }
                    None => tool.idle(),
                }
            }
        }
        Command::Settings { .. } => unreachable!("handled before opening the bus"),
    }

    tool.disconnect();
    Ok(())
}

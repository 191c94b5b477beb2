//! mbclient - issue one Modbus request against a slave and print the result

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use tracing::debug;

use modbus_core::constants::DEFAULT_PORT;
use modbus_core::{ExceptionCode, ModbusClient, ModbusError, ProtocolVariant};

#[derive(Debug, Parser)]
#[command(name = "mbclient", version, about = "Modbus master for RTU-over-TCP and Modbus-TCP slaves")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Slave host
    #[arg(long, global = true, default_value = "localhost")]
    host: String,

    /// Slave port
    #[arg(short, long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Wire protocol: ModbusTCP or ModbusRTUviaTCP
    #[arg(long, global = true, default_value = ProtocolVariant::RTU_OVER_TCP_NAME)]
    mbprotocol: String,

    /// Device address (unit id)
    #[arg(short, long, global = true, default_value_t = 1)]
    slave: u8,

    /// Connect and response timeout in seconds
    #[arg(long, global = true, default_value_t = 5)]
    timeout_secs: u64,

    /// Log frames at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read coils (0x01)
    ReadCoils {
        addr: u16,
        #[arg(default_value_t = 1)]
        count: u16,
    },
    /// Read discrete inputs (0x02)
    ReadDiscrete {
        addr: u16,
        #[arg(default_value_t = 1)]
        count: u16,
    },
    /// Read holding registers (0x03)
    ReadHolding {
        addr: u16,
        #[arg(default_value_t = 1)]
        count: u16,
    },
    /// Read input registers (0x04)
    ReadInput {
        addr: u16,
        #[arg(default_value_t = 1)]
        count: u16,
    },
    /// Force a single coil (0x05)
    WriteCoil {
        addr: u16,
        #[arg(action = ArgAction::Set, value_parser = parse_bool)]
        value: bool,
    },
    /// Preset a single holding register (0x06)
    WriteRegister {
        addr: u16,
        #[arg(value_parser = parse_u16)]
        value: u16,
    },
    /// Force consecutive coils (0x0F)
    WriteCoils {
        addr: u16,
        #[arg(required = true, num_args = 1.., value_parser = parse_bool)]
        values: Vec<bool>,
    },
    /// Preset consecutive holding registers (0x10)
    WriteRegisters {
        addr: u16,
        #[arg(required = true, num_args = 1.., value_parser = parse_u16)]
        values: Vec<u16>,
    },
}

/// Accepts `1/0`, `true/false`, `on/off`
fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        _ => Err(format!("'{}' is not a coil value (1/0, true/false, on/off)", s)),
    }
}

/// Decimal or `0x`-prefixed hex
fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("'{}' is not a register value: {}", s, e))
}

fn print_bits(addr: u16, values: &[bool]) {
    for (offset, value) in values.iter().enumerate() {
        let shown = if *value { "ON".bright_green() } else { "OFF".dimmed() };
        println!("{:>5}  {}", addr as usize + offset, shown);
    }
}

fn print_words(addr: u16, values: &[u16]) {
    for (offset, value) in values.iter().enumerate() {
        println!(
            "{:>5}  {:>5}  {}",
            addr as usize + offset,
            value,
            format!("0x{:04X}", value).bright_cyan()
        );
    }
}

fn print_written(what: &str, addr: u16, count: usize) {
    println!(
        "{} {} {} at {}",
        "OK".bright_green().bold(),
        count,
        what,
        addr
    );
}

async fn run(cli: Cli) -> Result<()> {
    let variant = ProtocolVariant::from_name(&cli.mbprotocol);
    let timeout = Duration::from_secs(cli.timeout_secs);
    let target = format!("{}:{}", cli.host, cli.port);
    debug!("Connecting to {} ({}, slave {})", target, cli.mbprotocol, cli.slave);

    let mut client = ModbusClient::connect(target.as_str(), variant, cli.slave, timeout)
        .await
        .with_context(|| format!("Failed to connect to {}", target))?;

    match cli.command {
        Commands::ReadCoils { addr, count } => {
            print_bits(addr, &client.read_coils(addr, count).await?);
        },
        Commands::ReadDiscrete { addr, count } => {
            print_bits(addr, &client.read_discrete_inputs(addr, count).await?);
        },
        Commands::ReadHolding { addr, count } => {
            print_words(addr, &client.read_holding_registers(addr, count).await?);
        },
        Commands::ReadInput { addr, count } => {
            print_words(addr, &client.read_input_registers(addr, count).await?);
        },
        Commands::WriteCoil { addr, value } => {
            client.write_single_coil(addr, value).await?;
            print_written("coil", addr, 1);
        },
        Commands::WriteRegister { addr, value } => {
            client.write_single_register(addr, value).await?;
            print_written("register", addr, 1);
        },
        Commands::WriteCoils { addr, values } => {
            client.write_multiple_coils(addr, &values).await?;
            print_written("coils", addr, values.len());
        },
        Commands::WriteRegisters { addr, values } => {
            client.write_multiple_registers(addr, &values).await?;
            print_written("registers", addr, values.len());
        },
    }

    client.close().await?;
    Ok(())
}

fn describe(error: &anyhow::Error) -> String {
    match error.downcast_ref::<ModbusError>() {
        Some(ModbusError::Exception { code, .. }) => match ExceptionCode::from_u8(*code) {
            Some(exception) => format!("{:#} ({})", error, exception.description()),
            None => format!("{:#}", error),
        },
        _ => format!("{:#}", error),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let log_level = if cli.verbose { "debug" } else { "warn" };
    if let Err(e) = common::init_logging(log_level, !cli.no_color) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".bright_red().bold(), describe(&e));
        std::process::exit(1);
    }
}

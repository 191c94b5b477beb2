//! mbserver - Modbus RTU-over-TCP / Modbus-TCP slave with a REST gateway

use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use tracing::info;

use common::{init_logging, shutdown_token};
use mbserver::{service, Config, ConfigOverrides, SERVICE_NAME, SERVICE_VERSION};

#[derive(Debug, Parser)]
#[command(name = "mbserver", author, version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Modbus listen host
    #[arg(long)]
    host: Option<String>,

    /// Modbus listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Wire protocol: ModbusTCP or ModbusRTUviaTCP
    #[arg(long)]
    mbprotocol: Option<String>,

    /// REST gateway host
    #[arg(long)]
    rest_host: Option<String>,

    /// REST gateway port
    #[arg(long)]
    rest_port: Option<u16>,

    /// Do not start the REST gateway
    #[arg(long)]
    no_rest: bool,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Disable colored output (useful for log files)
    #[arg(long)]
    no_color: bool,

    /// Only validate configuration without starting service
    #[arg(long)]
    validate: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            protocol: self.mbprotocol.clone(),
            rest_host: self.rest_host.clone(),
            rest_port: self.rest_port,
            rest_enabled: self.no_rest.then_some(false),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, !args.no_color)
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let config = Config::load(args.config.as_deref(), &args.overrides())?;
    config.validate()?;

    if args.validate {
        print!("{}", config.to_yaml()?);
        info!("Configuration is valid");
        return Ok(());
    }

    info!(
        "Starting {} v{} ({} on {}:{})",
        SERVICE_NAME,
        SERVICE_VERSION,
        config.modbus.protocol,
        config.modbus.host,
        config.modbus.port
    );

    service::run(config, shutdown_token()).await?;

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}

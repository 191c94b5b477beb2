//! mbserver configuration
//!
//! Layers, lowest to highest priority:
//! 1. built-in defaults
//! 2. YAML file (`--config`)
//! 3. environment: `MBSERVER_` prefix, `__` between section and key
//!    (`MBSERVER_MODBUS__PORT=1502`)
//! 4. command-line overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use modbus_core::constants::{
    DEFAULT_PORT, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT, MAX_CONTAINER_SIZE,
};
use modbus_core::{DataSizes, ModbusData, ProtocolVariant, ServerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_PREFIX: &str = "MBSERVER_";
pub const DEFAULT_REST_PORT: u16 = 8000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to render configuration: {0}")]
    Render(#[from] serde_yaml::Error),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Modbus listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusSection {
    pub host: String,
    pub port: u16,
    /// `ModbusTCP` or `ModbusRTUviaTCP`
    pub protocol: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for ModbusSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            protocol: ProtocolVariant::RTU_OVER_TCP_NAME.to_string(),
            read_timeout_secs: DEFAULT_READ_TIMEOUT.as_secs(),
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT.as_secs(),
        }
    }
}

/// Container sizes and initial holding register values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
    /// Written to holding registers starting at address 0
    pub preset_holding: Vec<u16>,
}

impl Default for DataSection {
    fn default() -> Self {
        let sizes = DataSizes::default();
        Self {
            coils: sizes.coils,
            discrete_inputs: sizes.discrete_inputs,
            holding_registers: sizes.holding_registers,
            input_registers: sizes.input_registers,
            preset_holding: vec![1, 2, 3, 4, 5],
        }
    }
}

/// REST gateway settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSection {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for RestSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: DEFAULT_REST_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub modbus: ModbusSection,
    pub data: DataSection,
    pub rest: RestSection,
}

/// Values given on the command line; `None` keeps the lower layers
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub rest_host: Option<String>,
    pub rest_port: Option<u16>,
    pub rest_enabled: Option<bool>,
}

impl ConfigOverrides {
    fn merge_into(&self, mut figment: Figment) -> Figment {
        if let Some(host) = &self.host {
            figment = figment.merge(("modbus.host", host));
        }
        if let Some(port) = self.port {
            figment = figment.merge(("modbus.port", port));
        }
        if let Some(protocol) = &self.protocol {
            figment = figment.merge(("modbus.protocol", protocol));
        }
        if let Some(host) = &self.rest_host {
            figment = figment.merge(("rest.host", host));
        }
        if let Some(port) = self.rest_port {
            figment = figment.merge(("rest.port", port));
        }
        if let Some(enabled) = self.rest_enabled {
            figment = figment.merge(("rest.enabled", enabled));
        }
        figment
    }
}

impl Config {
    /// Assemble every layer without extracting
    pub fn figment(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(path) = path {
            // Yaml::file silently skips missing files; an explicit path must exist
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Ok(overrides.merge_into(figment))
    }

    /// Load the layered configuration (not yet validated)
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path, overrides)?
            .extract()
            .map_err(Box::new)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.protocol().is_known() {
            return Err(ConfigError::invalid(
                "modbus.protocol",
                format!(
                    "unknown protocol '{}' (expected {} or {})",
                    self.modbus.protocol,
                    ProtocolVariant::MODBUS_TCP_NAME,
                    ProtocolVariant::RTU_OVER_TCP_NAME
                ),
            ));
        }

        if self.modbus.read_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "modbus.read_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.modbus.write_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "modbus.write_timeout_secs",
                "must be greater than 0",
            ));
        }

        let capacities = [
            ("data.coils", self.data.coils),
            ("data.discrete_inputs", self.data.discrete_inputs),
            ("data.holding_registers", self.data.holding_registers),
            ("data.input_registers", self.data.input_registers),
        ];
        for (field, size) in capacities {
            if size > MAX_CONTAINER_SIZE {
                return Err(ConfigError::invalid(
                    field,
                    format!("{} exceeds the addressable maximum {}", size, MAX_CONTAINER_SIZE),
                ));
            }
        }

        if self.data.preset_holding.len() > self.data.holding_registers {
            return Err(ConfigError::invalid(
                "data.preset_holding",
                format!(
                    "{} values do not fit in {} holding registers",
                    self.data.preset_holding.len(),
                    self.data.holding_registers
                ),
            ));
        }

        if self.rest.enabled
            && self.rest.port == self.modbus.port
            && self.rest.host == self.modbus.host
        {
            return Err(ConfigError::invalid(
                "rest.port",
                format!("{} is already used by the Modbus listener", self.rest.port),
            ));
        }

        Ok(())
    }

    pub fn protocol(&self) -> ProtocolVariant {
        ProtocolVariant::from_name(&self.modbus.protocol)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.modbus.host.clone(),
            port: self.modbus.port,
            protocol: self.protocol(),
            read_timeout: Duration::from_secs(self.modbus.read_timeout_secs),
            write_timeout: Duration::from_secs(self.modbus.write_timeout_secs),
        }
    }

    pub fn data_sizes(&self) -> DataSizes {
        DataSizes {
            coils: self.data.coils,
            discrete_inputs: self.data.discrete_inputs,
            holding_registers: self.data.holding_registers,
            input_registers: self.data.input_registers,
        }
    }

    /// Allocate the store and apply the holding register preset
    pub fn build_data(&self) -> Result<ModbusData, ConfigError> {
        let data = ModbusData::new(self.data_sizes());
        data.preset_multiple_registers(0, &self.data.preset_holding)
            .map_err(|e| ConfigError::invalid("data.preset_holding", e.to_string()))?;
        Ok(data)
    }

    /// Effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

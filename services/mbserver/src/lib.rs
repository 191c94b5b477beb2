//! mbserver - Modbus slave with a REST gateway
//!
//! Serves one shared [`modbus_core::ModbusData`] store over Modbus
//! (RTU-over-TCP or Modbus-TCP) and over HTTP/JSON.

pub mod api;
pub mod config;
pub mod error;
pub mod service;

pub use config::{Config, ConfigError, ConfigOverrides};
pub use error::{ApiError, ApiResult, ErrorInfo};

pub const SERVICE_NAME: &str = "mbserver";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

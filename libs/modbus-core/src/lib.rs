//! Modbus RTU-over-TCP and Modbus-TCP stack
//!
//! - [`crc`]: Modbus CRC16
//! - [`protocol`]: wire variants and their framing parameters
//! - [`function`]: the eight supported function codes
//! - [`packet`]: frame encode/decode ([`ModbusPacket`])
//! - [`data`]: shared coil/register store ([`ModbusData`])
//! - [`handlers`]: function-code dispatch against the store
//! - [`transport`]: splitting a TCP stream into frames
//! - [`server`]: concurrent slave ([`ModbusServer`])
//! - [`client`]: master ([`ModbusClient`])

pub mod client;
pub mod codec;
pub mod constants;
pub mod crc;
pub mod data;
pub mod error;
pub mod function;
pub mod handlers;
pub mod packet;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::ModbusClient;
pub use crc::{crc16, crc16_check};
pub use data::{DataSizes, ModbusData};
pub use error::{ContainerKind, ExceptionCode, ModbusError, ModbusResult, RangeError};
pub use function::FunctionCode;
pub use handlers::{dispatch, DispatchError};
pub use packet::{Direction, ModbusPacket};
pub use protocol::ProtocolVariant;
pub use server::{ModbusServer, ServerConfig, ServerStats, ServerStatsSnapshot};

//! Error types for the Modbus stack

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result alias used across the crate
pub type ModbusResult<T> = std::result::Result<T, ModbusError>;

/// Which data container an access targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coils => "coils",
            Self::DiscreteInputs => "discrete inputs",
            Self::HoldingRegisters => "holding registers",
            Self::InputRegisters => "input registers",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access outside a container's capacity
///
/// `end` is exclusive (`start + count`) and may exceed `u16::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Requested {kind} {start}...{end} outside the valid range 0...{capacity}")]
pub struct RangeError {
    pub kind: ContainerKind,
    pub start: usize,
    pub end: usize,
    pub capacity: usize,
}

/// Exception codes carried by an error response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Can't handle request
    IllegalFunction = 0x01,
    /// Requested outside valid range
    IllegalDataAddress = 0x02,
    /// Bad value in request
    IllegalDataValue = 0x03,
}

impl ExceptionCode {
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Map a raw byte, `None` for codes this stack never produces
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Can't handle request",
            Self::IllegalDataAddress => "Requested outside valid range",
            Self::IllegalDataValue => "Bad value in request",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.code())
    }
}

/// Main error type of the Modbus stack
#[derive(Debug, Error)]
pub enum ModbusError {
    // ======================================
    // Frame Errors
    // ======================================
    #[error("Truncated frame: need {needed} bytes, have {actual}")]
    TruncatedFrame { needed: usize, actual: usize },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    // ======================================
    // Request Errors (answered with an exception)
    // ======================================
    #[error("Unknown function code 0x{0:02X}")]
    UnknownFunction(u8),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("Bad value in request: {0}")]
    BadValue(String),

    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    // ======================================
    // Client Errors
    // ======================================
    #[error("Modbus exception for FC=0x{function:02X}: code 0x{code:02X}")]
    Exception { function: u8, code: u8 },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    // ======================================
    // Connection Errors
    // ======================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Server has been stopped")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModbusError {
    pub fn truncated(needed: usize, actual: usize) -> Self {
        Self::TruncatedFrame { needed, actual }
    }

    pub fn bad_value(msg: impl Into<String>) -> Self {
        Self::BadValue(msg.into())
    }

    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Exception code a slave answers this error with, if any
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Self::UnknownFunction(_) => Some(ExceptionCode::IllegalFunction),
            Self::Range(_) => Some(ExceptionCode::IllegalDataAddress),
            Self::BadValue(_) => Some(ExceptionCode::IllegalDataValue),
            _ => None,
        }
    }

    /// Whether the connection that produced this error must be dropped
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. } | Self::ConnectionClosed | Self::Io(_)
        )
    }
}

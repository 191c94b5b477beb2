//! Wire variants carried over TCP
//!
//! Two framings share the same PDU layout and differ only in what wraps it:
//!
//! ```text
//! ModbusTCP        [tid:2][proto:2][len:2][unit:1][fc:1][data...]
//! ModbusRTUviaTCP  [unit:1][fc:1][data...][crc:2 LE]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{CRC_LEN, MAX_RTU_FRAME_SIZE, MAX_TCP_FRAME_SIZE, MBAP_HEADER_LEN};
use crate::error::{ModbusError, ModbusResult};

/// Framing variant of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProtocolVariant {
    /// Native Modbus-TCP with MBAP header
    ModbusTcp,
    /// RTU framing (address + PDU + CRC16) sent over a TCP stream
    RtuOverTcp,
    /// Name that matched no known variant
    Unknown,
}

impl ProtocolVariant {
    pub const MODBUS_TCP_NAME: &'static str = "ModbusTCP";
    pub const RTU_OVER_TCP_NAME: &'static str = "ModbusRTUviaTCP";

    /// Parse a canonical variant name; anything unrecognized maps to `Unknown`
    pub fn from_name(name: &str) -> Self {
        match name {
            Self::MODBUS_TCP_NAME => Self::ModbusTcp,
            Self::RTU_OVER_TCP_NAME => Self::RtuOverTcp,
            _ => Self::Unknown,
        }
    }

    /// Canonical name of the variant
    pub fn name(&self) -> &'static str {
        match self {
            Self::ModbusTcp => Self::MODBUS_TCP_NAME,
            Self::RtuOverTcp => Self::RTU_OVER_TCP_NAME,
            Self::Unknown => "Unknown",
        }
    }

    /// Largest frame the variant can carry, 0 for `Unknown`
    #[inline]
    pub const fn max_frame_size(&self) -> usize {
        match self {
            Self::ModbusTcp => MAX_TCP_FRAME_SIZE,
            Self::RtuOverTcp => MAX_RTU_FRAME_SIZE,
            Self::Unknown => 0,
        }
    }

    /// Offset of the device address within a frame
    #[inline]
    pub const fn header_offset(&self) -> usize {
        match self {
            Self::ModbusTcp => MBAP_HEADER_LEN,
            Self::RtuOverTcp | Self::Unknown => 0,
        }
    }

    /// Bytes following the PDU (the CRC for RTU)
    #[inline]
    pub const fn trailer_len(&self) -> usize {
        match self {
            Self::RtuOverTcp => CRC_LEN,
            Self::ModbusTcp | Self::Unknown => 0,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Reject the `Unknown` sentinel where a real framing is required
    pub fn ensure_known(self) -> ModbusResult<Self> {
        if self.is_known() {
            Ok(self)
        } else {
            Err(ModbusError::UnknownProtocol(self.name().to_string()))
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for ProtocolVariant {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ProtocolVariant> for String {
    fn from(variant: ProtocolVariant) -> Self {
        variant.name().to_string()
    }
}

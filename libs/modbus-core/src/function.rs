//! Supported Modbus function codes

use std::fmt;

use crate::constants::{MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use crate::error::ModbusError;

/// The eight basic coil/register operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoilStatus = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    ForceSingleCoil = 0x05,
    PresetSingleRegister = 0x06,
    ForceMultipleCoils = 0x0F,
    PresetMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub const ALL: [FunctionCode; 8] = [
        Self::ReadCoilStatus,
        Self::ReadDiscreteInputs,
        Self::ReadHoldingRegisters,
        Self::ReadInputRegisters,
        Self::ForceSingleCoil,
        Self::PresetSingleRegister,
        Self::ForceMultipleCoils,
        Self::PresetMultipleRegisters,
    ];

    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ReadCoilStatus => "ReadCoilStatus",
            Self::ReadDiscreteInputs => "ReadDiscreteInputs",
            Self::ReadHoldingRegisters => "ReadHoldingRegisters",
            Self::ReadInputRegisters => "ReadInputRegisters",
            Self::ForceSingleCoil => "ForceSingleCoil",
            Self::PresetSingleRegister => "PresetSingleRegister",
            Self::ForceMultipleCoils => "ForceMultipleCoils",
            Self::PresetMultipleRegisters => "PresetMultipleRegisters",
        }
    }

    /// FC01-FC04: response carries a byte count and data
    #[inline]
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            Self::ReadCoilStatus
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    /// FC15/FC16: request carries a byte count and data
    #[inline]
    pub const fn is_multi_write(self) -> bool {
        matches!(self, Self::ForceMultipleCoils | Self::PresetMultipleRegisters)
    }

    /// Operates on bit containers (coils, discrete inputs)
    #[inline]
    pub const fn is_bit_access(self) -> bool {
        matches!(
            self,
            Self::ReadCoilStatus
                | Self::ReadDiscreteInputs
                | Self::ForceSingleCoil
                | Self::ForceMultipleCoils
        )
    }

    /// Largest quantity a single request may address (1 for single writes)
    pub const fn max_quantity(self) -> u16 {
        match self {
            Self::ReadCoilStatus | Self::ReadDiscreteInputs => MAX_READ_COILS,
            Self::ReadHoldingRegisters | Self::ReadInputRegisters => MAX_READ_REGISTERS,
            Self::ForceMultipleCoils => MAX_WRITE_COILS,
            Self::PresetMultipleRegisters => MAX_WRITE_REGISTERS,
            Self::ForceSingleCoil | Self::PresetSingleRegister => 1,
        }
    }

    /// Number of data bytes needed for `quantity` items
    pub const fn data_len(self, quantity: u16) -> usize {
        if self.is_bit_access() {
            (quantity as usize).div_ceil(8)
        } else {
            quantity as usize * 2
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = ModbusError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::ReadCoilStatus),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            0x05 => Ok(Self::ForceSingleCoil),
            0x06 => Ok(Self::PresetSingleRegister),
            0x0F => Ok(Self::ForceMultipleCoils),
            0x10 => Ok(Self::PresetMultipleRegisters),
            other => Err(ModbusError::UnknownFunction(other)),
        }
    }
}

impl From<FunctionCode> for u8 {
    fn from(fc: FunctionCode) -> Self {
        fc.code()
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.code())
    }
}

//! Modbus protocol constants
//!
//! Frame sizes follow the RS485 ADU limit of 256 bytes, which leaves a
//! 253 byte PDU once the slave address and CRC are removed. Modbus-TCP
//! replaces the address+CRC pair with the 6 byte MBAP header plus unit id.

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length: Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// CRC16 trailer length of RTU framing
pub const CRC_LEN: usize = 2;

/// Maximum PDU (function code + data) size
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum Modbus-TCP frame: MBAP header + unit id + PDU
pub const MAX_TCP_FRAME_SIZE: usize = MBAP_HEADER_LEN + 1 + MAX_PDU_SIZE;

/// Maximum RTU frame: slave address + PDU + CRC
pub const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + CRC_LEN;

/// Backing buffer size of every packet (largest variant)
pub const MAX_FRAME_SIZE: usize = MAX_TCP_FRAME_SIZE;

/// Protocol identifier carried in the MBAP header (always 0 for Modbus)
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Bit OR-ed into the function code of an error response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Quantity Limits
// ============================================================================

/// FC01/FC02 read quantity upper bound
pub const MAX_READ_COILS: u16 = 2000;

/// FC03/FC04 read quantity upper bound: (253 - 2) / 2
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC15 write quantity upper bound
pub const MAX_WRITE_COILS: u16 = 1968;

/// FC16 write quantity upper bound: (253 - 6) / 2
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Values
// ============================================================================

/// FC05 value switching a coil on
pub const COIL_ON: u16 = 0xFF00;

/// FC05 value switching a coil off
pub const COIL_OFF: u16 = 0x0000;

/// Largest container a 16-bit address space can hold
pub const MAX_CONTAINER_SIZE: usize = 65536;

// ============================================================================
// Network Defaults
// ============================================================================

/// Standard Modbus TCP port
pub const DEFAULT_PORT: u16 = 502;

/// Silence after which a partially received frame is discarded
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for writing one response back to the peer
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

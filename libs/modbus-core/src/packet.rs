//! Binary representation of one Modbus frame
//!
//! A packet owns a fixed stack buffer sized for the largest variant and
//! reads every field relative to the variant's header offset:
//!
//! ```text
//! offset+0  device address
//! offset+1  function code (bit 7 set for error responses)
//! offset+2  parameters / byte count / exception code
//! ```
//!
//! Accessors never index past the used region; short frames yield
//! `ModbusError::TruncatedFrame` instead.

use std::fmt;

use tracing::debug;

use crate::constants::{EXCEPTION_FLAG, MAX_FRAME_SIZE, MODBUS_PROTOCOL_ID};
use crate::crc::crc16;
use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::function::FunctionCode;
use crate::protocol::ProtocolVariant;

/// Which side of an exchange a frame belongs to
///
/// Request and response layouts differ for the same function code, so every
/// direction-dependent accessor takes this explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

/// One Modbus frame in either wire variant
#[derive(Clone)]
pub struct ModbusPacket {
    buf: [u8; MAX_FRAME_SIZE],
    len: usize,
    variant: ProtocolVariant,
}

impl ModbusPacket {
    fn empty(variant: ProtocolVariant) -> Self {
        Self {
            buf: [0; MAX_FRAME_SIZE],
            len: 0,
            variant,
        }
    }

    /// Copy a received frame into a packet
    pub fn from_bytes(variant: ProtocolVariant, bytes: &[u8]) -> ModbusResult<Self> {
        let variant = variant.ensure_known()?;
        let max = variant.max_frame_size();
        if bytes.len() > max {
            return Err(ModbusError::FrameTooLarge {
                size: bytes.len(),
                max,
            });
        }

        let mut packet = Self::empty(variant);
        packet.buf[..bytes.len()].copy_from_slice(bytes);
        packet.len = bytes.len();
        Ok(packet)
    }

    // ========================================================================
    // Builders
    // ========================================================================

    /// Build a request frame
    ///
    /// `data` is only meaningful for FC15/FC16, where it is prefixed with its
    /// byte count. `transaction_id` is ignored for RTU framing.
    pub fn build_request(
        variant: ProtocolVariant,
        transaction_id: u16,
        device_id: u8,
        function: FunctionCode,
        param1: u16,
        param2: u16,
        data: Option<&[u8]>,
    ) -> ModbusResult<Self> {
        let mut writer = PacketWriter::new(variant)?;
        writer.push(device_id)?;
        writer.push(function.code())?;
        writer.push_u16(param1)?;
        writer.push_u16(param2)?;

        match data {
            Some(data) if function.is_multi_write() => {
                writer.push(byte_count(data)?)?;
                writer.extend(data)?;
            },
            None if function.is_multi_write() => writer.push(0)?,
            Some(data) if !data.is_empty() => {
                return Err(ModbusError::invalid_frame(format!(
                    "{} request carries no data block",
                    function
                )));
            },
            _ => {},
        }

        let packet = writer.finish(transaction_id);
        debug!(
            "Request built: FC={:02X} ({}), dev={}, p1={}, p2={}, len={}",
            function.code(),
            function.name(),
            device_id,
            param1,
            param2,
            packet.len
        );
        Ok(packet)
    }

    /// Build the normal response to `request`
    ///
    /// Read codes answer with `data` prefixed by its length; write codes echo
    /// the request's address and value/quantity.
    pub fn build_response(request: &ModbusPacket, data: Option<&[u8]>) -> ModbusResult<Self> {
        let function = request.function_code()?;
        let mut writer = PacketWriter::new(request.variant)?;
        writer.push(request.device_address()?)?;
        writer.push(function.code())?;

        if function.is_read() {
            let data = data.unwrap_or(&[]);
            writer.push(byte_count(data)?)?;
            writer.extend(data)?;
        } else {
            let (param1, param2) = request.function_parameters(Direction::Request)?;
            writer.push_u16(param1)?;
            writer.push_u16(param2)?;
        }

        Ok(writer.finish(request.transaction_id()))
    }

    /// Build an error response: function code with bit 7 set plus one
    /// exception byte
    pub fn build_error_response(request: &ModbusPacket, code: ExceptionCode) -> ModbusResult<Self> {
        let mut writer = PacketWriter::new(request.variant)?;
        writer.push(request.device_address()?)?;
        writer.push(request.raw_function_code()? | EXCEPTION_FLAG)?;
        writer.push(code.code())?;
        Ok(writer.finish(request.transaction_id()))
    }

    // ========================================================================
    // Raw access
    // ========================================================================

    #[inline]
    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Used bytes of the frame, trailer included
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// End of the addressable fields (start of the CRC for RTU)
    #[inline]
    fn fields_end(&self) -> usize {
        self.len.saturating_sub(self.variant.trailer_len())
    }

    fn byte_at(&self, index: usize) -> ModbusResult<u8> {
        if index < self.fields_end() {
            Ok(self.buf[index])
        } else {
            Err(self.truncated_at(index + 1))
        }
    }

    fn u16_at(&self, index: usize) -> ModbusResult<u16> {
        if index + 2 <= self.fields_end() {
            Ok(u16::from_be_bytes([self.buf[index], self.buf[index + 1]]))
        } else {
            Err(self.truncated_at(index + 2))
        }
    }

    fn slice_at(&self, start: usize, count: usize) -> ModbusResult<&[u8]> {
        let end = start + count;
        if end <= self.fields_end() {
            Ok(&self.buf[start..end])
        } else {
            Err(self.truncated_at(end))
        }
    }

    fn truncated_at(&self, fields_needed: usize) -> ModbusError {
        ModbusError::truncated(fields_needed + self.variant.trailer_len(), self.len)
    }

    // ========================================================================
    // Field accessors
    // ========================================================================

    /// Device (slave/unit) address
    pub fn device_address(&self) -> ModbusResult<u8> {
        self.byte_at(self.variant.header_offset())
    }

    /// Function code byte as received, error flag included
    pub fn raw_function_code(&self) -> ModbusResult<u8> {
        self.byte_at(self.variant.header_offset() + 1)
    }

    /// Decoded function code; error responses and unsupported codes fail
    /// with `UnknownFunction`
    pub fn function_code(&self) -> ModbusResult<FunctionCode> {
        FunctionCode::try_from(self.raw_function_code()?)
    }

    pub fn is_exception(&self) -> bool {
        self.raw_function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Exception code of an error response
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.byte_at(self.variant.header_offset() + 2).ok()
        } else {
            None
        }
    }

    /// Address and count/value fields
    ///
    /// Present in every request and in write responses (echoed). Read
    /// responses carry a byte count there instead and are rejected.
    pub fn function_parameters(&self, direction: Direction) -> ModbusResult<(u16, u16)> {
        let function = self.function_code()?;
        if direction == Direction::Response && function.is_read() {
            return Err(ModbusError::invalid_frame(format!(
                "{} response has no address/count fields",
                function
            )));
        }

        let offset = self.variant.header_offset();
        Ok((self.u16_at(offset + 2)?, self.u16_at(offset + 4)?))
    }

    /// Data block of the frame
    ///
    /// - request FC15/FC16: the bytes after the byte count
    /// - request FC01-FC06: empty
    /// - response FC01-FC04: the bytes after the byte count
    /// - response FC05/06/15/16: the 4 echoed bytes
    pub fn payload(&self, direction: Direction) -> ModbusResult<&[u8]> {
        let function = self.function_code()?;
        let offset = self.variant.header_offset();

        match direction {
            Direction::Request if function.is_multi_write() => {
                let count = self.byte_at(offset + 6)? as usize;
                self.slice_at(offset + 7, count)
            },
            Direction::Request => Ok(&[]),
            Direction::Response if function.is_read() => {
                let count = self.byte_at(offset + 2)? as usize;
                self.slice_at(offset + 3, count)
            },
            Direction::Response => self.slice_at(offset + 2, 4),
        }
    }

    /// MBAP transaction id; 0 for RTU framing
    pub fn transaction_id(&self) -> u16 {
        match self.variant {
            ProtocolVariant::ModbusTcp if self.len >= 2 => {
                u16::from_be_bytes([self.buf[0], self.buf[1]])
            },
            _ => 0,
        }
    }

    /// CRC trailer as received (RTU only)
    pub fn crc(&self) -> Option<u16> {
        if self.variant == ProtocolVariant::RtuOverTcp && self.len >= 2 {
            Some(u16::from_le_bytes([
                self.buf[self.len - 2],
                self.buf[self.len - 1],
            ]))
        } else {
            None
        }
    }

    /// Recompute and compare the CRC; always true for Modbus-TCP
    pub fn verify_crc(&self) -> bool {
        match self.variant {
            ProtocolVariant::RtuOverTcp => match self.crc() {
                Some(received) => crc16(&self.buf[..self.len - 2]) == received,
                None => false,
            },
            _ => true,
        }
    }

    /// Structural check of a received frame: minimum size, MBAP header
    /// consistency (TCP) and checksum (RTU)
    pub fn validate(&self) -> ModbusResult<()> {
        let min = self.variant.header_offset() + 2 + self.variant.trailer_len();
        if self.len < min {
            return Err(ModbusError::truncated(min, self.len));
        }

        match self.variant {
            ProtocolVariant::ModbusTcp => {
                let protocol_id = u16::from_be_bytes([self.buf[2], self.buf[3]]);
                if protocol_id != MODBUS_PROTOCOL_ID {
                    return Err(ModbusError::invalid_frame(format!(
                        "protocol id {} (expected {})",
                        protocol_id, MODBUS_PROTOCOL_ID
                    )));
                }
                let length = u16::from_be_bytes([self.buf[4], self.buf[5]]) as usize;
                let actual = self.len - self.variant.header_offset();
                if length != actual {
                    return Err(ModbusError::invalid_frame(format!(
                        "MBAP length {} does not match {} received bytes",
                        length, actual
                    )));
                }
            },
            ProtocolVariant::RtuOverTcp => {
                let expected = crc16(&self.buf[..self.len - 2]);
                let actual = self.crc().unwrap_or_default();
                if expected != actual {
                    return Err(ModbusError::CrcMismatch { expected, actual });
                }
            },
            ProtocolVariant::Unknown => {
                return Err(ModbusError::UnknownProtocol(self.variant.to_string()));
            },
        }

        Ok(())
    }
}

impl PartialEq for ModbusPacket {
    fn eq(&self, other: &Self) -> bool {
        self.variant == other.variant && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ModbusPacket {}

impl fmt::Debug for ModbusPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusPacket")
            .field("variant", &self.variant)
            .field("len", &self.len)
            .field("data", &hex::encode_upper(self.as_bytes()))
            .finish()
    }
}

fn byte_count(data: &[u8]) -> ModbusResult<u8> {
    u8::try_from(data.len()).map_err(|_| ModbusError::FrameTooLarge {
        size: data.len(),
        max: u8::MAX as usize,
    })
}

/// Sequential writer over a packet buffer
///
/// Reserves the MBAP header for TCP and stops short of the CRC trailer for
/// RTU; `finish` fills in whichever the variant needs.
struct PacketWriter {
    packet: ModbusPacket,
    limit: usize,
}

impl PacketWriter {
    fn new(variant: ProtocolVariant) -> ModbusResult<Self> {
        let variant = variant.ensure_known()?;
        let mut packet = ModbusPacket::empty(variant);
        packet.len = variant.header_offset();
        Ok(Self {
            packet,
            limit: variant.max_frame_size() - variant.trailer_len(),
        })
    }

    fn push(&mut self, byte: u8) -> ModbusResult<()> {
        self.extend(&[byte])
    }

    fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.extend(&value.to_be_bytes())
    }

    fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        let start = self.packet.len;
        let end = start + data.len();
        if end > self.limit {
            return Err(ModbusError::FrameTooLarge {
                size: end + self.packet.variant.trailer_len(),
                max: self.packet.variant.max_frame_size(),
            });
        }
        self.packet.buf[start..end].copy_from_slice(data);
        self.packet.len = end;
        Ok(())
    }

    fn finish(mut self, transaction_id: u16) -> ModbusPacket {
        let packet = &mut self.packet;
        match packet.variant {
            ProtocolVariant::ModbusTcp => {
                let length = (packet.len - packet.variant.header_offset()) as u16;
                packet.buf[0..2].copy_from_slice(&transaction_id.to_be_bytes());
                packet.buf[2..4].copy_from_slice(&MODBUS_PROTOCOL_ID.to_be_bytes());
                packet.buf[4..6].copy_from_slice(&length.to_be_bytes());
            },
            ProtocolVariant::RtuOverTcp => {
                let crc = crc16(&packet.buf[..packet.len]);
                packet.buf[packet.len..packet.len + 2].copy_from_slice(&crc.to_le_bytes());
                packet.len += 2;
            },
            ProtocolVariant::Unknown => {},
        }
        self.packet
    }
}

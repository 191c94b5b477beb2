//! Stream framing: split a TCP byte stream into whole Modbus frames
//!
//! Modbus-TCP frames are self-describing through the MBAP length field.
//! RTU frames carried over TCP have no length prefix, so their size is
//! derived from the function code, the direction and (for variable-length
//! frames) the byte-count field.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::constants::{CRC_LEN, EXCEPTION_FLAG, MBAP_HEADER_LEN};
use crate::crc::crc16_check;
use crate::error::{ModbusError, ModbusResult};
use crate::function::FunctionCode;
use crate::packet::{Direction, ModbusPacket};
use crate::protocol::ProtocolVariant;

/// Length of the next complete frame in `buf`
///
/// `Ok(None)` means more bytes are needed. An RTU frame with an unknown
/// function code has no derivable length; it ends at the shortest prefix
/// whose trailing CRC matches.
pub fn frame_length(
    variant: ProtocolVariant,
    direction: Direction,
    buf: &[u8],
) -> ModbusResult<Option<usize>> {
    let max = variant.max_frame_size();

    let needed = match variant {
        ProtocolVariant::ModbusTcp => {
            if buf.len() < MBAP_HEADER_LEN {
                return Ok(None);
            }
            MBAP_HEADER_LEN + u16::from_be_bytes([buf[4], buf[5]]) as usize
        },
        ProtocolVariant::RtuOverTcp => {
            if buf.len() < 2 {
                return Ok(None);
            }
            match rtu_frame_length(direction, buf) {
                Some(RtuLength::Known(len)) => len,
                Some(RtuLength::Unbounded) => return Ok(crc_delimited_length(buf, max)),
                None => return Ok(None),
            }
        },
        ProtocolVariant::Unknown => {
            return Err(ModbusError::UnknownProtocol(variant.to_string()));
        },
    };

    if needed > max {
        return Err(ModbusError::FrameTooLarge { size: needed, max });
    }
    Ok((buf.len() >= needed).then_some(needed))
}

enum RtuLength {
    Known(usize),
    Unbounded,
}

/// Shortest prefix of `addr + fc + crc` or more that carries a valid CRC
///
/// A buffer that reached `max` without a match is taken whole so it can be
/// rejected.
fn crc_delimited_length(buf: &[u8], max: usize) -> Option<usize> {
    let limit = buf.len().min(max);
    (2 + CRC_LEN..=limit)
        .find(|&len| {
            let (body, trailer) = buf[..len].split_at(len - CRC_LEN);
            crc16_check(body, u16::from_le_bytes([trailer[0], trailer[1]]))
        })
        .or_else(|| (buf.len() >= max).then_some(max))
}

/// `None` while the byte-count field itself has not arrived yet
fn rtu_frame_length(direction: Direction, buf: &[u8]) -> Option<RtuLength> {
    let fc = buf[1];
    if fc & EXCEPTION_FLAG != 0 {
        // addr + fc + exception code
        return Some(RtuLength::Known(3 + CRC_LEN));
    }

    let Ok(function) = FunctionCode::try_from(fc) else {
        return Some(RtuLength::Unbounded);
    };

    let len = match direction {
        Direction::Request if function.is_multi_write() => 7 + *buf.get(6)? as usize + CRC_LEN,
        Direction::Response if function.is_read() => 3 + *buf.get(2)? as usize + CRC_LEN,
        // addr + fc + two u16 fields
        Direction::Request | Direction::Response => 6 + CRC_LEN,
    };
    Some(RtuLength::Known(len))
}

/// Split the next frame off `buf` and validate it
///
/// Bytes of a frame that fails validation are consumed; the error tells the
/// caller why it was dropped.
pub fn next_frame(
    variant: ProtocolVariant,
    direction: Direction,
    buf: &mut BytesMut,
) -> ModbusResult<Option<ModbusPacket>> {
    let Some(len) = frame_length(variant, direction, buf)? else {
        return Ok(None);
    };

    let frame = buf.split_to(len);
    trace!("Frame split: {} bytes, {} left buffered", len, buf.len());
    let packet = ModbusPacket::from_bytes(variant, &frame)?;
    packet.validate()?;
    Ok(Some(packet))
}

/// Read until one whole frame is available
///
/// Cancel safe: partial data stays in `buf` if the future is dropped.
pub async fn read_frame<R>(
    reader: &mut R,
    variant: ProtocolVariant,
    direction: Direction,
    buf: &mut BytesMut,
) -> ModbusResult<ModbusPacket>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(packet) = next_frame(variant, direction, buf)? {
            return Ok(packet);
        }
        if reader.read_buf(buf).await? == 0 {
            return Err(ModbusError::ConnectionClosed);
        }
    }
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, packet: &ModbusPacket) -> ModbusResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(packet.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

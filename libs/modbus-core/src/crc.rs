//! Modbus CRC16 (polynomial 0xA001, reflected, initial value 0xFFFF)

/// Calculate the Modbus CRC16 checksum of `data`
///
/// The result is transmitted low byte first (`crc.to_le_bytes()`).
/// An empty slice yields the initial register value `0xFFFF`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Check `data` against an expected CRC16 value
#[inline]
pub fn crc16_check(data: &[u8], expected: u16) -> bool {
    crc16(data) == expected
}

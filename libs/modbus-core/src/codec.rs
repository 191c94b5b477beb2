//! Bit and word conversions between container values and wire bytes
//!
//! Coils are packed LSB first: item `i` lands in bit `i % 8` of byte `i / 8`.
//! Registers are big-endian words.

/// Pack booleans into bytes, `ceil(n / 8)` bytes long
pub fn bool_array_to_byte_array(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack the first `count` bits of `bytes`
///
/// Stops early if `bytes` holds fewer than `count` bits.
pub fn byte_array_to_bool_array(bytes: &[u8], count: usize) -> Vec<bool> {
    let count = count.min(bytes.len() * 8);
    (0..count)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

/// Serialize registers as big-endian bytes
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes
}

/// Parse big-endian bytes into registers; a trailing odd byte is ignored
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

//! Small helpers shared across the crate.

use std::fmt::Write;

// UTILITY FUNCTIONS
// ================================================================================================

/// Renders a byte slice as a lowercase hex string.
pub fn bytes_to_hex_string(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);

    for byte in data {
        write!(s, "{byte:02x}").expect("formatting hex failed");
    }

    s
}

/// Number of bits needed to represent `v`; zero for `v == 0`.
pub const fn bit_length(v: u128) -> u32 {
    u128::BITS - v.leading_zeros()
}

/// Serializes the low `width` bits of `v` as big-endian bytes.
///
/// The canonical element encoding used for the "processed" digest and by the
/// internal generators: `ceil(width / 8)` bytes, value right-aligned.
pub fn element_to_be_bytes(v: u128, width: u32) -> Vec<u8> {
    let nbytes = width.div_ceil(8) as usize;
    v.to_be_bytes()[16 - nbytes..].to_vec()
}

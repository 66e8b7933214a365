//! Byte and numeric helpers shared by the partitioner, the CPU search and
//! solution diagnostics.

use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::error::EncodingError;

const HASH_HEX_LEN: usize = 64;

/// sha256(sha256(data))
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

pub fn reverse(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().rev().copied().collect()
}

/// Reverses every 4-byte group. A trailing partial group is reversed on its own.
pub fn swap32(bytes: &[u8]) -> Vec<u8> {
    bytes
        .chunks(4)
        .flat_map(|group| group.iter().rev().copied())
        .collect()
}

/// Decodes a little-endian compact target: three mantissa bytes followed by
/// the exponent byte.
pub fn bits_to_target(bits: &[u8; 4]) -> BigUint {
    let mantissa = u32::from_le_bytes([bits[0], bits[1], bits[2], 0]);
    let exponent = bits[3] as usize;
    let mantissa = BigUint::from(mantissa);
    if exponent >= 3 {
        mantissa << (8 * (exponent - 3))
    } else {
        mantissa >> (8 * (3 - exponent))
    }
}

/// Reads a 64 character hex digest as four little-endian 64-bit words, the
/// first word being the least significant.
pub fn le_hash_to_int(hash_hex: &str) -> Result<BigUint, EncodingError> {
    if hash_hex.len() != HASH_HEX_LEN {
        return Err(EncodingError::InvalidLength {
            expected: HASH_HEX_LEN,
            actual: hash_hex.len(),
        });
    }
    let bytes = hex::decode(hash_hex)?;

    let mut value = BigUint::default();
    for (i, chunk) in bytes.chunks_exact(8).enumerate() {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        value |= BigUint::from(u64::from_le_bytes(word)) << (64 * i);
    }
    Ok(value)
}

/// Big-endian 32 byte form of a target. Values wider than 256 bits saturate.
pub fn target_to_bytes(target: &BigUint) -> [u8; 32] {
    let be = target.to_bytes_be();
    if be.len() > 32 {
        return [0xff; 32];
    }
    let mut out = [0u8; 32];
    out[32 - be.len()..].copy_from_slice(&be);
    out
}

/// Full-precision check of a finished 80 byte header against a target.
pub fn hash_meets_target(header: &[u8], target: &BigUint) -> bool {
    le_hash_to_int(&hex::encode(double_sha256(header)))
        .map(|hash| hash <= *target)
        .unwrap_or(false)
}

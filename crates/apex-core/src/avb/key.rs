use rsa::{BigUint, RsaPublicKey};

use crate::error::{ApexError, Result};

const HEADER_SIZE: usize = 8;
const MAX_KEY_BITS: usize = 8192;

/// Decode an AVB public key blob.
///
/// Layout: `key_num_bits: u32`, `n0inv: u32`, modulus, then `rr`, all
/// big-endian. The precomputed `n0inv` and `rr` are only used by bootloader
/// implementations and are ignored. The exponent is always 65537.
///
/// # Errors
///
/// Returns [`ApexError::SignatureVerificationFailed`] if the blob is
/// truncated, declares an unsupported size, or is not a valid RSA key.
pub fn decode_public_key(data: &[u8]) -> Result<RsaPublicKey> {
    let header: [u8; HEADER_SIZE] = data
        .get(..HEADER_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| invalid_key(format!("key blob of {} bytes is truncated", data.len())))?;

    let key_bits = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if key_bits == 0 || key_bits % 8 != 0 || key_bits > MAX_KEY_BITS {
        return Err(invalid_key(format!("unsupported key size {key_bits}")));
    }

    let key_bytes = key_bits / 8;
    let expected_len = HEADER_SIZE + 2 * key_bytes;
    if data.len() != expected_len {
        return Err(invalid_key(format!(
            "{key_bits}-bit key blob should be {expected_len} bytes, got {}",
            data.len()
        )));
    }

    let modulus = BigUint::from_bytes_be(&data[HEADER_SIZE..HEADER_SIZE + key_bytes]);
    RsaPublicKey::new_with_max_size(modulus, BigUint::from(65537u32), MAX_KEY_BITS)
        .map_err(|e| invalid_key(e.to_string()))
}

fn invalid_key(reason: String) -> ApexError {
    ApexError::SignatureVerificationFailed(format!("invalid public key: {reason}"))
}

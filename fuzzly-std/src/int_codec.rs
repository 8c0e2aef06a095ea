//! Big-endian, minimum-width integer encoding.
//!
//! Used by the token wire format: an integer is encoded as the shortest
//! big-endian byte string that round-trips it, with zero encoding as an
//! empty slice (rather than a single `0x00` byte).

/// Encode `value` as big-endian bytes, dropping leading zero bytes. Zero
/// encodes as an empty `Vec`.
pub fn encode_be_min(value: u64) -> Vec<u8> {
    let full = value.to_be_bytes();
    let first_nonzero =
        full.iter().position(|&b| b != 0).unwrap_or(full.len());
    full[first_nonzero..].to_vec()
}

/// Decode a minimum-width big-endian byte string into a `u64`. Returns
/// `None` if `bytes` is longer than 8 bytes (would overflow `u64`).
pub fn decode_be_min(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    let start = 8 - bytes.len();
    buf[start..].copy_from_slice(bytes);
    Some(u64::from_be_bytes(buf))
}

/// Decode a minimum-width big-endian byte string into an `i64`, interpreting
/// the bytes as an unsigned magnitude (the wire format never encodes negative
/// integers directly).
pub fn decode_be_min_i64(bytes: &[u8]) -> Option<i64> {
    decode_be_min(bytes).and_then(|v| i64::try_from(v).ok())
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn zero_is_empty() {
        assert_eq!(encode_be_min(0), Vec::<u8>::new());
        assert_eq!(decode_be_min(&[]), Some(0));
    }

    #[test]
    fn known_values() {
        assert_eq!(encode_be_min(1), vec![1]);
        assert_eq!(encode_be_min(256), vec![1, 0]);
        assert_eq!(encode_be_min(255), vec![255]);
    }

    proptest! {
        #[test]
        fn roundtrip(value: u64) {
            let encoded = encode_be_min(value);
            prop_assert_eq!(decode_be_min(&encoded), Some(value));
        }
    }
}

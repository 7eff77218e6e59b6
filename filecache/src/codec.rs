use crate::error::CacheError;
use crate::value::Value;
use bincode::Options;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Native portable encoding (JSON). Always safe to deserialize: the target
/// type is a closed enum, so there is no arbitrary class instantiation to
/// guard against.
pub const SERIALIZER_NATIVE: &str = "native";

/// Optional compact binary encoding (bincode). Faster and smaller, but a
/// deployment that cannot audit every writer process should leave this
/// disabled (`allow_classes = false`) and rely on the native encoding.
pub const SERIALIZER_COMPACT_BINARY: &str = "compact-binary";

/// Hard upper bound for any bincode-encoded cache payload we will attempt to
/// deserialize from disk.
///
/// Cache corruption should degrade to a cache miss, not an out-of-memory
/// abort: an unbounded `bincode::deserialize` will happily try to allocate
/// whatever a corrupted length prefix asks for.
const BINCODE_PAYLOAD_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn bincode_options_limited() -> impl bincode::Options + Copy {
    bincode_options().with_limit(BINCODE_PAYLOAD_LIMIT_BYTES)
}

/// Serializes `value`, choosing the compact binary encoding when
/// `allow_classes` opts into trusting the writer population, and the native
/// encoding otherwise. Returns the encoded bytes and the tag to persist in
/// meta's `s` field.
pub fn serialize_value(value: &Value, allow_classes: bool) -> Result<(Vec<u8>, &'static str), CacheError> {
    if allow_classes {
        Ok((bincode_options().serialize(value)?, SERIALIZER_COMPACT_BINARY))
    } else {
        Ok((serde_json::to_vec(value)?, SERIALIZER_NATIVE))
    }
}

/// Deserializes `bytes` according to the tag recorded in meta. An unknown
/// tag is treated the same as any other corruption by the caller: purge and
/// miss, not a hard error. The compact binary path is bounded by
/// [`BINCODE_PAYLOAD_LIMIT_BYTES`] so a corrupted length prefix returns an
/// `Err` instead of aborting the process.
pub fn deserialize_value(bytes: &[u8], tag: &str) -> io::Result<Value> {
    match tag {
        SERIALIZER_NATIVE => serde_json::from_slice(bytes)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
        SERIALIZER_COMPACT_BINARY => bincode_options_limited()
            .deserialize(bytes)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown serializer tag '{other}'"),
        )),
    }
}

/// Attempts deflate compression when `bytes.len() >= threshold`, adopting it
/// only if the result is strictly smaller. Returns `(payload, compressed)`.
pub fn compress_if_worthwhile(bytes: &[u8], threshold: usize) -> (Vec<u8>, bool) {
    if bytes.len() < threshold {
        return (bytes.to_vec(), false);
    }

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(bytes).is_err() {
        return (bytes.to_vec(), false);
    }
    match encoder.finish() {
        Ok(compressed) if compressed.len() < bytes.len() => (compressed, true),
        _ => (bytes.to_vec(), false),
    }
}

pub fn decompress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_round_trip() {
        let value = Value::Str("hello".to_string());
        let (bytes, tag) = serialize_value(&value, false).unwrap();
        assert_eq!(tag, SERIALIZER_NATIVE);
        assert_eq!(deserialize_value(&bytes, tag).unwrap(), value);
    }

    #[test]
    fn compact_binary_round_trip() {
        let value = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        let (bytes, tag) = serialize_value(&value, true).unwrap();
        assert_eq!(tag, SERIALIZER_COMPACT_BINARY);
        assert_eq!(deserialize_value(&bytes, tag).unwrap(), value);
    }

    #[test]
    fn low_entropy_payload_compresses_smaller() {
        let bytes = vec![b'a'; 1024 * 1024];
        let (compressed, did_compress) = compress_if_worthwhile(&bytes, 8192);
        assert!(did_compress);
        assert!(compressed.len() < bytes.len());
        assert_eq!(decompress(&compressed).unwrap(), bytes);
    }

    #[test]
    fn random_payload_is_not_adopted_when_not_smaller() {
        // Deterministic pseudo-random bytes: not a great compressor target.
        let mut state: u64 = 0x243F6A8885A308D3;
        let bytes: Vec<u8> = (0..1024 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 0xff) as u8
            })
            .collect();
        let (payload, did_compress) = compress_if_worthwhile(&bytes, 8192);
        assert!(!did_compress);
        assert_eq!(payload, bytes);
    }

    #[test]
    fn below_threshold_is_not_attempted() {
        let bytes = vec![b'a'; 16];
        let (payload, did_compress) = compress_if_worthwhile(&bytes, 8192);
        assert!(!did_compress);
        assert_eq!(payload, bytes);
    }
}

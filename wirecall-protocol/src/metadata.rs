//! Metadata map codec.
//!
//! Payload layout (all integers u32 network byte order):
//!
//! ```text
//! +-------+--------------------------------------------+
//! | count | { keyLen | key | valLen | val } * count    |
//! +-------+--------------------------------------------+
//! ```
//!
//! Keys need not be unique on the wire; the decoder resolves duplicates
//! last-write-wins. The decoder must consume the buffer exactly: trailing
//! bytes are a decode error.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use std::collections::BTreeMap;

/// Auxiliary per-call key/value strings. Ordered so encoding is
/// deterministic.
pub type Metadata = BTreeMap<String, String>;

/// Returns the exact encoded size of a map: `4 + sum(8 + |k| + |v|)`.
pub fn encoded_len(metadata: &Metadata) -> usize {
    4 + metadata
        .iter()
        .map(|(k, v)| 8 + k.len() + v.len())
        .sum::<usize>()
}

/// Serializes a metadata map.
pub fn encode(metadata: &Metadata) -> BytesMut {
    let mut buf = BytesMut::with_capacity(encoded_len(metadata));
    buf.put_u32(metadata.len() as u32);
    for (key, value) in metadata {
        buf.put_u32(key.len() as u32);
        buf.put_slice(key.as_bytes());
        buf.put_u32(value.len() as u32);
        buf.put_slice(value.as_bytes());
    }
    buf
}

/// Parses a metadata map, requiring the buffer to be consumed exactly.
pub fn decode(buf: &[u8]) -> Result<Metadata, ProtocolError> {
    let mut offset = 0usize;
    let count = read_u32(buf, &mut offset)?;

    let mut metadata = Metadata::new();
    for _ in 0..count {
        let key = read_string(buf, &mut offset)?;
        let value = read_string(buf, &mut offset)?;
        metadata.insert(key, value);
    }

    if offset != buf.len() {
        return Err(ProtocolError::Decode(format!(
            "metadata buffer contains {} trailing bytes",
            buf.len() - offset
        )));
    }

    Ok(metadata)
}

fn read_u32(buf: &[u8], offset: &mut usize) -> Result<u32, ProtocolError> {
    let end = offset
        .checked_add(4)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| {
            ProtocolError::Decode("unexpected end of metadata buffer".to_string())
        })?;
    let value = u32::from_be_bytes(buf[*offset..end].try_into().expect("4-byte slice"));
    *offset = end;
    Ok(value)
}

fn read_string(buf: &[u8], offset: &mut usize) -> Result<String, ProtocolError> {
    let len = read_u32(buf, offset)? as usize;
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| {
            ProtocolError::Decode("unexpected end of metadata buffer".to_string())
        })?;
    let value = std::str::from_utf8(&buf[*offset..end])
        .map_err(|_| ProtocolError::Decode("invalid UTF-8 in metadata".to_string()))?
        .to_string();
    *offset = end;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        let mut md = Metadata::new();
        md.insert("sessionId".to_string(), "S-1234".to_string());
        md.insert("reportId".to_string(), "R-5678".to_string());
        md
    }

    #[test]
    fn test_roundtrip() {
        let md = sample();
        let encoded = encode(&md);
        assert_eq!(encoded.len(), encoded_len(&md));
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, md);
    }

    #[test]
    fn test_empty_map() {
        let md = Metadata::new();
        let encoded = encode(&md);
        assert_eq!(&encoded[..], &[0, 0, 0, 0]);
        assert_eq!(decode(&encoded).unwrap(), md);
    }

    #[test]
    fn test_empty_key_and_value() {
        let mut md = Metadata::new();
        md.insert(String::new(), String::new());
        let decoded = decode(&encode(&md)).unwrap();
        assert_eq!(decoded, md);
    }

    #[test]
    fn test_length_formula() {
        let md = sample();
        let expected: usize = 4 + md.iter().map(|(k, v)| 8 + k.len() + v.len()).sum::<usize>();
        assert_eq!(encode(&md).len(), expected);
    }

    #[test]
    fn test_duplicate_keys_last_write_wins() {
        // Hand-build a payload with the same key twice.
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        for value in ["first", "second"] {
            buf.put_u32(1);
            buf.put_slice(b"k");
            buf.put_u32(value.len() as u32);
            buf.put_slice(value.as_bytes());
        }
        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["k"], "second");
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoded = encode(&sample());
        encoded.put_u8(0xFF);
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let encoded = encode(&sample());
        for cut in [1, 3, 7, encoded.len() - 1] {
            let err = decode(&encoded[..cut]).unwrap_err();
            assert!(matches!(err, ProtocolError::Decode(_)), "cut at {cut}");
        }
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u32(2);
        buf.put_slice(&[0xC3, 0x28]); // invalid UTF-8 sequence
        buf.put_u32(0);
        let err = decode(&buf).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_count_larger_than_buffer_rejected() {
        // Claims 1000 entries but carries none.
        let mut buf = BytesMut::new();
        buf.put_u32(1000);
        assert!(decode(&buf).is_err());
    }
}

//! CBOR document codec.
//!
//! All RPC payloads are self-describing CBOR. Size is checked on both sides:
//! before decoding (so a peer cannot make us parse an oversized document) and
//! after encoding (so we never emit one a peer would reject).

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// Maximum encoded document size (1 MiB).
///
/// A notification batch for a full round is a few hundred kilobytes at most;
/// registration requests are tiny.
pub const MAX_DOCUMENT_SIZE: usize = 1 << 20;

/// Encode a value as a CBOR document.
///
/// # Errors
///
/// - `CborEncode` if serialization fails
/// - `DocumentTooLarge` if the result exceeds [`MAX_DOCUMENT_SIZE`]
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;

    if buf.len() > MAX_DOCUMENT_SIZE {
        return Err(ProtocolError::DocumentTooLarge { size: buf.len(), max: MAX_DOCUMENT_SIZE });
    }

    Ok(Bytes::from(buf))
}

/// Decode a CBOR document.
///
/// # Errors
///
/// - `DocumentTooLarge` if `bytes` exceeds [`MAX_DOCUMENT_SIZE`]
/// - `CborDecode` if the bytes are not a valid document of type `T`
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > MAX_DOCUMENT_SIZE {
        return Err(ProtocolError::DocumentTooLarge { size: bytes.len(), max: MAX_DOCUMENT_SIZE });
    }

    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::{NotificationBatch, NotificationData, Request, Response};

    #[test]
    fn request_survives_codec() {
        let request = Request::NotificationBatch(NotificationBatch {
            round_id: 42,
            notifications: vec![NotificationData {
                ephemeral_id: -7,
                identity_fingerprint: vec![1; 25],
                message_hash: vec![2; 32],
            }],
        });

        let bytes = encode(&request).unwrap();
        let decoded: Request = decode(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn decode_rejects_oversized_input() {
        let bytes = vec![0u8; MAX_DOCUMENT_SIZE + 1];
        let result: Result<Response> = decode(&bytes);
        assert!(matches!(result, Err(ProtocolError::DocumentTooLarge { .. })));
    }

    #[test]
    fn decode_rejects_garbage() {
        let result: Result<Request> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }

    #[test]
    fn encode_rejects_oversized_batch() {
        let request = Request::NotificationBatch(NotificationBatch {
            round_id: 1,
            notifications: (0..20_000)
                .map(|i| NotificationData {
                    ephemeral_id: i,
                    identity_fingerprint: vec![0xab; 25],
                    message_hash: vec![0xcd; 32],
                })
                .collect(),
        });

        assert!(matches!(encode(&request), Err(ProtocolError::DocumentTooLarge { .. })));
    }
}

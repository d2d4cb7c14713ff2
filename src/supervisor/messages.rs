//! Queue payload types and their length-delimited binary framing.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Enqueued by `MarkEOF`, consumed by the reconciliation supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationMessage {
    pub file_id: String,
    pub prev_id: Option<String>,
    pub user_id: String,
    pub device_id: Option<String>,
}

/// Emitted once per reconciled file version, fanned out to the owning
/// user's connected devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub file_id: String,
    pub user_id: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("frame encoding failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("frame decoding failed: {0}")]
    Decode(#[source] bincode::Error),
}

/// Serialize a message into a frame: u32 little-endian body length followed
/// by the bincode body.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serialize(value).map_err(CodecError::Encode)?;

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame produced by [`encode_frame`]. Trailing bytes beyond the
/// declared length are rejected as truncation noise.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::Truncated {
            expected: 4,
            actual: bytes.len(),
        });
    }

    let declared = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let body = &bytes[4..];
    if body.len() != declared {
        return Err(CodecError::Truncated {
            expected: declared,
            actual: body.len(),
        });
    }

    bincode::deserialize(body).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation_message_survives_framing() {
        let msg = ReconciliationMessage {
            file_id: "f2".to_string(),
            prev_id: Some("f1".to_string()),
            user_id: "user-1".to_string(),
            device_id: None,
        };

        let frame = encode_frame(&msg).unwrap();
        let decoded: ReconciliationMessage = decode_frame(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn garbage_frames_are_rejected() {
        assert!(decode_frame::<NotificationMessage>(b"xx").is_err());

        let mut frame = encode_frame(&NotificationMessage {
            file_id: "f1".to_string(),
            user_id: "user-1".to_string(),
            device_id: None,
        })
        .unwrap();
        frame.truncate(frame.len() - 1);
        assert!(decode_frame::<NotificationMessage>(&frame).is_err());
    }
}

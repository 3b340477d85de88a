use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::MAX_MESSAGE_SIZE;

/// Codec for the realtime connection: one JSON document per line.
pub struct LineCodec;

impl LineCodec {
    /// Encode a frame as a single line, including the trailing newline.
    pub fn encode<T: Serialize>(frame: &T) -> ProtocolResult<String> {
        let mut line = serde_json::to_string(frame)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        line.push('\n');
        Ok(line)
    }

    /// Decode one line. Surrounding whitespace, including the newline, is
    /// ignored.
    pub fn decode<T: DeserializeOwned>(line: &str) -> ProtocolResult<T> {
        let line = line.trim();
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        serde_json::from_str(line).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StoreRequest;
    use crate::realtime::{RealtimeRequest, ServerFrame};
    use trellis_types::Query;

    #[test]
    fn encode_is_one_line() {
        let frame = RealtimeRequest {
            callback: 0,
            request: StoreRequest::read(&Query::All),
        };
        let line = LineCodec::encode(&frame).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let back: RealtimeRequest = LineCodec::decode(&line).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn decode_garbage() {
        let err = LineCodec::decode::<ServerFrame>("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn decode_oversized() {
        let big = "x".repeat(MAX_MESSAGE_SIZE + 1);
        let err = LineCodec::decode::<ServerFrame>(&big).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }
}

//! Message encoding
//!
//! The engine only needs `encode`/`decode`; [`PostcardCodec`] is the
//! default and bounds every message by the configured maximum size.

use crate::config::MAX_UDP_PAYLOAD;
use crate::error::{Result, SwimError};
use crate::message::Message;

/// Encodes and decodes protocol messages
pub trait Codec: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Message>;
}

/// Compact binary encoding with `postcard`
#[derive(Debug, Clone)]
pub struct PostcardCodec {
    max_message_size: usize,
}

impl PostcardCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for PostcardCodec {
    fn default() -> Self {
        Self::new(MAX_UDP_PAYLOAD)
    }
}

impl Codec for PostcardCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let bytes = postcard::to_allocvec(message)?;
        if bytes.len() > self.max_message_size {
            return Err(SwimError::MessageTooLarge {
                size: bytes.len(),
                max: self.max_message_size,
            });
        }
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        if bytes.len() > self.max_message_size {
            return Err(SwimError::MessageTooLarge {
                size: bytes.len(),
                max: self.max_message_size,
            });
        }
        postcard::from_bytes(bytes).map_err(|e| SwimError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::PeerId;
    use crate::message::{MessageKind, Sender};
    use crate::update::Update;

    fn ping(updates: Vec<Update>) -> Message {
        Message {
            kind: MessageKind::Ping { seq: 42 },
            sender: Sender {
                host: None,
                port: 11000,
            },
            destination: PeerId::new("127.0.0.1", 11001),
            incarnation: 3,
            updates,
        }
    }

    #[test]
    fn test_roundtrip() {
        let codec = PostcardCodec::default();
        let message = ping(vec![
            Update::alive(PeerId::new("127.0.0.1", 1), PeerId::new("127.0.0.1", 2), 0),
            Update::faulty(PeerId::new("::1", 3), PeerId::new("::1", 3), 7),
        ]);

        let bytes = codec.encode(&message).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_garbage_rejected() {
        let codec = PostcardCodec::default();
        let result = codec.decode(&[0xff, 0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(SwimError::Deserialization(_))));

        assert!(codec.decode(&[]).is_err());
    }

    #[test]
    fn test_size_limit() {
        let codec = PostcardCodec::new(64);
        let updates = (0..20)
            .map(|i| Update::alive(PeerId::new("10.0.0.1", i), PeerId::new("10.0.0.2", 1), 0))
            .collect();

        let result = codec.encode(&ping(updates));
        assert!(matches!(
            result,
            Err(SwimError::MessageTooLarge { max: 64, .. })
        ));

        assert!(matches!(
            codec.decode(&[0u8; 100]),
            Err(SwimError::MessageTooLarge { size: 100, .. })
        ));
    }
}

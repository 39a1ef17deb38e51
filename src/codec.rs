//! # Client wire codec.
//!
//! Client-facing payloads travel over a namespaced plugin channel. The engine only
//! depends on the [`Codec`] contract; [`JsonCodec`] is the stock implementation.
//!
//! ```text
//! ClientPayload ──encode──► Vec<u8> ──(host sends on channel)──► client
//! ```

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CodecError;

/// Encode/decode contract over a byte buffer, bound to one channel.
pub trait Codec<T>: Send + Sync + 'static {
    /// Namespaced channel id, e.g. `dungeons:main`.
    fn channel(&self) -> &str;

    /// Appends the encoded `value` to `buf`.
    fn encode(&self, buf: &mut Vec<u8>, value: &T) -> Result<(), CodecError>;

    fn decode(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec over `serde_json`.
pub struct JsonCodec<T> {
    channel: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            _payload: PhantomData,
        }
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn channel(&self) -> &str {
        &self.channel
    }

    fn encode(&self, buf: &mut Vec<u8>, value: &T) -> Result<(), CodecError> {
        serde_json::to_writer(buf, value).map_err(|e| CodecError::Encode {
            channel: self.channel.clone(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode {
            channel: self.channel.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        keys: u32,
    }

    #[test]
    fn test_encode_appends_to_buffer() {
        let codec = JsonCodec::<Ping>::new("dungeons:main");
        let mut buf = b"x".to_vec();
        codec.encode(&mut buf, &Ping { keys: 2 }).unwrap();
        assert_eq!(&buf[..1], b"x");
        assert_eq!(codec.decode(&buf[1..]).unwrap(), Ping { keys: 2 });
    }

    #[test]
    fn test_decode_error_names_channel() {
        let codec = JsonCodec::<Ping>::new("dungeons:main");
        let err = codec.decode(b"{not json").unwrap_err();
        assert_eq!(err.as_label(), "codec_decode");
        assert!(err.to_string().contains("dungeons:main"));
    }
}

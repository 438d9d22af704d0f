//! Serialization boundary.
//!
//! The coordinator stores values through a [`Codec`]. The default
//! [`JsonCodec`] writes plain strings as their raw bytes (so values stay
//! readable by other clients and usable by INCRBY and friends) and
//! everything else as JSON.

use crate::core::error::{TrellisError, TrellisResult};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts values to and from their stored form.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> TrellisResult<Bytes>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> TrellisResult<T>;
}

/// JSON with raw strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> TrellisResult<Bytes> {
        let json = serde_json::to_value(value).map_err(|e| TrellisError::codec(e.to_string()))?;
        match json {
            serde_json::Value::String(s) => Ok(Bytes::from(s)),
            other => serde_json::to_vec(&other)
                .map(Bytes::from)
                .map_err(|e| TrellisError::codec(e.to_string())),
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> TrellisResult<T> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Ok(value),
            Err(json_error) => {
                // Raw strings were stored unquoted.
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| TrellisError::codec(json_error.to_string()))?;
                serde_json::from_value(serde_json::Value::String(text.to_string()))
                    .map_err(|_| TrellisError::codec(json_error.to_string()))
            }
        }
    }
}

// Resource access subsystem: URIs, ranges, compression, caching, streams, subscriptions

pub mod cache;
pub mod compression;
pub mod manager;
pub mod provider;
pub mod range;
pub mod stream;
pub mod subscription;
pub mod uri;

pub use cache::{CacheStats, CachedResource, ResourceCache};
pub use compression::{CompressionAlgorithm, CompressionError, CompressionInfo};
pub use manager::{AccessRequest, AccessResponse, ResourceContent, ResourceManager, StreamInfo};
pub use provider::{FilesystemProvider, MemoryProvider, ResourceData, ResourceDescriptor, ResourceProvider};
pub use range::{ByteRange, ContentRange, RangeError};
pub use stream::{StreamBuffers, StreamChunk, StreamRegistry, StreamSession};
pub use subscription::{ResourceUpdate, SubscriptionRegistry, UpdateCallback};
pub use uri::ResourceUri;

use crate::jsonrpc::error::{
    JsonRpcError, DATA_INTEGRITY_ERROR, INTERNAL_ERROR, INVALID_PARAMS, RESOURCE_NOT_FOUND,
    STREAM_STATE_ERROR,
};

/// Failures of the resource subsystem
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceError {
    /// The URI is not of the form `resource://<provider>/<path>`
    #[error("invalid resource URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidRange(#[from] RangeError),

    /// Use of an unknown, cleared or out-of-order stream
    #[error("stream error: {0}")]
    StreamState(String),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("provider error: {0}")]
    Provider(String),
}

impl ResourceError {
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidUri { .. } | Self::InvalidRange(_) => INVALID_PARAMS,
            Self::NotFound(_) => RESOURCE_NOT_FOUND,
            Self::StreamState(_) => STREAM_STATE_ERROR,
            Self::Compression(CompressionError::Unsupported(_)) => INVALID_PARAMS,
            Self::Compression(_) => DATA_INTEGRITY_ERROR,
            Self::Provider(_) => INTERNAL_ERROR,
        }
    }

    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError::custom(self.code(), self.to_string())
    }

    /// Recover a resource error from its wire form
    pub fn from_jsonrpc_error(error: &JsonRpcError) -> Option<Self> {
        match error.code {
            RESOURCE_NOT_FOUND => Some(Self::NotFound(error.message.clone())),
            STREAM_STATE_ERROR => Some(Self::StreamState(error.message.clone())),
            _ => None,
        }
    }
}

impl From<ResourceError> for JsonRpcError {
    fn from(error: ResourceError) -> Self {
        error.to_jsonrpc_error()
    }
}

/// Serde adapter carrying binary content as standard base64 text
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ResourceError::NotFound("x".into()).code(), RESOURCE_NOT_FOUND);
        assert_eq!(ResourceError::StreamState("x".into()).code(), STREAM_STATE_ERROR);
        assert_eq!(
            ResourceError::from(RangeError::Malformed("x".into())).code(),
            INVALID_PARAMS
        );
        assert_eq!(
            ResourceError::from(CompressionError::SizeMismatch { expected: 2, actual: 1 }).code(),
            DATA_INTEGRITY_ERROR
        );
    }

    #[test]
    fn test_wire_round_trip_for_stream_errors() {
        let wire = ResourceError::StreamState("unknown stream abc".into()).to_jsonrpc_error();
        assert!(matches!(
            ResourceError::from_jsonrpc_error(&wire),
            Some(ResourceError::StreamState(_))
        ));
    }
}

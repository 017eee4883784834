use super::cache::{etag_for, CacheStats, ResourceCache};
use super::compression::{compress, CompressionAlgorithm, CompressionInfo};
use super::provider::{ResourceDescriptor, ResourceProvider};
use super::range::{ByteRange, ContentRange};
use super::stream::{StreamChunk, StreamRegistry};
use super::subscription::ResourceUpdate;
use super::uri::ResourceUri;
use super::ResourceError;
use crate::config::ResourceConfig;
use crate::jsonrpc::error::JsonRpcError;
use crate::types::{StreamId, SubscriptionId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parameters of a resource access
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub bypass_cache: bool,
    /// Compression algorithms the caller can decode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accept_encoding: Vec<CompressionAlgorithm>,
}

impl AccessRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    pub fn streaming(mut self, chunk_size: Option<usize>) -> Self {
        self.stream = true;
        self.chunk_size = chunk_size;
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn accept(mut self, algorithm: CompressionAlgorithm) -> Self {
        if !self.accept_encoding.contains(&algorithm) {
            self.accept_encoding.push(algorithm);
        }
        self
    }
}

/// Payload as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "lowercase")]
pub enum ResourceContent {
    Text {
        text: String,
    },
    Base64 {
        #[serde(with = "super::base64_bytes")]
        data: Bytes,
    },
}

impl ResourceContent {
    /// Text when the mime type says so and the bytes are UTF-8, base64 otherwise
    pub fn encode(content: Bytes, mime_type: Option<&str>) -> Self {
        if mime_type.is_some_and(is_textual) {
            if let Ok(text) = String::from_utf8(content.to_vec()) {
                return Self::Text { text };
            }
        }
        Self::Base64 { data: content }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text { text } => Bytes::from(text),
            Self::Base64 { data } => data,
        }
    }
}

fn is_textual(mime: &str) -> bool {
    mime.starts_with("text/")
        || mime.ends_with("json")
        || mime.ends_with("xml")
        || mime.ends_with("javascript")
        || mime.ends_with("toml")
        || mime.ends_with("yaml")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Size of the whole resource, not of the returned slice
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream_id: StreamId,
    pub total_size: u64,
    pub chunk_size: usize,
}

/// Result envelope of a resource access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessResponse {
    pub success: bool,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ResourceContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionInfo>,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ContentRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl AccessResponse {
    fn empty(uri: &ResourceUri) -> Self {
        Self {
            success: true,
            uri: uri.to_string(),
            content: None,
            metadata: None,
            compression: None,
            cached: false,
            range: None,
            stream: None,
            error: None,
        }
    }

    pub fn failure(uri: impl Into<String>, error: &ResourceError) -> Self {
        Self {
            success: false,
            uri: uri.into(),
            content: None,
            metadata: None,
            compression: None,
            cached: false,
            range: None,
            stream: None,
            error: Some(error.to_jsonrpc_error()),
        }
    }
}

struct FullRead {
    content: Bytes,
    mime_type: Option<String>,
    etag: String,
    cached: bool,
}

/// Server-side resource access: provider lookup, cache, ranges, compression,
/// stream producers and subscriber bookkeeping
pub struct ResourceManager {
    config: ResourceConfig,
    providers: RwLock<HashMap<String, Arc<dyn ResourceProvider>>>,
    cache: ResourceCache,
    streams: StreamRegistry,
    subscribers: RwLock<HashMap<SubscriptionId, ResourceUri>>,
}

impl ResourceManager {
    pub fn new(config: ResourceConfig) -> Self {
        Self {
            cache: ResourceCache::new(config.cache.clone()),
            providers: RwLock::new(HashMap::new()),
            streams: StreamRegistry::with_idle_timeout(config.streaming.idle_timeout()),
            config,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Register a provider under its name; a later registration replaces it
    pub async fn register_provider(&self, provider: Arc<dyn ResourceProvider>) {
        let name = provider.name().to_string();
        tracing::info!(provider = %name, "Registered resource provider");
        self.providers.write().await.insert(name, provider);
    }

    async fn provider(&self, uri: &ResourceUri) -> Result<Arc<dyn ResourceProvider>, ResourceError> {
        self.providers
            .read()
            .await
            .get(uri.provider())
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(format!("no provider for {}", uri)))
    }

    /// Every provider's resources, grouped by provider name
    pub async fn list(&self) -> Result<Vec<ResourceDescriptor>, ResourceError> {
        let mut providers: Vec<_> = self.providers.read().await.values().cloned().collect();
        providers.sort_by(|a, b| a.name().cmp(b.name()));

        let mut resources = Vec::new();
        for provider in providers {
            resources.extend(provider.list().await?);
        }
        Ok(resources)
    }

    /// Access a resource.
    ///
    /// A malformed URI fails immediately; every other failure is reported in
    /// the envelope with `success: false`.
    pub async fn access(&self, request: &AccessRequest) -> Result<AccessResponse, ResourceError> {
        let uri = ResourceUri::parse(&request.uri)?;
        match self.try_access(&uri, request).await {
            Ok(response) => Ok(response),
            Err(error) => {
                tracing::debug!(uri = %uri, error = %error, "Resource access failed");
                Ok(AccessResponse::failure(uri.to_string(), &error))
            }
        }
    }

    async fn try_access(
        &self,
        uri: &ResourceUri,
        request: &AccessRequest,
    ) -> Result<AccessResponse, ResourceError> {
        let provider = self.provider(uri).await?;
        let range = request.range.as_deref().map(ByteRange::parse).transpose()?;

        if request.stream {
            let full = self.read_full(uri, provider.as_ref(), request.bypass_cache).await?;
            let chunk_size = request
                .chunk_size
                .unwrap_or(self.config.streaming.default_chunk_size)
                .max(1);
            let size = full.content.len();
            let (content, served_range) = match range {
                Some(range) => {
                    let span = range.resolve(size)?;
                    let served = ContentRange::new(&span, size);
                    (full.content.slice(span), Some(served))
                }
                None => (full.content, None),
            };
            let total_size = content.len() as u64;
            let stream_id = self.streams.open(uri.to_string(), content, chunk_size).await;

            let mut response = AccessResponse::empty(uri);
            response.range = served_range;
            response.metadata = Some(ResourceMetadata {
                size: size as u64,
                mime_type: full.mime_type,
                etag: Some(full.etag),
            });
            response.cached = full.cached;
            response.stream = Some(StreamInfo {
                stream_id,
                total_size,
                chunk_size,
            });
            return Ok(response);
        }

        let (content, metadata, cached, served_range) = match range {
            Some(range) => {
                let cached = if request.bypass_cache {
                    None
                } else {
                    self.cache.get(&uri.to_string()).await
                };
                match cached {
                    Some(entry) => {
                        let total = entry.content.len();
                        let span = range.resolve(total)?;
                        let metadata = ResourceMetadata {
                            size: total as u64,
                            mime_type: entry.mime_type.clone(),
                            etag: Some(entry.etag.clone()),
                        };
                        let served = ContentRange::new(&span, total);
                        (entry.content.slice(span), metadata, true, Some(served))
                    }
                    None => {
                        let (data, served) = provider.read_range(uri.path(), &range).await?;
                        let metadata = ResourceMetadata {
                            size: served.total,
                            mime_type: data.mime_type,
                            etag: None,
                        };
                        (data.content, metadata, false, Some(served))
                    }
                }
            }
            None => {
                let full = self.read_full(uri, provider.as_ref(), request.bypass_cache).await?;
                let metadata = ResourceMetadata {
                    size: full.content.len() as u64,
                    mime_type: full.mime_type,
                    etag: Some(full.etag),
                };
                (full.content, metadata, full.cached, None)
            }
        };

        let mut response = AccessResponse::empty(uri);
        let (content, compression) = self.maybe_compress(content, &request.accept_encoding)?;
        response.content = Some(if compression.applied {
            ResourceContent::Base64 { data: content }
        } else {
            ResourceContent::encode(content, metadata.mime_type.as_deref())
        });
        response.compression = Some(compression);
        response.metadata = Some(metadata);
        response.cached = cached;
        response.range = served_range;
        Ok(response)
    }

    async fn read_full(
        &self,
        uri: &ResourceUri,
        provider: &dyn ResourceProvider,
        bypass_cache: bool,
    ) -> Result<FullRead, ResourceError> {
        let key = uri.to_string();
        if !bypass_cache {
            if let Some(entry) = self.cache.get(&key).await {
                return Ok(FullRead {
                    content: entry.content,
                    mime_type: entry.mime_type,
                    etag: entry.etag,
                    cached: true,
                });
            }
        }

        let data = provider.read(uri.path()).await?;
        let etag = match self
            .cache
            .insert(&key, data.content.clone(), data.mime_type.clone(), None)
            .await
        {
            Some(entry) => entry.etag,
            None => etag_for(&data.content),
        };

        Ok(FullRead {
            content: data.content,
            mime_type: data.mime_type,
            etag,
            cached: false,
        })
    }

    fn maybe_compress(
        &self,
        content: Bytes,
        accepted: &[CompressionAlgorithm],
    ) -> Result<(Bytes, CompressionInfo), ResourceError> {
        let settings = &self.config.compression;
        let original_size = content.len();

        let algorithm = if accepted.contains(&settings.algorithm) {
            Some(settings.algorithm)
        } else {
            accepted.first().copied()
        };

        match algorithm {
            Some(algorithm) if settings.enabled && original_size > settings.min_size => {
                let compressed = compress(&content, algorithm, settings.level)?;
                let info = CompressionInfo {
                    applied: true,
                    algorithm: Some(algorithm),
                    original_size,
                    compressed_size: compressed.len(),
                };
                Ok((Bytes::from(compressed), info))
            }
            _ => Ok((content, CompressionInfo::uncompressed(original_size))),
        }
    }

    pub async fn next_chunk(&self, stream_id: &StreamId) -> Result<StreamChunk, ResourceError> {
        self.streams.next_chunk(stream_id).await
    }

    pub async fn close_stream(&self, stream_id: &StreamId) -> bool {
        self.streams.close(stream_id).await
    }

    pub async fn active_streams(&self) -> usize {
        self.streams.active().await
    }

    /// Record interest in `uri`; the resource must belong to a known provider
    pub async fn subscribe(&self, uri: &str) -> Result<SubscriptionId, ResourceError> {
        let uri = ResourceUri::parse(uri)?;
        self.provider(&uri).await?;

        let subscription_id = SubscriptionId::generate();
        tracing::debug!(subscription_id = %subscription_id, uri = %uri, "Registered subscriber");
        self.subscribers
            .write()
            .await
            .insert(subscription_id.clone(), uri);
        Ok(subscription_id)
    }

    pub async fn unsubscribe(&self, subscription_id: &SubscriptionId) -> bool {
        self.subscribers
            .write()
            .await
            .remove(subscription_id)
            .is_some()
    }

    /// Note that `uri` changed: drop it from the cache and build one update per subscriber
    pub async fn publish_update(&self, uri: &str, payload: Value) -> Vec<ResourceUpdate> {
        self.cache.invalidate(uri).await;
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|(_, subscribed)| subscribed.to_string() == uri)
            .map(|(subscription_id, _)| ResourceUpdate {
                subscription_id: subscription_id.clone(),
                uri: uri.to_string(),
                payload: payload.clone(),
            })
            .collect()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::error::{INVALID_PARAMS, RESOURCE_NOT_FOUND};
    use crate::resource::compression::decompress;
    use crate::resource::provider::MemoryProvider;
    use serde_json::json;

    async fn manager() -> ResourceManager {
        let manager = ResourceManager::new(ResourceConfig::default());
        let provider = MemoryProvider::new("mem");
        provider.insert("hello.txt", "hello world", None).await;
        provider
            .insert("big.txt", "abcdefghij".repeat(1000), None)
            .await;
        provider
            .insert("raw.bin", vec![0u8, 159, 146, 150], None)
            .await;
        manager.register_provider(Arc::new(provider)).await;
        manager
    }

    #[tokio::test]
    async fn test_malformed_uri_fails_immediately() {
        let manager = manager().await;
        let result = manager.access(&AccessRequest::new("file:///etc/passwd")).await;
        assert!(matches!(result, Err(ResourceError::InvalidUri { .. })));
    }

    #[tokio::test]
    async fn test_missing_resource_is_failed_envelope() {
        let manager = manager().await;
        let response = manager
            .access(&AccessRequest::new("resource://mem/nope"))
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, RESOURCE_NOT_FOUND);

        let response = manager
            .access(&AccessRequest::new("resource://other/x"))
            .await
            .unwrap();
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_second_read_is_cached() {
        let manager = manager().await;
        let request = AccessRequest::new("resource://mem/hello.txt");

        let first = manager.access(&request).await.unwrap();
        assert!(first.success);
        assert!(!first.cached);
        assert_eq!(
            first.content,
            Some(ResourceContent::Text {
                text: "hello world".to_string()
            })
        );

        let second = manager.access(&request).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.metadata, first.metadata);

        let bypass = manager.access(&request.clone().bypass_cache()).await.unwrap();
        assert!(!bypass.cached);
        assert_eq!(manager.cache_stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_range_from_cache_and_provider() {
        let manager = manager().await;
        let request = AccessRequest::new("resource://mem/hello.txt").with_range("-5");

        let uncached = manager.access(&request).await.unwrap();
        assert!(!uncached.cached);
        assert_eq!(uncached.content.unwrap().into_bytes(), Bytes::from_static(b"world"));
        assert_eq!(uncached.range, Some(ContentRange { start: 6, end: 11, total: 11 }));

        manager
            .access(&AccessRequest::new("resource://mem/hello.txt"))
            .await
            .unwrap();
        let cached = manager
            .access(&AccessRequest::new("resource://mem/hello.txt").with_range("0-4"))
            .await
            .unwrap();
        assert!(cached.cached);
        assert_eq!(cached.content.unwrap().into_bytes(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_bad_range_is_invalid_params() {
        let manager = manager().await;
        for range in ["x-y", "11-", "-0"] {
            let response = manager
                .access(&AccessRequest::new("resource://mem/hello.txt").with_range(range))
                .await
                .unwrap();
            assert!(!response.success, "{}", range);
            assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
        }
    }

    #[tokio::test]
    async fn test_compression_respects_threshold_and_accept() {
        let manager = manager().await;

        let small = manager
            .access(&AccessRequest::new("resource://mem/hello.txt").accept(CompressionAlgorithm::Gzip))
            .await
            .unwrap();
        assert!(!small.compression.unwrap().applied);

        let not_accepted = manager
            .access(&AccessRequest::new("resource://mem/big.txt"))
            .await
            .unwrap();
        assert!(!not_accepted.compression.unwrap().applied);

        let big = manager
            .access(&AccessRequest::new("resource://mem/big.txt").accept(CompressionAlgorithm::Zlib))
            .await
            .unwrap();
        let info = big.compression.unwrap();
        assert!(info.applied);
        assert_eq!(info.algorithm, Some(CompressionAlgorithm::Zlib));
        assert_eq!(info.original_size, 10_000);

        let payload = big.content.unwrap().into_bytes();
        assert_eq!(payload.len(), info.compressed_size);
        let restored = decompress(&payload, CompressionAlgorithm::Zlib, info.original_size).unwrap();
        assert_eq!(restored, "abcdefghij".repeat(1000).into_bytes());
    }

    #[tokio::test]
    async fn test_binary_content_is_base64() {
        let manager = manager().await;
        let response = manager
            .access(&AccessRequest::new("resource://mem/raw.bin"))
            .await
            .unwrap();
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["content"]["encoding"], "base64");
        assert_eq!(
            response.content.unwrap().into_bytes(),
            Bytes::from_static(&[0u8, 159, 146, 150])
        );
    }

    #[tokio::test]
    async fn test_stream_access() {
        let manager = manager().await;
        let response = manager
            .access(&AccessRequest::new("resource://mem/big.txt").streaming(Some(4096)))
            .await
            .unwrap();
        assert!(response.content.is_none());
        let stream = response.stream.unwrap();
        assert_eq!(stream.total_size, 10_000);

        let mut received = Vec::new();
        loop {
            let chunk = manager.next_chunk(&stream.stream_id).await.unwrap();
            received.extend_from_slice(&chunk.data);
            if chunk.complete {
                break;
            }
        }
        assert_eq!(received.len(), 10_000);
        assert_eq!(manager.active_streams().await, 0);
    }

    #[tokio::test]
    async fn test_stream_access_serves_only_the_range() {
        let manager = manager().await;
        let response = manager
            .access(
                &AccessRequest::new("resource://mem/big.txt")
                    .with_range("103-302")
                    .streaming(Some(100)),
            )
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(
            response.range,
            Some(ContentRange {
                start: 103,
                end: 303,
                total: 10_000
            })
        );
        assert_eq!(response.metadata.unwrap().size, 10_000);
        let stream = response.stream.unwrap();
        assert_eq!(stream.total_size, 200);

        let first = manager.next_chunk(&stream.stream_id).await.unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(&first.data[..3], b"def");
        assert!(!first.complete);
        let second = manager.next_chunk(&stream.stream_id).await.unwrap();
        assert_eq!(second.offset, 100);
        assert_eq!(second.data.len(), 100);
        assert!(second.complete);

        let unsatisfiable = manager
            .access(
                &AccessRequest::new("resource://mem/big.txt")
                    .with_range("20000-")
                    .streaming(None),
            )
            .await
            .unwrap();
        assert!(!unsatisfiable.success);
        assert_eq!(manager.active_streams().await, 0);
    }

    #[tokio::test]
    async fn test_publish_update_targets_subscribers() {
        let manager = manager().await;
        let id = manager.subscribe("resource://mem/hello.txt").await.unwrap();
        manager.subscribe("resource://mem/big.txt").await.unwrap();
        assert!(manager.subscribe("resource://ghost/x").await.is_err());

        manager
            .access(&AccessRequest::new("resource://mem/hello.txt"))
            .await
            .unwrap();
        let updates = manager
            .publish_update("resource://mem/hello.txt", json!({"version": 2}))
            .await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].subscription_id, id);
        assert_eq!(manager.cache_stats().await.entries, 0);

        assert!(manager.unsubscribe(&id).await);
        assert!(manager
            .publish_update("resource://mem/hello.txt", json!({}))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_spans_providers() {
        let manager = manager().await;
        let other = MemoryProvider::new("aaa");
        other.insert("first", "1", None).await;
        manager.register_provider(Arc::new(other)).await;

        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 4);
        assert_eq!(listed[0].uri, "resource://aaa/first");
    }
}

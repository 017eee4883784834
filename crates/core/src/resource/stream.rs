use super::ResourceError;
use crate::types::StreamId;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// One delivery of a resource stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub stream_id: StreamId,
    pub offset: u64,
    #[serde(with = "super::base64_bytes")]
    pub data: Bytes,
    pub total_size: u64,
    /// Set on the final chunk
    pub complete: bool,
}

struct Producer {
    uri: String,
    content: Bytes,
    position: usize,
    chunk_size: usize,
    last_used: Instant,
}

/// Server-side producers for streams handed out by resource access.
///
/// A producer is released when its last chunk has been delivered, when the
/// stream is closed, or when nobody has pulled from it for the idle timeout.
/// In every case the id is unknown afterwards.
pub struct StreamRegistry {
    producers: Mutex<HashMap<StreamId, Producer>>,
    idle_timeout: Duration,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            producers: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    fn release_idle(&self, producers: &mut HashMap<StreamId, Producer>) {
        let now = Instant::now();
        producers.retain(|stream_id, producer| {
            let idle = now.duration_since(producer.last_used) >= self.idle_timeout;
            if idle {
                tracing::debug!(stream_id = %stream_id, uri = %producer.uri, "Released idle resource stream");
            }
            !idle
        });
    }

    pub async fn open(&self, uri: impl Into<String>, content: Bytes, chunk_size: usize) -> StreamId {
        let stream_id = StreamId::generate();
        let producer = Producer {
            uri: uri.into(),
            content,
            position: 0,
            chunk_size: chunk_size.max(1),
            last_used: Instant::now(),
        };
        tracing::debug!(
            stream_id = %stream_id,
            uri = %producer.uri,
            total_size = producer.content.len(),
            chunk_size = producer.chunk_size,
            "Opened resource stream"
        );
        let mut producers = self.producers.lock().await;
        self.release_idle(&mut producers);
        producers.insert(stream_id.clone(), producer);
        stream_id
    }

    /// Produce the next chunk in position order
    pub async fn next_chunk(&self, stream_id: &StreamId) -> Result<StreamChunk, ResourceError> {
        let mut producers = self.producers.lock().await;
        self.release_idle(&mut producers);
        let producer = producers
            .get_mut(stream_id)
            .ok_or_else(|| ResourceError::StreamState(format!("unknown stream {}", stream_id)))?;
        producer.last_used = Instant::now();

        let start = producer.position;
        let end = (start + producer.chunk_size).min(producer.content.len());
        let data = producer.content.slice(start..end);
        producer.position = end;

        let complete = end >= producer.content.len();
        let chunk = StreamChunk {
            stream_id: stream_id.clone(),
            offset: start as u64,
            data,
            total_size: producer.content.len() as u64,
            complete,
        };

        if complete {
            if let Some(producer) = producers.remove(stream_id) {
                tracing::debug!(stream_id = %stream_id, uri = %producer.uri, "Resource stream complete");
            }
        }

        Ok(chunk)
    }

    pub async fn close(&self, stream_id: &StreamId) -> bool {
        self.producers.lock().await.remove(stream_id).is_some()
    }

    pub async fn active(&self) -> usize {
        let mut producers = self.producers.lock().await;
        self.release_idle(&mut producers);
        producers.len()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side view of one stream: chunks received so far, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    pub stream_id: StreamId,
    pub uri: String,
    pub chunks: Vec<Bytes>,
    pub position: u64,
    pub total_size: Option<u64>,
    pub complete: bool,
}

impl StreamSession {
    pub fn new(stream_id: StreamId, uri: impl Into<String>, total_size: Option<u64>) -> Self {
        Self {
            stream_id,
            uri: uri.into(),
            chunks: Vec::new(),
            position: 0,
            total_size,
            complete: false,
        }
    }

    /// Append a chunk; it must start exactly where the previous one ended
    pub fn accept(&mut self, chunk: StreamChunk) -> Result<(), ResourceError> {
        if self.complete {
            return Err(ResourceError::StreamState(format!(
                "stream {} already complete",
                self.stream_id
            )));
        }
        if chunk.offset != self.position {
            return Err(ResourceError::StreamState(format!(
                "stream {}: expected offset {}, got {}",
                self.stream_id, self.position, chunk.offset
            )));
        }

        self.position += chunk.data.len() as u64;
        self.total_size.get_or_insert(chunk.total_size);
        self.complete = chunk.complete;
        self.chunks.push(chunk.data);
        Ok(())
    }

    /// Everything received so far as one buffer
    pub fn data(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.position as usize);
        for chunk in &self.chunks {
            buffer.extend_from_slice(chunk);
        }
        buffer.freeze()
    }
}

/// Client-side stream buffers keyed by stream id.
///
/// Unlike subscriptions, touching a cleared or unknown stream is an error.
pub struct StreamBuffers {
    sessions: RwLock<HashMap<StreamId, StreamSession>>,
}

impl StreamBuffers {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn open(&self, stream_id: StreamId, uri: impl Into<String>, total_size: Option<u64>) {
        let session = StreamSession::new(stream_id.clone(), uri, total_size);
        self.sessions.write().await.insert(stream_id, session);
    }

    /// Buffer a delivered chunk; returns whether the stream is now complete
    pub async fn handle_chunk(&self, chunk: StreamChunk) -> Result<bool, ResourceError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&chunk.stream_id)
            .ok_or_else(|| unknown_stream(&chunk.stream_id))?;
        session.accept(chunk)?;
        Ok(session.complete)
    }

    pub async fn get(&self, stream_id: &StreamId) -> Result<StreamSession, ResourceError> {
        self.sessions
            .read()
            .await
            .get(stream_id)
            .cloned()
            .ok_or_else(|| unknown_stream(stream_id))
    }

    pub async fn clear(&self, stream_id: &StreamId) -> Result<StreamSession, ResourceError> {
        self.sessions
            .write()
            .await
            .remove(stream_id)
            .ok_or_else(|| unknown_stream(stream_id))
    }

    /// Drop every buffer (used on disconnect)
    pub async fn clear_all(&self) {
        self.sessions.write().await.clear();
    }
}

impl Default for StreamBuffers {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_stream(stream_id: &StreamId) -> ResourceError {
    ResourceError::StreamState(format!("unknown or cleared stream {}", stream_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_producer_chunks_in_order() {
        let registry = StreamRegistry::new();
        let content = Bytes::from(vec![7u8; 2500]);
        let id = registry.open("resource://m/a", content, 1000).await;

        let first = registry.next_chunk(&id).await.unwrap();
        let second = registry.next_chunk(&id).await.unwrap();
        let third = registry.next_chunk(&id).await.unwrap();
        assert_eq!((first.offset, second.offset, third.offset), (0, 1000, 2000));
        assert_eq!(third.data.len(), 500);
        assert!(!second.complete);
        assert!(third.complete);

        // Released after completion
        assert!(matches!(
            registry.next_chunk(&id).await,
            Err(ResourceError::StreamState(_))
        ));
        assert_eq!(registry.active().await, 0);
    }

    #[tokio::test]
    async fn test_empty_content_is_one_final_chunk() {
        let registry = StreamRegistry::new();
        let id = registry.open("resource://m/empty", Bytes::new(), 10).await;
        let chunk = registry.next_chunk(&id).await.unwrap();
        assert!(chunk.complete);
        assert!(chunk.data.is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_producer() {
        let registry = StreamRegistry::new();
        let id = registry.open("resource://m/a", Bytes::from_static(b"abc"), 1).await;
        assert!(registry.close(&id).await);
        assert!(!registry.close(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_producers_are_released() {
        let registry = StreamRegistry::with_idle_timeout(Duration::from_secs(60));
        let stale = registry.open("resource://m/a", Bytes::from(vec![0u8; 10]), 2).await;
        let busy = registry.open("resource://m/b", Bytes::from(vec![0u8; 10]), 2).await;

        tokio::time::advance(Duration::from_secs(40)).await;
        registry.next_chunk(&busy).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(registry.active().await, 1);
        assert!(matches!(
            registry.next_chunk(&stale).await,
            Err(ResourceError::StreamState(_))
        ));
        assert_eq!(registry.next_chunk(&busy).await.unwrap().offset, 2);
    }

    #[tokio::test]
    async fn test_buffers_reject_out_of_order_chunks() {
        let buffers = StreamBuffers::new();
        let id = StreamId::new("s1");
        buffers.open(id.clone(), "resource://m/a", Some(6)).await;

        let chunk = |offset: u64, data: &'static [u8], complete: bool| StreamChunk {
            stream_id: id.clone(),
            offset,
            data: Bytes::from_static(data),
            total_size: 6,
            complete,
        };

        assert!(!buffers.handle_chunk(chunk(0, b"abc", false)).await.unwrap());
        assert!(buffers.handle_chunk(chunk(4, b"ef", false)).await.is_err());
        assert!(buffers.handle_chunk(chunk(3, b"def", true)).await.unwrap());
        assert!(buffers.handle_chunk(chunk(6, b"", true)).await.is_err());

        let session = buffers.get(&id).await.unwrap();
        assert_eq!(session.data(), Bytes::from_static(b"abcdef"));
        assert_eq!(session.chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_access_after_clear_is_an_error() {
        let buffers = StreamBuffers::new();
        let id = StreamId::new("s1");
        buffers.open(id.clone(), "resource://m/a", None).await;
        buffers.clear(&id).await.unwrap();

        assert!(matches!(buffers.get(&id).await, Err(ResourceError::StreamState(_))));
        assert!(matches!(buffers.clear(&id).await, Err(ResourceError::StreamState(_))));
    }

    #[test]
    fn test_chunk_wire_form_is_base64() {
        let chunk = StreamChunk {
            stream_id: StreamId::new("s"),
            offset: 0,
            data: Bytes::from_static(b"hi"),
            total_size: 2,
            complete: true,
        };
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["data"], "aGk=");
        assert_eq!(serde_json::from_value::<StreamChunk>(value).unwrap(), chunk);
    }
}

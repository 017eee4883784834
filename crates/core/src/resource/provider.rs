use super::range::{ByteRange, ContentRange};
use super::uri::SCHEME;
use super::ResourceError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::RwLock;

/// Listing entry for a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Raw content of a resource as read from its provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData {
    pub content: Bytes,
    pub mime_type: Option<String>,
}

fn guess_mime(path: &str) -> Option<String> {
    mime_guess::from_path(path).first().map(|mime| mime.to_string())
}

/// Source of resources for one `resource://<provider>/` namespace
#[async_trait::async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Provider segment of the URIs this provider serves
    fn name(&self) -> &str;

    async fn list(&self) -> Result<Vec<ResourceDescriptor>, ResourceError>;

    async fn read(&self, path: &str) -> Result<ResourceData, ResourceError>;

    /// Partial read. The default reads everything and slices.
    async fn read_range(
        &self,
        path: &str,
        range: &ByteRange,
    ) -> Result<(ResourceData, ContentRange), ResourceError> {
        let data = self.read(path).await?;
        let total = data.content.len();
        let span = range.resolve(total)?;
        Ok((
            ResourceData {
                content: data.content.slice(span.clone()),
                mime_type: data.mime_type,
            },
            ContentRange::new(&span, total),
        ))
    }
}

/// In-memory provider, handy for generated content and tests
pub struct MemoryProvider {
    name: String,
    resources: RwLock<BTreeMap<String, ResourceData>>,
}

impl MemoryProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add or replace a resource; the mime type is guessed from `path` when not given
    pub async fn insert(&self, path: impl Into<String>, content: impl Into<Bytes>, mime_type: Option<&str>) {
        let path = path.into();
        let mime_type = mime_type.map(str::to_string).or_else(|| guess_mime(&path));
        self.resources.write().await.insert(
            path,
            ResourceData {
                content: content.into(),
                mime_type,
            },
        );
    }

    pub async fn remove(&self, path: &str) -> bool {
        self.resources.write().await.remove(path).is_some()
    }
}

#[async_trait::async_trait]
impl ResourceProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<ResourceDescriptor>, ResourceError> {
        Ok(self
            .resources
            .read()
            .await
            .iter()
            .map(|(path, data)| ResourceDescriptor {
                uri: format!("{}{}/{}", SCHEME, self.name, path),
                name: path.clone(),
                mime_type: data.mime_type.clone(),
                size: Some(data.content.len() as u64),
            })
            .collect())
    }

    async fn read(&self, path: &str) -> Result<ResourceData, ResourceError> {
        self.resources
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(format!("{}{}/{}", SCHEME, self.name, path)))
    }
}

/// Serves files below a root directory
pub struct FilesystemProvider {
    name: String,
    root: PathBuf,
}

impl FilesystemProvider {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn uri_for(&self, path: &str) -> String {
        format!("{}{}/{}", SCHEME, self.name, path)
    }

    // Only plain relative components are allowed, so nothing escapes the root
    fn resolve(&self, path: &str) -> Result<PathBuf, ResourceError> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(ResourceError::InvalidUri {
                uri: self.uri_for(path),
                reason: "path escapes the provider root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn map_io(&self, path: &str, error: std::io::Error) -> ResourceError {
        match error.kind() {
            std::io::ErrorKind::NotFound => ResourceError::NotFound(self.uri_for(path)),
            _ => ResourceError::Provider(format!("{}: {}", self.uri_for(path), error)),
        }
    }
}

#[async_trait::async_trait]
impl ResourceProvider for FilesystemProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<ResourceDescriptor>, ResourceError> {
        let root = self.root.clone();
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || {
            let mut descriptors = Vec::new();
            for entry in walkdir::WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| ResourceError::Provider(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let path = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let size = entry.metadata().ok().map(|m| m.len());
                descriptors.push(ResourceDescriptor {
                    uri: format!("{}{}/{}", SCHEME, name, path),
                    mime_type: guess_mime(&path),
                    name: path,
                    size,
                });
            }
            Ok(descriptors)
        })
        .await
        .map_err(|e| ResourceError::Provider(format!("listing task failed: {}", e)))?
    }

    async fn read(&self, path: &str) -> Result<ResourceData, ResourceError> {
        let full_path = self.resolve(path)?;
        let content = tokio::fs::read(&full_path)
            .await
            .map_err(|e| self.map_io(path, e))?;
        Ok(ResourceData {
            content: Bytes::from(content),
            mime_type: guess_mime(path),
        })
    }

    async fn read_range(
        &self,
        path: &str,
        range: &ByteRange,
    ) -> Result<(ResourceData, ContentRange), ResourceError> {
        let full_path = self.resolve(path)?;
        let mut file = tokio::fs::File::open(&full_path)
            .await
            .map_err(|e| self.map_io(path, e))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| self.map_io(path, e))?
            .len() as usize;

        let span = range.resolve(total)?;
        file.seek(SeekFrom::Start(span.start as u64))
            .await
            .map_err(|e| self.map_io(path, e))?;

        let mut content = vec![0u8; span.len()];
        file.read_exact(&mut content)
            .await
            .map_err(|e| self.map_io(path, e))?;

        Ok((
            ResourceData {
                content: Bytes::from(content),
                mime_type: guess_mime(path),
            },
            ContentRange::new(&span, total),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_provider_read_and_list() {
        let provider = MemoryProvider::new("mem");
        provider.insert("notes/a.txt", "hello", None).await;
        provider.insert("blob", vec![1u8, 2, 3], Some("application/octet-stream")).await;

        let data = provider.read("notes/a.txt").await.unwrap();
        assert_eq!(data.content, Bytes::from_static(b"hello"));
        assert_eq!(data.mime_type.as_deref(), Some("text/plain"));

        let listed = provider.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].uri, "resource://mem/notes/a.txt");

        assert!(matches!(
            provider.read("missing").await,
            Err(ResourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_default_read_range_slices() {
        let provider = MemoryProvider::new("mem");
        provider.insert("digits", "0123456789", None).await;
        let (data, range) = provider
            .read_range("digits", &ByteRange::parse("-3").unwrap())
            .await
            .unwrap();
        assert_eq!(data.content, Bytes::from_static(b"789"));
        assert_eq!(range, ContentRange { start: 7, end: 10, total: 10 });
    }

    #[tokio::test]
    async fn test_filesystem_provider() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/data.json"), br#"{"k":1}"#).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"0123456789").unwrap();

        let provider = FilesystemProvider::new("files", dir.path());
        let listed = provider.list().await.unwrap();
        let uris: Vec<_> = listed.iter().map(|d| d.uri.as_str()).collect();
        assert_eq!(uris, vec!["resource://files/sub/data.json", "resource://files/top.txt"]);
        assert_eq!(listed[0].mime_type.as_deref(), Some("application/json"));

        let (data, range) = provider
            .read_range("top.txt", &ByteRange::parse("2-4").unwrap())
            .await
            .unwrap();
        assert_eq!(data.content, Bytes::from_static(b"234"));
        assert_eq!(range.total, 10);

        assert!(matches!(
            provider.read("nope.txt").await,
            Err(ResourceError::NotFound(_))
        ));
        assert!(matches!(
            provider.read("../etc/passwd").await,
            Err(ResourceError::InvalidUri { .. })
        ));
    }
}

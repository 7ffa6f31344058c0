//! 对象存储实现：内存版（测试 / 离线）与本地目录版

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::storage::{BlobStore, StoredObject};

/// 内存对象存储；可切换为不可用状态以模拟存储故障
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
    unavailable: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|(_, ct)| ct.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_bytes(&self, data: &[u8], key: &str, content_type: &str) -> Option<StoredObject> {
        if self.unavailable.load(Ordering::SeqCst) {
            return None;
        }
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Some(StoredObject {
            url: format!("memory://{key}"),
            key: key.to_string(),
        })
    }

    async fn download_bytes(&self, key: &str) -> Option<Vec<u8>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return None;
        }
        self.objects.read().await.get(key).map(|(data, _)| data.clone())
    }
}

/// 本地目录对象存储：key 即相对路径；配置了 public_base_url 时 url 为 `{base}/{key}`
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalBlobStore {
    pub fn new(root: impl AsRef<Path>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// key 必须是不含 `..` 的相对路径
    fn resolve(&self, key: &str) -> Option<PathBuf> {
        let path = Path::new(key);
        let safe = !key.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
        safe.then(|| self.root.join(path))
    }

    fn url_for(&self, key: &str, path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => format!("file://{}", path.display()),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload_bytes(&self, data: &[u8], key: &str, content_type: &str) -> Option<StoredObject> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(key, error = %e, "blob upload failed");
                return None;
            }
        }
        match tokio::fs::write(&path, data).await {
            Ok(()) => {
                tracing::debug!(key, content_type, bytes = data.len(), "blob stored");
                Some(StoredObject {
                    url: self.url_for(key, &path),
                    key: key.to_string(),
                })
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "blob upload failed");
                None
            }
        }
    }

    async fn download_bytes(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip_and_outage() {
        let store = MemoryBlobStore::new();
        let obj = store.upload_bytes(b"pdf", "users/u/papers/p/paper.pdf", "application/pdf").await.unwrap();
        assert_eq!(obj.url, "memory://users/u/papers/p/paper.pdf");
        assert_eq!(store.download_bytes(&obj.key).await.unwrap(), b"pdf");
        assert_eq!(store.content_type(&obj.key).await.as_deref(), Some("application/pdf"));

        store.set_unavailable(true);
        assert!(store.upload_bytes(b"x", "k", "text/plain").await.is_none());
        assert!(store.download_bytes(&obj.key).await.is_none());
        store.set_unavailable(false);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_local_store_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), Some("https://cdn.example.com/".into()));
        let obj = store.upload_bytes(b"data", "users/u/a.bin", "application/octet-stream").await.unwrap();
        assert_eq!(obj.url, "https://cdn.example.com/users/u/a.bin");
        assert!(dir.path().join("users/u/a.bin").exists());
        assert_eq!(store.download_bytes("users/u/a.bin").await.unwrap(), b"data");
        assert!(store.download_bytes("users/u/missing.bin").await.is_none());
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), None);
        assert!(store.upload_bytes(b"x", "../x", "text/plain").await.is_none());
        assert!(store.upload_bytes(b"x", "/abs", "text/plain").await.is_none());
        let obj = store.upload_bytes(b"x", "ok.txt", "text/plain").await.unwrap();
        assert!(obj.url.starts_with("file://"));
    }
}

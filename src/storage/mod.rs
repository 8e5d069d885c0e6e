pub mod paths;

use std::fmt;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

#[derive(Debug)]
pub enum StorageError {
    NotFound,
    Io(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound => write!(f, "key not found"),
            StorageError::Io(msg) => write!(f, "storage io error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound,
            _ => StorageError::Io(err.to_string()),
        }
    }
}

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Blob store consumed by the registry. Keys are opaque `/`-separated
/// strings; a backend must provide atomic per-key replacement so readers
/// observe either the previous bytes or the new bytes, never a mix.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Streaming read of a blob without buffering it whole.
    async fn open_reader(
        &self,
        key: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, StorageError>;

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Streams `reader` to durable storage under `key`, returning the byte
    /// count. The bytes are only visible under `key` once fully written.
    async fn put_reader(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StorageError>;

    /// Seekable view of an already-written blob, for post-hoc parsing on a
    /// blocking thread.
    async fn open_seekable(&self, key: &str) -> Result<Box<dyn ReadSeek + Send>, StorageError>;

    async fn size(&self, key: &str) -> Result<u64, StorageError>;

    async fn exists(&self, key: &str) -> bool;

    /// Direct children of `prefix`, as full keys. Used for tag enumeration.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    async fn remove_all(&self, prefix: &str) -> Result<(), StorageError>;
}

/// Local-filesystem backend rooted at a data directory. Writes land in a
/// `tmp/` sibling first and are renamed into place.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("tmp"))?;
        Ok(FsBackend { root })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join("tmp").join(uuid::Uuid::new_v4().to_string())
    }

    async fn commit(&self, temp: &Path, key: &str) -> Result<(), StorageError> {
        let dest = self.key_path(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(temp, &dest).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for FsBackend {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(self.key_path(key)).await?)
    }

    async fn open_reader(
        &self,
        key: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, StorageError> {
        let file = tokio::fs::File::open(self.key_path(key)).await?;
        Ok(Box::new(file))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let temp = self.temp_path();
        tokio::fs::write(&temp, data).await?;
        self.commit(&temp, key).await
    }

    async fn put_reader(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StorageError> {
        let temp = self.temp_path();
        let mut file = tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp)
            .await?;
        let written = match tokio::io::copy(reader, &mut file).await {
            Ok(n) => n,
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(err.into());
            }
        };
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        self.commit(&temp, key).await?;
        Ok(written)
    }

    async fn open_seekable(&self, key: &str) -> Result<Box<dyn ReadSeek + Send>, StorageError> {
        let path = self.key_path(key);
        let file = tokio::task::spawn_blocking(move || std::fs::File::open(path))
            .await
            .map_err(|e| StorageError::Io(e.to_string()))??;
        Ok(Box::new(file))
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        let meta = tokio::fs::metadata(self.key_path(key)).await?;
        Ok(meta.len())
    }

    async fn exists(&self, key: &str) -> bool {
        match tokio::fs::metadata(self.key_path(key)).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut entries = tokio::fs::read_dir(self.key_path(prefix)).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            keys.push(format!("{prefix}/{name}"));
        }
        keys.sort();
        Ok(keys)
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        tokio::fs::remove_file(self.key_path(key)).await?;
        Ok(())
    }

    async fn remove_all(&self, prefix: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(self.key_path(prefix)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// AsyncRead adapter that feeds every byte it yields into a SHA-256, so an
/// upload is digested in-band while it streams to storage.
pub struct TeeHashReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R> TeeHashReader<R> {
    /// `hasher` may be pre-seeded (the layer digest starts from the image
    /// JSON bytes).
    pub fn new(inner: R, hasher: Sha256) -> Self {
        TeeHashReader { inner, hasher }
    }

    pub fn finalize_hex(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TeeHashReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let already_filled = buf.filled().len();
        let me = &mut *self;
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                me.hasher.update(&buf.filled()[already_filled..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn backend() -> (tempfile::TempDir, FsBackend) {
        let dir = tempfile::tempdir().expect("temp dir");
        let backend = FsBackend::new(dir.path()).expect("backend");
        (dir, backend)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, backend) = backend();
        backend.put("images/abc/json", b"{}").await.unwrap();
        assert_eq!(backend.get("images/abc/json").await.unwrap(), b"{}");
        assert!(backend.exists("images/abc/json").await);
        assert_eq!(backend.size("images/abc/json").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, backend) = backend();
        assert!(matches!(
            backend.get("images/zzz/json").await,
            Err(StorageError::NotFound)
        ));
        assert!(!backend.exists("images/zzz/json").await);
    }

    #[tokio::test]
    async fn test_put_reader_streams_and_counts() {
        let (_dir, backend) = backend();
        let payload = vec![7u8; 128 * 1024];
        let mut reader = std::io::Cursor::new(payload.clone());
        let written = backend
            .put_reader("images/abc/layer", &mut reader)
            .await
            .unwrap();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(backend.get("images/abc/layer").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_open_reader_streams() {
        let (_dir, backend) = backend();
        backend.put("images/abc/layer", b"layer-bytes").await.unwrap();
        let mut reader = backend.open_reader("images/abc/layer").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"layer-bytes");
    }

    #[tokio::test]
    async fn test_list_returns_direct_children() {
        let (_dir, backend) = backend();
        backend.put("repositories/a/b/tag_latest", b"img1").await.unwrap();
        backend.put("repositories/a/b/tag_v1", b"img2").await.unwrap();
        backend.put("repositories/a/b/json", b"{}").await.unwrap();
        let keys = backend.list("repositories/a/b").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "repositories/a/b/json".to_string(),
                "repositories/a/b/tag_latest".to_string(),
                "repositories/a/b/tag_v1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_and_remove_all() {
        let (_dir, backend) = backend();
        backend.put("repositories/a/b/tag_latest", b"img1").await.unwrap();
        backend.put("repositories/a/b/tag_v1", b"img2").await.unwrap();
        backend.remove("repositories/a/b/tag_v1").await.unwrap();
        assert!(!backend.exists("repositories/a/b/tag_v1").await);
        backend.remove_all("repositories/a/b").await.unwrap();
        assert!(matches!(
            backend.list("repositories/a/b").await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_tee_hash_reader_digests_while_copying() {
        let (_dir, backend) = backend();
        let payload = b"some layer content".to_vec();
        let mut tee = TeeHashReader::new(std::io::Cursor::new(payload.clone()), Sha256::new());
        backend.put_reader("images/abc/layer", &mut tee).await.unwrap();

        let expected = format!("{:x}", Sha256::digest(&payload));
        assert_eq!(tee.finalize_hex(), expected);
        assert_eq!(backend.get("images/abc/layer").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_seeded_tee_hash_differs() {
        let mut hasher = Sha256::new();
        hasher.update(b"seed");
        let mut tee = TeeHashReader::new(std::io::Cursor::new(b"body".to_vec()), hasher);
        let mut sink = Vec::new();
        tokio::io::copy(&mut tee, &mut sink).await.unwrap();

        let mut combined = Sha256::new();
        combined.update(b"seed");
        combined.update(b"body");
        assert_eq!(tee.finalize_hex(), format!("{:x}", combined.finalize()));
    }
}

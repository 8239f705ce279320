//! The abstract virtual-filesystem interface consumed by `VfsWrite`/`VfsRead`
//! effects (spec §6). Concrete implementations (real disk, in-memory,
//! sandboxed) are supplied by the embedding application; none ships here.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum VfsError {
    #[error("no virtual filesystem is configured")]
    #[diagnostic(
        code(dygram::vfs::unavailable),
        help("pass a `Vfs` implementation to the facade to enable VfsRead/VfsWrite effects")
    )]
    Unavailable,

    #[error("file not found: {0}")]
    #[diagnostic(code(dygram::vfs::read_missing))]
    ReadMissing(String),

    #[error("failed to write {path}: {reason}")]
    #[diagnostic(code(dygram::vfs::write_failed))]
    WriteFailed { path: String, reason: String },
}

/// Consumed abstract filesystem interface, `Send + Sync` and used behind
/// `Arc<dyn Vfs>`.
#[async_trait]
pub trait Vfs: Send + Sync {
    async fn write_file(&self, path: &str, content: &str) -> Result<(), VfsError>;
    async fn read_file(&self, path: &str) -> Result<String, VfsError>;
    async fn exists(&self, path: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryVfs {
        files: Mutex<rustc_hash::FxHashMap<String, String>>,
    }

    #[async_trait]
    impl Vfs for MemoryVfs {
        async fn write_file(&self, path: &str, content: &str) -> Result<(), VfsError> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.to_string());
            Ok(())
        }

        async fn read_file(&self, path: &str) -> Result<String, VfsError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| VfsError::ReadMissing(path.to_string()))
        }

        async fn exists(&self, path: &str) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }
    }

    #[tokio::test]
    async fn round_trips_a_write_then_read() {
        let vfs = MemoryVfs::default();
        vfs.write_file("/a.txt", "hello").await.unwrap();
        assert!(vfs.exists("/a.txt").await);
        assert_eq!(vfs.read_file("/a.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn missing_read_is_an_error() {
        let vfs = MemoryVfs::default();
        let err = vfs.read_file("/missing").await.unwrap_err();
        assert!(matches!(err, VfsError::ReadMissing(_)));
    }
}

use async_trait::async_trait;
use log::error;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Content-addressed attachment storage. Keys are sha256 hex digests
/// computed by the upload handler.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError>;
}

/// Filesystem store: `<data dir>/images/<hash[0..2]>/<hash>` for the bytes
/// with a `.mime` sidecar holding the sniffed content type.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new() -> Self {
        let mut root = std::env::var("ZINE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        root.push("images");
        Self { root }
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        let mut p = self.root.clone();
        p.push(&hash[0..2]);
        p.push(hash);
        p
    }
}

impl Default for FsImageStore {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(hash);
        if path.exists() {
            return Err(ImageStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ImageStoreError::Other(e.to_string()))?;
        }
        std::fs::write(&path, bytes).map_err(|e| {
            error!("image write failed hash={hash}: {e}");
            ImageStoreError::Other(e.to_string())
        })?;
        std::fs::write(path.with_extension("mime"), mime)
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let path = self.path_for(hash);
        let bytes = std::fs::read(&path).map_err(|_| ImageStoreError::NotFound)?;
        // sidecar may be missing for snapshots written by older builds
        let mime = std::fs::read_to_string(path.with_extension("mime"))
            .ok()
            .filter(|m| !m.is_empty())
            .or_else(|| infer::get(&bytes).map(|t| t.mime_type().to_string()))
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError> {
        let path = self.path_for(hash);
        // best-effort: absence is success
        let _ = std::fs::remove_file(path.with_extension("mime"));
        let _ = std::fs::remove_file(path);
        Ok(())
    }
}

pub fn build_image_store() -> Arc<dyn ImageStore> {
    Arc::new(FsImageStore::new())
}

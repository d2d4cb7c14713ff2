use super::{BlobError, BlobStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Blob store backed by a local directory, laid out as
/// `<root>/<fileID>/<chunkID>` with the raw chunk bytes as file content.
pub struct LocalFsBlobStore {
    root: PathBuf,
}

impl LocalFsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn chunk_path(&self, file_id: &str, chunk_id: i64) -> PathBuf {
        self.root.join(file_id).join(chunk_id.to_string())
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn put_chunk(
        &self,
        file_id: &str,
        chunk_id: i64,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<String, BlobError> {
        let dir = self.root.join(file_id);
        fs::create_dir_all(&dir).await?;

        let path = self.chunk_path(file_id, chunk_id);
        let mut file = File::create(&path).await?;
        let written = tokio::io::copy(data, &mut file).await?;
        file.sync_all().await?;

        tracing::debug!(
            target: "blobstore",
            file_id = file_id,
            chunk_id = chunk_id,
            bytes = written,
            path = %path.display(),
            "Stored chunk blob"
        );

        Ok(path.to_string_lossy().into_owned())
    }

    async fn open_chunk(
        &self,
        blob_url: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, BlobError> {
        let path = Path::new(blob_url);
        if !path.starts_with(&self.root) {
            return Err(BlobError::InvalidLocation(blob_url.to_string()));
        }

        let file = File::open(path).await?;
        Ok(Box::new(file))
    }

    async fn build_file(&self, blob_urls: &[String]) -> Result<Vec<u8>, BlobError> {
        let mut buffer = Vec::new();

        for blob_url in blob_urls {
            let mut reader = self.open_chunk(blob_url).await?;
            let read = reader.read_to_end(&mut buffer).await?;
            tracing::debug!(
                target: "blobstore",
                blob_url = %blob_url,
                bytes = read,
                "Appended chunk to composed file"
            );
        }

        Ok(buffer)
    }
}

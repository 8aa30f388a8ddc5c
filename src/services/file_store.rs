use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileStoreError {
    /// The upload itself is unacceptable (type, size, name).
    #[error("{0}")]
    Rejected(String),
    #[error("upload timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Blob storage for submission attachments.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the public URL.
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, FileStoreError>;
}

/// Writes attachments to a local directory that the router serves at `/uploads`.
pub struct LocalFileStore {
    root: PathBuf,
    public_base: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(&self, key: &str, _content_type: &str, bytes: Vec<u8>) -> Result<String, FileStoreError> {
        if key.contains('/') || key.contains("..") {
            return Err(FileStoreError::Rejected("Invalid file name".to_string()));
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| FileStoreError::Backend(e.to_string()))?;
        tokio::fs::write(self.root.join(key), bytes)
            .await
            .map_err(|e| FileStoreError::Backend(e.to_string()))?;
        Ok(format!("{}/uploads/{}", self.public_base, key))
    }
}

/// S3/R2-compatible object endpoint reached with plain authenticated PUTs.
pub struct HttpFileStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    public_base: String,
}

impl HttpFileStore {
    pub fn new(endpoint: String, token: Option<String>, public_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, FileStoreError> {
        let mut request = self
            .client
            .put(format!("{}/{}", self.endpoint, key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FileStoreError::Backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FileStoreError::Backend(format!(
                "object store answered {}",
                response.status()
            )));
        }

        Ok(format!("{}/{}", self.public_base, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("lms-uploads-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn local_store_writes_and_returns_url() {
        let root = temp_root();
        let store = LocalFileStore::new(&root, "http://localhost:3000/");

        let url = store.put("essay.pdf", "application/pdf", b"%PDF-1.4".to_vec()).await.unwrap();

        assert_eq!(url, "http://localhost:3000/uploads/essay.pdf");
        assert_eq!(std::fs::read(root.join("essay.pdf")).unwrap(), b"%PDF-1.4");
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn local_store_refuses_path_traversal() {
        let store = LocalFileStore::new(temp_root(), "http://localhost");
        let err = store.put("../etc/passwd", "text/plain", vec![1]).await.unwrap_err();
        assert!(matches!(err, FileStoreError::Rejected(_)));
    }
}

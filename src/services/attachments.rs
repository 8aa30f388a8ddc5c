use crate::services::file_store::{FileStore, FileStoreError};
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_EXTENSIONS: [&str; 9] = ["pdf", "doc", "docx", "txt", "md", "png", "jpg", "jpeg", "mp4"];

/// A file pulled out of a multipart request, not yet stored.
#[derive(Debug)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Checks name, extension and size; returns the lowercased extension.
pub fn validate(attachment: &Attachment) -> Result<String, FileStoreError> {
    if attachment.file_name.trim().is_empty() {
        return Err(FileStoreError::Rejected("Empty filename".to_string()));
    }
    let extension = attachment
        .file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| FileStoreError::Rejected("File type not allowed".to_string()))?;
    if attachment.bytes.is_empty() {
        return Err(FileStoreError::Rejected("File is empty".to_string()));
    }
    if attachment.bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(FileStoreError::Rejected("File size exceeds limit".to_string()));
    }
    Ok(extension)
}

pub fn storage_key(extension: &str, now: DateTime<Utc>) -> String {
    format!(
        "SUBMISSION-{}-{}.{}",
        now.format("%Y%m%d%H%M%S"),
        Uuid::new_v4().simple(),
        extension
    )
}

/// Validates and uploads an attachment, giving up after `timeout`.
pub async fn upload(
    store: &dyn FileStore,
    attachment: Attachment,
    timeout: Duration,
) -> Result<String, FileStoreError> {
    let extension = validate(&attachment)?;
    let key = storage_key(&extension, Utc::now());
    let size = attachment.bytes.len();

    let url = tokio::time::timeout(timeout, store.put(&key, &attachment.content_type, attachment.bytes))
        .await
        .map_err(|_| FileStoreError::Timeout(timeout))??;

    tracing::debug!("Stored attachment {} ({} bytes)", key, size);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl FileStore for Recording {
        async fn put(&self, key: &str, _content_type: &str, _bytes: Vec<u8>) -> Result<String, FileStoreError> {
            self.0.lock().unwrap().push(key.to_string());
            Ok(format!("https://files.test/{key}"))
        }
    }

    struct Stalled;

    #[async_trait]
    impl FileStore for Stalled {
        async fn put(&self, _key: &str, _content_type: &str, _bytes: Vec<u8>) -> Result<String, FileStoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    fn attachment(name: &str, len: usize) -> Attachment {
        Attachment {
            file_name: name.to_string(),
            content_type: "application/octet-stream".to_string(),
            bytes: vec![7; len],
        }
    }

    #[test]
    fn rejects_bad_names_types_and_sizes() {
        assert!(validate(&attachment("", 10)).is_err());
        assert!(validate(&attachment("essay", 10)).is_err());
        assert!(validate(&attachment("payload.exe", 10)).is_err());
        assert!(validate(&attachment("essay.pdf", 0)).is_err());
        assert!(validate(&attachment("essay.pdf", MAX_ATTACHMENT_BYTES + 1)).is_err());
        assert_eq!(validate(&attachment("Essay.PDF", 10)).unwrap(), "pdf");
    }

    #[tokio::test]
    async fn uploads_under_generated_key() {
        let store = Recording(Mutex::new(Vec::new()));
        let url = upload(&store, attachment("my essay.docx", 32), Duration::from_secs(5))
            .await
            .unwrap();

        let keys = store.0.lock().unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("SUBMISSION-"));
        assert!(keys[0].ends_with(".docx"));
        assert_eq!(url, format!("https://files.test/{}", keys[0]));
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let err = upload(&Stalled, attachment("essay.txt", 4), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, FileStoreError::Timeout(_)));
    }
}

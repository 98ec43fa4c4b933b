use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::Mutex;

use super::{CreateOutcome, DeleteOutcome, StoreError, WaitlistEntry, WaitlistStore, newest_first};
use crate::email::EmailAddress;

const BACKEND: &str = "file";

// JSON array in one file. One lock covers each whole read-modify-write,
// writes go to a temp file renamed over the target
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<WaitlistEntry>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::unavailable(BACKEND, format!("read {}: {e}", self.path.display()))),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::corrupt(BACKEND, format!("{}: {e}", self.path.display())))
    }

    async fn persist(&self, entries: &[WaitlistEntry]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| StoreError::unavailable(BACKEND, format!("encode: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::unavailable(BACKEND, format!("create {}: {e}", parent.display())))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, format!("rename into {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl WaitlistStore for FileStore {
    async fn create(&self, email: &EmailAddress) -> Result<CreateOutcome, StoreError> {
        let _guard = self.lock.lock().await;

        let mut entries = self.load().await?;
        if entries.iter().any(|e| e.email == email.as_str()) {
            return Ok(CreateOutcome { created: false });
        }

        entries.push(WaitlistEntry::new(email, Utc::now()));
        self.persist(&entries).await?;
        Ok(CreateOutcome { created: true })
    }

    async fn list(&self) -> Result<Vec<WaitlistEntry>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(newest_first(self.load().await?))
    }

    async fn delete(&self, email: &EmailAddress) -> Result<DeleteOutcome, StoreError> {
        let _guard = self.lock.lock().await;

        let mut entries = self.load().await?;
        let before = entries.len();
        entries.retain(|e| e.email != email.as_str());
        let removed = (before - entries.len()) as u32;

        if removed > 0 {
            self.persist(&entries).await?;
        }
        Ok(DeleteOutcome { removed })
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}

mod file;
mod firestore;

pub use file::FileStore;
pub use firestore::{
    DEFAULT_COLLECTION, DEFAULT_DATABASE, FirestoreSettings, FirestoreStore, FirestoreTarget,
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::Args;
use crate::email::EmailAddress;

// Upper bound on list/export payloads
pub const MAX_LIST_ENTRIES: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistEntry {
    pub email: String,
    #[serde(with = "created_at_format")]
    pub created_at: DateTime<Utc>,
}

impl WaitlistEntry {
    pub fn new(email: &EmailAddress, created_at: DateTime<Utc>) -> Self {
        Self {
            email: email.as_str().to_string(),
            created_at,
        }
    }

    pub fn created_at_string(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

// RFC 3339 with millisecond precision and a `Z` suffix
mod created_at_format {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOutcome {
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub removed: u32,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{backend} backend unavailable: {reason}")]
    Unavailable { backend: &'static str, reason: String },
    #[error("{backend} backend returned unreadable data: {reason}")]
    Corrupt { backend: &'static str, reason: String },
}

impl StoreError {
    pub fn unavailable(backend: &'static str, reason: impl std::fmt::Display) -> Self {
        StoreError::Unavailable {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(backend: &'static str, reason: impl std::fmt::Display) -> Self {
        StoreError::Corrupt {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            StoreError::Unavailable { backend, .. } | StoreError::Corrupt { backend, .. } => backend,
        }
    }
}

#[async_trait]
pub trait WaitlistStore: Send + Sync {
    // insert only if absent; an existing entry is created: false, not an error
    async fn create(&self, email: &EmailAddress) -> Result<CreateOutcome, StoreError>;

    // newest first, at most MAX_LIST_ENTRIES
    async fn list(&self) -> Result<Vec<WaitlistEntry>, StoreError>;

    // missing key is removed: 0
    async fn delete(&self, email: &EmailAddress) -> Result<DeleteOutcome, StoreError>;

    fn backend(&self) -> &'static str;
}

// newest first, capped
pub(crate) fn newest_first(mut entries: Vec<WaitlistEntry>) -> Vec<WaitlistEntry> {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    entries.truncate(MAX_LIST_ENTRIES);
    entries
}

// Pick the backend from whatever configuration is present.
// Firestore wins over the file; neither means waitlist routes answer 500.
pub fn select_store(args: &Args, client: reqwest::Client) -> Option<Arc<dyn WaitlistStore>> {
    if let Some(settings) = args.firestore_settings() {
        return match FirestoreStore::connect(settings, client) {
            Ok(store) => {
                tracing::info!(backend = store.backend(), "Waitlist store ready");
                Some(Arc::new(store))
            }
            Err(e) => {
                tracing::error!(error = %e, "Firestore is misconfigured, waitlist disabled");
                None
            }
        };
    }

    if args.has_partial_firestore_settings() {
        tracing::warn!("Some Firestore variables are set but not all of project id, client email and private key");
    }

    if let Some(path) = &args.waitlist_file {
        let store = FileStore::new(path.clone());
        tracing::info!(backend = store.backend(), path = %path.display(), "Waitlist store ready");
        return Some(Arc::new(store));
    }

    tracing::error!("No waitlist backend configured (missing Firestore env vars and waitlist file)");
    None
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio::sync::Mutex;
use url::Url;

use super::{
    CreateOutcome, DeleteOutcome, MAX_LIST_ENTRIES, StoreError, WaitlistEntry, WaitlistStore,
};
use crate::email::EmailAddress;

const BACKEND: &str = "firestore";
const CLOUD_ENDPOINT: &str = "https://firestore.googleapis.com/v1/";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
// the emulator accepts this fixed admin token
const EMULATOR_TOKEN: &str = "owner";
// refresh access tokens this many seconds before they expire
const TOKEN_EXPIRY_SLACK: i64 = 60;

pub const DEFAULT_DATABASE: &str = "(default)";
pub const DEFAULT_COLLECTION: &str = "ios_interest";

#[derive(Debug, Clone)]
pub struct FirestoreSettings {
    pub project_id: String,
    pub database_id: String,
    pub collection: String,
    pub target: FirestoreTarget,
}

#[derive(Clone)]
pub enum FirestoreTarget {
    // Google Cloud, authenticated as a service account
    Cloud {
        client_email: String,
        private_key: String,
    },
    // local emulator at host:port, no OAuth
    Emulator { host: String },
}

impl std::fmt::Debug for FirestoreTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FirestoreTarget::Cloud { client_email, .. } => f
                .debug_struct("Cloud")
                .field("client_email", client_email)
                .finish_non_exhaustive(),
            FirestoreTarget::Emulator { host } => f.debug_struct("Emulator").field("host", host).finish(),
        }
    }
}

// Secrets stored in env files often carry literal "\n" instead of newlines
pub fn unescape_private_key(raw: &str) -> String {
    raw.replace("\\n", "\n")
}

struct ServiceAccount {
    client_email: String,
    key: EncodingKey,
    token_uri: String,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: i64,
}

impl ServiceAccount {
    fn assertion(&self, now: i64) -> Result<String, StoreError> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + 3600,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| StoreError::unavailable(BACKEND, format!("sign token assertion: {e}")))
    }
}

// Firestore REST backend. Document id = normalized email; createDocument
// answers ALREADY_EXISTS for duplicates and delete carries an exists precondition
pub struct FirestoreStore {
    client: reqwest::Client,
    documents: Url,
    collection: String,
    account: Option<ServiceAccount>,
    token: Mutex<Option<CachedToken>>,
}

impl FirestoreStore {
    pub fn connect(settings: FirestoreSettings, client: reqwest::Client) -> Result<Self, StoreError> {
        let (endpoint, account) = match settings.target {
            FirestoreTarget::Cloud { client_email, private_key } => {
                let key = EncodingKey::from_rsa_pem(unescape_private_key(&private_key).as_bytes())
                    .map_err(|e| StoreError::unavailable(BACKEND, format!("invalid private key: {e}")))?;
                let account = ServiceAccount {
                    client_email,
                    key,
                    token_uri: TOKEN_URI.to_string(),
                };
                (CLOUD_ENDPOINT.to_string(), Some(account))
            }
            FirestoreTarget::Emulator { host } => (format!("http://{}/v1/", host.trim_end_matches('/')), None),
        };

        let mut documents = Url::parse(&endpoint)
            .map_err(|e| StoreError::unavailable(BACKEND, format!("endpoint {endpoint}: {e}")))?;
        documents
            .path_segments_mut()
            .map_err(|_| StoreError::unavailable(BACKEND, format!("endpoint {endpoint} cannot hold a path")))?
            .pop_if_empty()
            .extend([
                "projects",
                settings.project_id.as_str(),
                "databases",
                settings.database_id.as_str(),
                "documents",
            ]);

        Ok(Self {
            client,
            documents,
            collection: settings.collection,
            account,
            token: Mutex::new(None),
        })
    }

    fn url_with(&self, segments: &[&str]) -> Url {
        let mut url = self.documents.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    fn collection_url(&self) -> Url {
        self.url_with(&[self.collection.as_str()])
    }

    fn document_url(&self, id: &str) -> Url {
        self.url_with(&[self.collection.as_str(), id])
    }

    // documents:runQuery lives beside the documents segment, not under it
    fn run_query_url(&self) -> Url {
        let mut url = self.documents.clone();
        let path = format!("{}:runQuery", url.path());
        url.set_path(&path);
        url
    }

    async fn bearer(&self) -> Result<String, StoreError> {
        let Some(account) = &self.account else {
            return Ok(EMULATOR_TOKEN.to_string());
        };

        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at - TOKEN_EXPIRY_SLACK > now) {
            return Ok(token.value.clone());
        }

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &account.assertion(now)?)
            .finish();

        let res = self
            .client
            .post(&account.token_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, format!("token request: {e}")))?;

        if !res.status().is_success() {
            let status = res.status();
            let detail = res.text().await.unwrap_or_default();
            return Err(StoreError::unavailable(
                BACKEND,
                format!("token exchange failed with {status}: {}", truncate(&detail)),
            ));
        }

        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| StoreError::corrupt(BACKEND, format!("token response: {e}")))?;

        tracing::debug!(expires_in = token.expires_in, "Refreshed Firestore access token");
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + token.expires_in,
        });
        Ok(value)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let token = self.bearer().await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, format!("request failed: {e}")))
    }
}

// Firestore error envelope: {"error": {"code", "message", "status"}}
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

async fn read_error(res: reqwest::Response) -> (StatusCode, ErrorBody) {
    let status = res.status();
    let text = res.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorEnvelope>(&text)
        .map(|env| env.error)
        .unwrap_or_else(|_| ErrorBody {
            status: String::new(),
            message: truncate(&text),
        });
    (status, body)
}

fn truncate(text: &str) -> String {
    text.chars().take(200).collect()
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    fields: HashMap<String, Value>,
    create_time: Option<String>,
}

impl Document {
    fn string_field(&self, name: &str) -> Option<&str> {
        let value = self.fields.get(name)?;
        value
            .get("stringValue")
            .or_else(|| value.get("timestampValue"))
            .and_then(Value::as_str)
    }

    // Rows without a string email are skipped, as are rows with no usable timestamp
    fn into_entry(self) -> Option<WaitlistEntry> {
        let email = self.string_field("email")?.to_string();
        let created_at = self
            .string_field("createdAt")
            .or(self.create_time.as_deref())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())?
            .with_timezone(&Utc);
        Some(WaitlistEntry { email, created_at })
    }
}

fn encode_entry(entry: &WaitlistEntry) -> Value {
    json!({
        "fields": {
            "email": { "stringValue": entry.email },
            "createdAt": { "stringValue": entry.created_at_string() },
        }
    })
}

fn list_query(collection: &str) -> Value {
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": collection }],
            "orderBy": [{ "field": { "fieldPath": "createdAt" }, "direction": "DESCENDING" }],
            "limit": MAX_LIST_ENTRIES,
        }
    })
}

#[async_trait]
impl WaitlistStore for FirestoreStore {
    async fn create(&self, email: &EmailAddress) -> Result<CreateOutcome, StoreError> {
        let mut url = self.collection_url();
        url.query_pairs_mut().append_pair("documentId", email.as_str());

        let entry = WaitlistEntry::new(email, Utc::now());
        let res = self.send(self.client.post(url).json(&encode_entry(&entry))).await?;

        if res.status().is_success() {
            return Ok(CreateOutcome { created: true });
        }

        let (status, body) = read_error(res).await;
        if status == StatusCode::CONFLICT || body.status == "ALREADY_EXISTS" {
            return Ok(CreateOutcome { created: false });
        }
        Err(StoreError::unavailable(
            BACKEND,
            format!("create returned {status} {}: {}", body.status, body.message),
        ))
    }

    async fn list(&self) -> Result<Vec<WaitlistEntry>, StoreError> {
        let res = self
            .send(self.client.post(self.run_query_url()).json(&list_query(&self.collection)))
            .await?;

        if !res.status().is_success() {
            let (status, body) = read_error(res).await;
            return Err(StoreError::unavailable(
                BACKEND,
                format!("runQuery returned {status} {}: {}", body.status, body.message),
            ));
        }

        let rows: Vec<QueryRow> = res
            .json()
            .await
            .map_err(|e| StoreError::corrupt(BACKEND, format!("runQuery response: {e}")))?;

        let mut entries: Vec<WaitlistEntry> = rows
            .into_iter()
            .filter_map(|row| row.document)
            .filter_map(Document::into_entry)
            .collect();
        entries.truncate(MAX_LIST_ENTRIES);
        Ok(entries)
    }

    async fn delete(&self, email: &EmailAddress) -> Result<DeleteOutcome, StoreError> {
        let mut url = self.document_url(email.as_str());
        url.query_pairs_mut().append_pair("currentDocument.exists", "true");

        let res = self.send(self.client.delete(url)).await?;
        if res.status().is_success() {
            return Ok(DeleteOutcome { removed: 1 });
        }

        let (status, body) = read_error(res).await;
        if status == StatusCode::NOT_FOUND || body.status == "NOT_FOUND" || body.status == "FAILED_PRECONDITION" {
            return Ok(DeleteOutcome { removed: 0 });
        }
        Err(StoreError::unavailable(
            BACKEND,
            format!("delete returned {status} {}: {}", body.status, body.message),
        ))
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}

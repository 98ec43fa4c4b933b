use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;
use crate::store::{DEFAULT_COLLECTION, DEFAULT_DATABASE, FirestoreSettings, FirestoreTarget};

// CLI argument structure, every option can also come from the environment
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "waitlist-gateway")]
#[command(about = "Rate-limited email waitlist API with admin export")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Shared secret expected in the x-admin-code header
    #[arg(long, env = "ADMIN_ACCESS_CODE", hide_env_values = true)]
    pub admin_code: Option<String>,

    // Firestore service account
    #[arg(long, env = "WAITLIST_FIREBASE_PROJECT_ID")]
    pub firestore_project_id: Option<String>,

    #[arg(long, env = "WAITLIST_FIREBASE_CLIENT_EMAIL")]
    pub firestore_client_email: Option<String>,

    #[arg(long, env = "WAITLIST_FIREBASE_PRIVATE_KEY", hide_env_values = true)]
    pub firestore_private_key: Option<String>,

    // Named Firestore database, "(default)" when unset
    #[arg(long, env = "WAITLIST_FIREBASE_DATABASE_ID")]
    pub firestore_database: Option<String>,

    // host:port of a Firestore emulator; skips OAuth entirely
    #[arg(long, env = "FIRESTORE_EMULATOR_HOST")]
    pub firestore_emulator_host: Option<String>,

    // JSON file used when Firestore is not configured
    #[arg(long, env = "WAITLIST_FILE")]
    pub waitlist_file: Option<PathBuf>,

    // Public submissions allowed per window per client
    #[arg(long, default_value_t = 8)]
    pub public_rate_limit: u32,

    // Public rate limit window in seconds
    #[arg(long, default_value_t = 60)]
    pub public_rate_window: u64,

    // Admin requests allowed per window per client
    #[arg(long, default_value_t = 20)]
    pub admin_rate_limit: u32,

    // Admin rate limit window in seconds
    #[arg(long, default_value_t = 300)]
    pub admin_rate_window: u64,

    // Sweep expired rate limit keys every N seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    pub rate_sweep_secs: u64,

    // Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl Args {
    pub fn public_rate(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.public_rate_limit, Duration::from_secs(self.public_rate_window))
    }

    pub fn admin_rate(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.admin_rate_limit, Duration::from_secs(self.admin_rate_window))
    }

    pub fn admin_secret(&self) -> Option<String> {
        // the secret is compared verbatim, so only reject the empty string
        self.admin_code.clone().filter(|code| !code.is_empty())
    }

    // Firestore is usable with a full service account, or an emulator + project id
    pub fn firestore_settings(&self) -> Option<FirestoreSettings> {
        let project_id = non_empty(&self.firestore_project_id)?;
        let database_id = non_empty(&self.firestore_database).unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let target = if let Some(host) = non_empty(&self.firestore_emulator_host) {
            FirestoreTarget::Emulator { host }
        } else {
            FirestoreTarget::Cloud {
                client_email: non_empty(&self.firestore_client_email)?,
                private_key: non_empty(&self.firestore_private_key)?,
            }
        };

        Some(FirestoreSettings {
            project_id,
            database_id,
            collection: DEFAULT_COLLECTION.to_string(),
            target,
        })
    }

    pub fn has_partial_firestore_settings(&self) -> bool {
        [
            &self.firestore_project_id,
            &self.firestore_client_email,
            &self.firestore_private_key,
        ]
        .into_iter()
        .any(|v| non_empty(v).is_some())
    }
}

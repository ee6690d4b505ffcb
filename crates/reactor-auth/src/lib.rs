//! Google OAuth access tokens for the Firestore and Vertex AI clients.
//!
//! Three sources, picked once at startup:
//! - an access token supplied directly (e.g. `gcloud auth print-access-token`)
//! - a service-account key file, exchanged via a signed RS256 JWT
//! - the metadata server of the Google runtime the process is hosted on

mod metadata;
mod service_account;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

pub use metadata::MetadataServer;
pub use service_account::{ServiceAccount, ServiceAccountKey};

/// OAuth scope covering both Firestore and Vertex AI.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("signing JWT failed")]
    Signing,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A bearer token valid for at least the next minute.
    async fn token(&self) -> Result<String, AuthError>;

    /// Project the credentials belong to, when the source knows it.
    async fn project_id(&self) -> Option<String> {
        None
    }
}

/// A fixed token; never refreshed.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// Where credentials come from, in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    AccessToken(String),
    KeyFile(PathBuf),
    MetadataServer,
}

impl CredentialSource {
    pub fn pick(access_token: Option<String>, key_file: Option<PathBuf>) -> Self {
        match (access_token, key_file) {
            (Some(token), _) => CredentialSource::AccessToken(token),
            (None, Some(path)) => CredentialSource::KeyFile(path),
            (None, None) => CredentialSource::MetadataServer,
        }
    }

    /// Build the token source, reading key material if needed.
    pub async fn load(self) -> Result<Arc<dyn TokenSource>, AuthError> {
        match self {
            CredentialSource::AccessToken(token) => {
                info!("using supplied access token");
                Ok(Arc::new(StaticToken::new(token)))
            }
            CredentialSource::KeyFile(path) => {
                info!(path = %path.display(), "loading service account key");
                Ok(Arc::new(ServiceAccount::from_file(&path).await?))
            }
            CredentialSource::MetadataServer => {
                info!("using metadata server credentials");
                Ok(Arc::new(MetadataServer::new()))
            }
        }
    }
}

/// OAuth token endpoint response (shared by the JWT grant and the metadata server).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct Cached {
    token: String,
    refresh_at: Instant,
}

/// Single-slot token cache; concurrent callers wait on one refresh.
#[derive(Default)]
struct TokenCache {
    slot: Mutex<Option<Cached>>,
}

impl TokenCache {
    async fn get_or_refresh<F>(&self, fetch: F) -> Result<String, AuthError>
    where
        F: Future<Output = Result<TokenResponse, AuthError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.token.clone());
            }
        }

        let fresh = fetch.await?;
        let lifetime = Duration::from_secs(fresh.expires_in.unwrap_or(3600));
        *slot = Some(Cached {
            token: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        });
        Ok(fresh.access_token)
    }
}

async fn read_token_response(resp: reqwest::Response) -> Result<TokenResponse, AuthError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthError::Server {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

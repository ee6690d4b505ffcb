//! Credentials of the Google runtime (Cloud Run, Cloud Functions, GCE) via its metadata server.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{AuthError, TokenCache, TokenSource, read_token_response};

const METADATA_BASE_URL: &str = "http://metadata.google.internal";
const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const PROJECT_ID_PATH: &str = "/computeMetadata/v1/project/project-id";

pub struct MetadataServer {
    client: reqwest::Client,
    base_url: String,
    cache: TokenCache,
}

impl Default for MetadataServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataServer {
    pub fn new() -> Self {
        Self::with_base_url(METADATA_BASE_URL.to_string())
    }

    /// Point at a different metadata endpoint (no trailing slash).
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: TokenCache::default(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header("Metadata-Flavor", "Google")
    }
}

#[async_trait]
impl TokenSource for MetadataServer {
    async fn token(&self) -> Result<String, AuthError> {
        self.cache
            .get_or_refresh(async {
                debug!(base_url = %self.base_url, "fetching token from metadata server");
                let resp = self.get(TOKEN_PATH).send().await?;
                read_token_response(resp).await
            })
            .await
    }

    async fn project_id(&self) -> Option<String> {
        let resp = match self.get(PROJECT_ID_PATH).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "metadata server refused project id");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "metadata server unreachable");
                return None;
            }
        };
        let id = resp.text().await.ok()?;
        let id = id.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

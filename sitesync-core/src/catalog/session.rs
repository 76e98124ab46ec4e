use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;
use zeroize::Zeroizing;

use crate::config::CatalogSettings;

const TOKEN_PATH: &str = "auth/token";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("catalog rejected credentials (HTTP {status})")]
    Rejected { status: u16 },

    #[error("malformed token response: {0}")]
    Malformed(String),

    #[error("invalid catalog URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Authenticated handle for the catalog API, obtained once per run with
/// the OAuth2 password grant.
pub struct CatalogSession {
    access_token: Zeroizing<String>,
    token_type: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CatalogSession {
    pub async fn establish(
        client: &Client,
        settings: &CatalogSettings,
    ) -> Result<Self, SessionError> {
        let token_url = endpoint(&settings.url, TOKEN_PATH)?;
        info!(target: "sync::catalog", url = %token_url, username = %settings.username, "establishing catalog session");

        let form = [
            ("grant_type", "password"),
            ("username", settings.username.as_str()),
            ("password", settings.password.as_str()),
        ];
        let response = client.post(token_url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Rejected {
                status: status.as_u16(),
            });
        }

        let body = Zeroizing::new(response.text().await?);
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| SessionError::Malformed(err.to_string()))?;
        if token.access_token.trim().is_empty() {
            return Err(SessionError::Malformed("empty access_token".into()));
        }

        let expires_at = token
            .expires_in
            .and_then(ChronoDuration::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        debug!(target: "sync::catalog", ?expires_at, "catalog session established");

        Ok(Self {
            access_token: Zeroizing::new(token.access_token),
            token_type: token.token_type.unwrap_or_else(|| "Bearer".into()),
            expires_at,
        })
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{} {}", self.token_type, self.access_token.as_str()))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

impl fmt::Debug for CatalogSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogSession")
            .field("token_type", &self.token_type)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Joins `path` under `base`, keeping any path prefix the base already has.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
}

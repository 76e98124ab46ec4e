use std::{fmt, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, header};
use tracing::{debug, warn};
use url::Url;

use super::{
    CatalogFetcher, FetchError,
    model::{Page, WebsitesResponse},
    session::{CatalogSession, SessionError, endpoint},
};
use crate::config::CatalogSettings;

const WEBSITES_PATH: &str = "system/websites";
const PUBLIC_KEY_HEADER: &str = "X-Public-Key";
const MAX_ERROR_BODY: usize = 512;

/// Catalog client speaking JSON over HTTP with a bearer session.
pub struct HttpCatalogClient {
    client: Client,
    base_url: Url,
    session: CatalogSession,
}

impl fmt::Debug for HttpCatalogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCatalogClient")
            .field("base_url", &self.base_url.as_str())
            .field("session", &self.session)
            .finish()
    }
}

impl HttpCatalogClient {
    /// Builds the HTTP client and authenticates. Failure here is fatal to
    /// the run.
    pub async fn connect(
        settings: &CatalogSettings,
        request_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("sitesync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let session = CatalogSession::establish(&client, settings).await?;

        Ok(Self::with_session(client, settings.url.clone(), session))
    }

    pub fn with_session(
        client: Client,
        base_url: Url,
        session: CatalogSession,
    ) -> Self {
        Self {
            client,
            base_url,
            session,
        }
    }
}

#[async_trait]
impl CatalogFetcher for HttpCatalogClient {
    async fn fetch_page(
        &self,
        public_key_pem: &str,
        page: u32,
    ) -> Result<Page, FetchError> {
        if self.session.is_expired() {
            warn!(target: "sync::catalog", page, "catalog session token has expired; request will likely be rejected");
        }

        let url = endpoint(&self.base_url, WEBSITES_PATH)?;
        let authorization = self.session.authorization();

        let response = self
            .client
            .get(url)
            .query(&[("page", page)])
            .header(header::AUTHORIZATION, authorization.as_str())
            .header(header::ACCEPT, "application/json")
            .header(PUBLIC_KEY_HEADER, STANDARD.encode(public_key_pem))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let decoded: WebsitesResponse = serde_json::from_str(&body)
            .map_err(|err| FetchError::Decode(err.to_string()))?;
        let page = decoded.into_page(page);
        debug!(
            target: "sync::catalog",
            page = page.page_number,
            total_pages = page.total_pages,
            records = page.records.len(),
            "catalog page received"
        );

        Ok(page)
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

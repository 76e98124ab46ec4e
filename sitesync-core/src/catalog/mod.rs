//! Read-only access to the remote website catalog.

pub mod http;
pub mod model;
pub mod session;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpCatalogClient;
pub use model::{Page, Pagination, Record, RecordId, WebsitesResponse};
pub use session::{CatalogSession, SessionError};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("catalog returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed catalog response: {0}")]
    Decode(String),

    #[error("invalid catalog URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("page request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("page request cancelled")]
    Cancelled,
}

/// Paged source of website records.
///
/// Implementations must tolerate being called with increasing page numbers
/// and must not mutate anything on the remote side.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        public_key_pem: &str,
        page: u32,
    ) -> Result<Page, FetchError>;
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Catalog identifier of a website record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One website entry. The credential arrives sealed with the run's public key.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub url: String,
    #[serde(rename = "token")]
    pub encrypted_credential: String,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("encrypted_credential_len", &self.encrypted_credential.len())
            .finish()
    }
}

/// A fetched page plus what the catalog told us about the total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<Record>,
    pub page_number: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    pub total_pages: u32,
    #[serde(default)]
    pub total_items: Option<u64>,
}

/// Wire shape of `GET /system/websites`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebsitesResponse {
    #[serde(default)]
    pub data: Vec<Record>,
    pub pagination: Pagination,
}

impl WebsitesResponse {
    pub fn into_page(self, requested_page: u32) -> Page {
        Page {
            records: self.data,
            page_number: requested_page,
            total_pages: self.pagination.total_pages,
        }
    }
}

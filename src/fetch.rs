//! Page fetching from the backend's paged read API.
//!
//! One endpoint family per dataset kind:
//!
//! ```text
//! GET /jobs/{jobId}/matches?page={n}&size={s}      -> { matches: Match[], total, totalPages }
//! GET /jobs/{jobId}/bo-only?page={n}&size={s}      -> { boOnly: Record[], total, totalPages }
//! GET /jobs/{jobId}/mismatches?page={n}&size={s}   -> { mismatches: Record[], total, totalPages }
//! GET /jobs/{jobId}/partner-only?page={n}&size={s} -> { partnerOnly: Record[], total, totalPages }
//! ```

use crate::config::BackendConfig;
use crate::errors::LoadError;
use crate::model::{DatasetKind, Page, Row};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Source of dataset pages. No retries happen at this layer.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        job_id: &str,
        kind: DatasetKind,
        page_index: usize,
        page_size: usize,
    ) -> Result<Page, LoadError>;
}

/// [`PageFetcher`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
    base_url: Url,
}

impl HttpPageFetcher {
    pub fn new(config: &BackendConfig) -> Result<Self, LoadError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|err| LoadError::Network(format!("invalid backend url '{}': {err}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(LoadError::Network(format!(
                "backend url '{}' cannot carry a path",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| LoadError::Network(err.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn page_url(&self, job_id: &str, kind: DatasetKind, page_index: usize, page_size: usize) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["jobs", job_id, kind.path_segment()]);
        }
        url.query_pairs_mut()
            .append_pair("page", &page_index.to_string())
            .append_pair("size", &page_size.to_string());
        url
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(
        &self,
        job_id: &str,
        kind: DatasetKind,
        page_index: usize,
        page_size: usize,
    ) -> Result<Page, LoadError> {
        let url = self.page_url(job_id, kind, page_index, page_size);
        debug!(%url, %kind, page = page_index, "fetching page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| LoadError::Network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoadError::Server {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| LoadError::Network(err.to_string()))?;
        decode_page(kind, page_index, page_size, &bytes)
    }
}

/// Decode one endpoint payload.
///
/// `total` is required; a missing `totalPages` is derived from `total` and the
/// requested page size.
pub fn decode_page(
    kind: DatasetKind,
    page_index: usize,
    page_size: usize,
    body: &[u8],
) -> Result<Page, LoadError> {
    let mut payload: Value = serde_json::from_slice(body)?;
    let object = payload
        .as_object_mut()
        .ok_or_else(|| LoadError::parse("page payload is not an object"))?;

    let total_items = object
        .get("total")
        .and_then(Value::as_u64)
        .ok_or_else(|| LoadError::parse("page payload is missing 'total'"))? as usize;
    let total_pages = match object.get("totalPages") {
        Some(value) => value
            .as_u64()
            .ok_or_else(|| LoadError::parse("'totalPages' is not a non-negative integer"))?
            as usize,
        None => total_items.div_ceil(page_size.max(1)),
    };

    let raw_items = match object.remove(kind.payload_field()) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None if total_items == 0 => Vec::new(),
        Some(_) => {
            return Err(LoadError::parse(format!(
                "'{}' is not an array",
                kind.payload_field()
            )))
        }
        None => {
            return Err(LoadError::parse(format!(
                "page payload is missing '{}'",
                kind.payload_field()
            )))
        }
    };

    let items = raw_items
        .into_iter()
        .map(|item| Row::from_json(kind, item))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total_items,
        total_pages,
        page_index,
    })
}

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;

use super::BulkClient;
use crate::config::ElasticsearchConfig;
use crate::document::{BulkEntry, to_ndjson};
use crate::error::{ReporterError, Result};

const NDJSON: &str = "application/x-ndjson";

/// Summary part of a `_bulk` response
#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    took: u64,
}

/// Bulk client talking to an Elasticsearch cluster over HTTP
pub struct ElasticsearchClient {
    client: Client,
    config: ElasticsearchConfig,
    base_url: String,
}

impl ElasticsearchClient {
    /// Create a new client for the configured cluster
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ReporterError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = config.url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ReporterError::Config("elasticsearch url must not be empty".to_string()).into());
        }

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(username) => request.basic_auth(username, self.config.password.as_ref()),
            None => request,
        }
    }
}

#[async_trait]
impl BulkClient for ElasticsearchClient {
    async fn ping(&self, timeout: Option<Duration>) -> Result<()> {
        let mut request = self.authorize(self.client.head(format!("{}/", self.base_url)));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ReporterError::Connection(format!("Ping to {} failed: {}", self.base_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReporterError::Connection(format!(
                "Ping to {} returned {}",
                self.base_url, status
            ))
            .into());
        }

        trace!("Ping to {} succeeded", self.base_url);
        Ok(())
    }

    async fn bulk(&self, entries: &[BulkEntry]) -> Result<()> {
        // the _bulk endpoint rejects an empty body
        if entries.is_empty() {
            debug!("No documents to send to {}", self.base_url);
            return Ok(());
        }

        let body = to_ndjson(entries)?;
        let response = self
            .authorize(self.client.post(format!("{}/_bulk", self.base_url)))
            .header(CONTENT_TYPE, NDJSON)
            .body(body)
            .send()
            .await
            .map_err(|e| ReporterError::Bulk(format!("Bulk request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReporterError::Bulk(format!("Bulk request returned {}: {}", status, text)).into());
        }

        let summary: BulkResponse = response
            .json()
            .await
            .map_err(|e| ReporterError::Bulk(format!("Unreadable bulk response: {}", e)))?;

        if summary.errors {
            return Err(ReporterError::Bulk(format!(
                "Bulk request to {} had item errors",
                self.base_url
            ))
            .into());
        }

        debug!(
            "Indexed {} documents in {} ms",
            entries.len(),
            summary.took
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

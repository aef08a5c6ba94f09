//! HTTP transport against a ChronicleSync server.
//!
//! Wire contract (JSON, camelCase):
//! - `POST {endpoint}/history?clientId=..` with `{"entries": [...]}`,
//!   answered by `{"results": [{"visitId", "version", "accepted"}]}`
//! - `GET {endpoint}/history?clientId=..&since=..`,
//!   answered by `{"entries": [...], "cursor": n}`

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{PullBatch, PushAck, SyncTransport};
use async_trait::async_trait;
use chronicle_storage::HistoryEntry;
use chronicle_types::ClientId;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct PushRequest<'a> {
    entries: &'a [HistoryEntry],
}

#[derive(Deserialize)]
struct PushResponse {
    results: Vec<PushAck>,
}

/// [`SyncTransport`] speaking JSON over HTTP.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    client_id: ClientId,
}

impl HttpTransport {
    pub fn new(endpoint: &str, client_id: ClientId, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client_id,
        })
    }

    /// Builds a transport from `config.endpoint` and `config.request_timeout_secs`.
    pub fn from_config(config: &SyncConfig, client_id: ClientId) -> SyncResult<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| SyncError::Config("HTTP transport requires an endpoint".into()))?;
        Self::new(endpoint, client_id, config.request_timeout())
    }

    fn history_url(&self) -> String {
        format!("{}/history", self.endpoint)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(&self, entries: &[HistoryEntry]) -> SyncResult<Vec<PushAck>> {
        let resp = self
            .client
            .post(self.history_url())
            .query(&[("clientId", self.client_id.as_str())])
            .json(&PushRequest { entries })
            .send()
            .await?;
        let body: PushResponse = ensure_success(resp)?.json().await?;
        debug!("pushed {} entries, {} acks", entries.len(), body.results.len());
        Ok(body.results)
    }

    async fn pull(&self, since: Option<i64>) -> SyncResult<PullBatch> {
        let mut req = self
            .client
            .get(self.history_url())
            .query(&[("clientId", self.client_id.as_str())]);
        if let Some(since) = since {
            req = req.query(&[("since", since)]);
        }
        let batch: PullBatch = ensure_success(req.send().await?)?.json().await?;
        debug!("pulled {} entries (cursor {:?})", batch.entries.len(), batch.cursor);
        Ok(batch)
    }
}

fn ensure_success(resp: Response) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(SyncError::Status {
            code: status.as_u16(),
        })
    }
}

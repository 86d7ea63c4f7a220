//! HTTP central-store client.
//!
//! Talks to the central deployment's replication API. Every call carries an
//! explicit timeout; connection failures and timeouts surface as transient
//! errors so the retry policy can distinguish them from data problems.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{MetricsSnapshot, OperationType, Payload};
use crate::registry::Table;
use crate::store::{CentralStore, ChangedRecord};

/// Central replication API client.
pub struct HttpCentralStore {
    client: reqwest::Client,
    base_url: String,
    op_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ApplyRequest<'a> {
    record_id: &'a str,
    payload: &'a Payload,
}

#[derive(Debug, Deserialize)]
struct ChangedResponse {
    records: Vec<ChangedRecord>,
}

impl HttpCentralStore {
    /// Create a client for the replication API at `base_url`.
    #[must_use]
    pub fn new(base_url: String, op_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            op_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // 4xx means the payload or request shape is wrong; retrying the
        // same write cannot succeed.
        if status.is_client_error() {
            Err(Error::InvalidPayload {
                table: String::new(),
                message: format!("central rejected request ({status}): {body}"),
            })
        } else {
            Err(Error::CentralUnreachable(format!("{status}: {body}")))
        }
    }
}

#[async_trait]
impl CentralStore for HttpCentralStore {
    async fn probe(&self, timeout: Duration) -> Result<Duration> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.url("/health/ping"))
            .timeout(timeout)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(started.elapsed())
    }

    async fn changed_since(
        &self,
        table: Table,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>> {
        let response = self
            .client
            .get(self.url(&format!("/sync/{table}/changes")))
            .query(&[
                ("since", since.timestamp_millis().to_string()),
                ("limit", limit.to_string()),
            ])
            .timeout(self.op_timeout)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let data: ChangedResponse = response.json().await?;
        Ok(data.records)
    }

    async fn apply(
        &self,
        table: Table,
        op: OperationType,
        record_id: &str,
        payload: &Payload,
    ) -> Result<()> {
        let body = ApplyRequest { record_id, payload };
        let url = self.url(&format!("/sync/{table}/records/{record_id}"));
        let request = match op {
            OperationType::Create => self.client.post(self.url(&format!("/sync/{table}/records"))),
            OperationType::Update => self.client.put(url),
            OperationType::Delete => self.client.delete(url),
        };
        let response = request
            .json(&body)
            .timeout(self.op_timeout)
            .send()
            .await?;
        Self::check_status(response).await.map_err(|e| match e {
            Error::InvalidPayload { message, .. } => Error::InvalidPayload {
                table: table.name().to_string(),
                message,
            },
            other => other,
        })?;
        Ok(())
    }

    async fn sample_metrics(&self) -> Result<MetricsSnapshot> {
        let response = self
            .client
            .get(self.url("/health/metrics"))
            .timeout(self.op_timeout)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }
}

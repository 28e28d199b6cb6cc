use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::debug;

use crate::RemoteSync;
use crate::error::RemoteError;
use crate::payload::{
    BatchUpdateRequest, RemoteSnapshot, StatusUpdate, UpdateStatusRequest, decode_ack,
    decode_all_data,
};

/// The web app parses the raw POST body itself; JSON is sent as plain text.
const POST_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

/// HTTP client for the spreadsheet web app.
#[derive(Debug, Clone)]
pub struct SheetsClient {
    client: reqwest::Client,
    base_url: String,
}

impl SheetsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, action: &str) -> Result<String, RemoteError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("action", action)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Http(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    async fn post<T: Serialize + ?Sized>(&self, body: &T) -> Result<(), RemoteError> {
        let body = serde_json::to_string(body).map_err(RemoteError::Encode)?;
        let response = self
            .client
            .post(&self.base_url)
            .header(CONTENT_TYPE, POST_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Http(status.as_u16()));
        }
        decode_ack(&response.text().await?)
    }
}

#[async_trait]
impl RemoteSync for SheetsClient {
    async fn ping(&self) -> Result<(), RemoteError> {
        let body = self.get("ping").await?;
        decode_ack(&body)
    }

    async fn fetch_all(&self) -> Result<RemoteSnapshot, RemoteError> {
        let body = self.get("getAllData").await?;
        let snapshot = decode_all_data(&body)?;
        debug!(pages = snapshot.pages.len(), "fetched remote snapshot");
        Ok(snapshot)
    }

    async fn update_status(
        &self,
        page_key: &str,
        sheet: &str,
        update: &StatusUpdate,
    ) -> Result<(), RemoteError> {
        self.post(&UpdateStatusRequest {
            action: "updateStatus",
            page: page_key,
            sheet,
            update,
        })
        .await
    }

    async fn batch_update(
        &self,
        page_key: &str,
        sheet: &str,
        updates: &[StatusUpdate],
    ) -> Result<(), RemoteError> {
        self.post(&BatchUpdateRequest {
            action: "batchUpdate",
            page: page_key,
            sheet,
            updates,
        })
        .await
    }
}

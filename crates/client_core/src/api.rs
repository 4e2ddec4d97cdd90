use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mime_guess::mime;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use shared::{
    domain::{PeerRecord, UserId},
    protocol::{HistoryRecord, UploadResponse},
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    attachment::FileUpload,
    error::{ApiError, UploadError},
};

/// REST collaborators of the messaging core.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_peers(&self, self_id: &UserId) -> Result<Vec<PeerRecord>, ApiError>;
    async fn fetch_history(
        &self,
        self_id: &UserId,
        peer_id: &UserId,
    ) -> Result<Vec<HistoryRecord>, ApiError>;
    async fn upload(&self, file: FileUpload) -> Result<UploadResponse, UploadError>;
}

pub struct HttpChatApi {
    http: Client,
    base: Url,
}

impl HttpChatApi {
    pub fn new(server_url: &str) -> Result<Self> {
        let base = Url::parse(server_url.trim())
            .with_context(|| format!("invalid server url: {server_url}"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("server url cannot carry a path: {server_url}"));
        }
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_peers(&self, self_id: &UserId) -> Result<Vec<PeerRecord>, ApiError> {
        let url = self.endpoint(&["users", self_id.as_str()])?;
        let peers: Vec<PeerRecord> = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(count = peers.len(), "api: peers fetched");
        Ok(peers)
    }

    async fn fetch_history(
        &self,
        self_id: &UserId,
        peer_id: &UserId,
    ) -> Result<Vec<HistoryRecord>, ApiError> {
        let url = self.endpoint(&["messages", self_id.as_str(), peer_id.as_str()])?;
        let records: Vec<HistoryRecord> = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(peer_id = %peer_id, count = records.len(), "api: history fetched");
        Ok(records)
    }

    async fn upload(&self, file: FileUpload) -> Result<UploadResponse, UploadError> {
        let url = self
            .endpoint(&["api", "upload"])
            .map_err(|err| UploadError::Network(err.to_string()))?;
        let content_type = file
            .mime_type
            .parse::<mime::Mime>()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name.clone())
            .mime_str(content_type.as_ref())?;

        let response = self
            .http
            .post(url)
            .multipart(Form::new().part("file", part))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            warn!(file_name = %file.file_name, status = status.as_u16(), "api: upload rejected");
            return Err(UploadError::Status {
                status: status.as_u16(),
            });
        }
        response
            .json::<UploadResponse>()
            .await
            .map_err(|err| UploadError::InvalidResponse(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;

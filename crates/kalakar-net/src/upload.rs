//! Signed-URL upload exchange.
//!
//! The backend hands out a short-lived upload URL for a file; the bytes are
//! then PUT straight to object storage and the public URL is returned.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::{Fetcher, NetError, Request};

const UPLOAD_URL_PATH: &str = "api/upload-url";

/// Upload client configuration.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Backend base URL, e.g. `https://chitrakalakar.com/`.
    pub backend_url: Url,
    /// Bearer token of the signed-in user.
    pub access_token: Option<String>,
}

/// A file to upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Serialize)]
struct UploadUrlRequest<'a> {
    filename: &'a str,
    content_type: &'a str,
    folder: &'a str,
}

/// Signed upload destination returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub upload_url: Url,
    pub public_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// Client for the signed-URL upload flow.
pub struct UploadClient {
    fetcher: Arc<dyn Fetcher>,
    config: UploadConfig,
}

impl UploadClient {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: UploadConfig) -> Self {
        Self { fetcher, config }
    }

    /// Ask the backend for a signed upload URL.
    pub async fn request_ticket(
        &self,
        file: &UploadFile,
        folder: &str,
    ) -> Result<UploadTicket, NetError> {
        let token = self
            .config
            .access_token
            .as_deref()
            .ok_or(NetError::NotAuthenticated)?;

        let endpoint = upload_endpoint(&self.config.backend_url)?;

        let payload = serde_json::to_vec(&UploadUrlRequest {
            filename: &file.name,
            content_type: &file.content_type,
            folder,
        })
        .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        let bearer = HeaderValue::try_from(format!("Bearer {token}"))
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        let request = Request::post(endpoint, Bytes::from(payload))
            .header(AUTHORIZATION, bearer)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self.fetcher.fetch(request).await?;

        if !response.ok() {
            let detail = response
                .json::<ErrorBody>()
                .ok()
                .and_then(|body| body.detail)
                .unwrap_or_else(|| "Upload URL request failed".to_string());
            warn!(status = %response.status, %detail, "Upload URL request rejected");
            return Err(NetError::UploadFailed(detail));
        }

        response.json()
    }

    /// Upload a file and return its public URL.
    pub async fn upload(&self, file: &UploadFile, folder: &str) -> Result<String, NetError> {
        let ticket = self.request_ticket(file, folder).await?;
        debug!(file = %file.name, folder, "Received signed upload URL");

        let content_type = HeaderValue::try_from(file.content_type.as_str())
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        let request = Request::put(ticket.upload_url.clone(), file.bytes.clone())
            .header(CONTENT_TYPE, content_type);

        let response = self.fetcher.fetch(request).await?;
        if !response.ok() {
            return Err(NetError::UploadFailed(format!(
                "storage rejected upload with status {}",
                response.status
            )));
        }

        info!(file = %file.name, public_url = %ticket.public_url, "Upload complete");
        Ok(ticket.public_url)
    }
}

/// `<backend>/api/upload-url`, keeping any path the backend URL carries.
fn upload_endpoint(backend: &Url) -> Result<Url, NetError> {
    let mut base = backend.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(UPLOAD_URL_PATH)
        .map_err(|e| NetError::InvalidUrl(e.to_string()))
}

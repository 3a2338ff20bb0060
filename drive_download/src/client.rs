//! Google Drive API client.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::auth::AuthorizedClient;
use crate::error::{DriveError, Result};
use crate::models::{ApiErrorResponse, FileListResponse};

/// Base URL for Google Drive API v3.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Fields requested from files.list; only what the downloader consumes.
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType)";

/// The two Drive operations the downloader depends on.
#[async_trait]
pub trait DriveService: Send + Sync {
    /// Fetch one page of the file listing.
    async fn list_page(&self, page_token: Option<&str>, page_size: u32)
        -> Result<FileListResponse>;

    /// Stream a file's binary content into `sink`, returning the bytes written.
    async fn download_content(
        &self,
        file_id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;
}

/// Drive v3 REST client.
pub struct DriveClient {
    auth: AuthorizedClient,
    http: Client,
    base_url: String,
}

impl DriveClient {
    pub fn new(auth: AuthorizedClient) -> Self {
        Self::with_base_url(auth, DRIVE_API_BASE)
    }

    /// Point the client at another API root (used by tests).
    pub fn with_base_url(auth: AuthorizedClient, base_url: impl Into<String>) -> Self {
        Self {
            auth,
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DriveService for DriveClient {
    async fn list_page(
        &self,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FileListResponse> {
        let page_size = page_size.to_string();
        let mut request = self
            .auth
            .authorize(self.http.get(format!("{}/files", self.base_url)))
            .query(&[("pageSize", page_size.as_str()), ("fields", LIST_FIELDS)]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = check_status(request.send().await?).await?;
        let page: FileListResponse = response.json().await?;
        Ok(page)
    }

    async fn download_content(
        &self,
        file_id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let response = self
            .auth
            .authorize(self.http.get(format!("{}/files/{}", self.base_url, file_id)))
            .query(&[("alt", "media")])
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
            debug!(file_id, written, "received chunk");
        }
        sink.flush().await?;

        Ok(written)
    }
}

/// Turn a non-2xx response into `DriveError::Api`, preferring Google's error envelope.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
        return Err(DriveError::Api {
            status: api_error.error.code,
            message: api_error.error.message,
        });
    }
    Err(DriveError::Api {
        status: status.as_u16(),
        message: error_body,
    })
}

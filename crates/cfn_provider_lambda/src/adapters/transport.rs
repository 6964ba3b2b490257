use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One PUT against the pre-signed callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRequest {
    pub url: String,
    pub body: String,
}

impl CallbackRequest {
    pub fn content_length(&self) -> usize {
        self.body.len()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("callback request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unsuccessful HTTP response: {0}")]
    Status(u16),
}

#[async_trait]
pub trait ResponseTransport: Send + Sync {
    async fn put(&self, request: &CallbackRequest) -> Result<(), TransportError>;
}

/// Callback transport backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ResponseTransport for ReqwestTransport {
    async fn put(&self, request: &CallbackRequest) -> Result<(), TransportError> {
        // S3 signs the pre-signed URL without a content type, so the header
        // must be present and empty.
        let response = self
            .client
            .put(&request.url)
            .header(CONTENT_TYPE, "")
            .header(CONTENT_LENGTH, request.content_length())
            .body(request.body.clone())
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

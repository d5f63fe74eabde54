//! Download private keys referenced by URL

use std::time::Duration;

use reqwest::{Client, Url};

use sg_core::error::ConnectionError;

/// Fetches key material over HTTP(S) with a time and size bound
#[derive(Clone)]
pub struct KeyFetcher {
    client: Client,
    max_bytes: usize,
}

impl KeyFetcher {
    /// Create a fetcher; `timeout` covers the whole request
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, ConnectionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectionError::KeyFetch(e.to_string()))?;
        Ok(Self { client, max_bytes })
    }

    /// Download the key at `url`
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, ConnectionError> {
        let url = Url::parse(url).map_err(|e| ConnectionError::KeyFetch(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConnectionError::KeyFetch(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }

        tracing::debug!("Fetching private key from {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ConnectionError::KeyFetch(e.to_string()))?;

        if let Some(len) = response.content_length() {
            if len > self.max_bytes as u64 {
                return Err(self.too_large());
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ConnectionError::KeyFetch(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large());
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(ConnectionError::KeyFetch("empty response".into()));
        }

        tracing::trace!("Fetched {} bytes of key material", body.len());
        Ok(body)
    }

    fn too_large(&self) -> ConnectionError {
        ConnectionError::KeyFetch(format!("key exceeds {} bytes", self.max_bytes))
    }
}

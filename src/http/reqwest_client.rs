//! Reqwest-based blocking HTTP client.

use std::time::Duration;

use super::{HttpClient, HttpMethod, HttpRequest, HttpResponse, TransportError};

/// Simple blocking HTTP client implementation using reqwest.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Create a new ReqwestClient with default settings.
    ///
    /// Default timeout: 30 seconds
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new ReqwestClient with custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::with_source("failed to build HTTP client", e))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post { body, content_type } => {
                let builder = self.client.post(&request.url).body(body);
                match content_type {
                    Some(content_type) => builder.header("Content-Type", content_type),
                    None => builder,
                }
            }
        };
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .map_err(|e| TransportError::with_source("request failed", e.without_url()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| {
                TransportError::with_source("failed to read response body", e.without_url())
            })?
            .to_vec();

        Ok(HttpResponse { status, body })
    }
}

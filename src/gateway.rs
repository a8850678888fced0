//! Request plumbing shared by every endpoint: URL resolution, JSON and XML
//! bodies, cancellation checks around each call and decoding of the
//! Service's error envelope.
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::CancellationToken;
use crate::error::{ApiError, Error, Result};
use crate::http::{HttpClient, HttpRequest, HttpResponse};

pub const JSON: &str = "application/json";
pub const XML: &str = "application/xml";

/// Header carrying the cursor of continuation-token listings.
pub const CONTINUATION_HEADER: &str = "x-continuation-token";

#[derive(Clone)]
pub struct Gateway {
    base_url: String,
    http: Arc<dyn HttpClient>,
    cancel: CancellationToken,
}

impl Gateway {
    pub fn new(
        base_url: impl Into<String>,
        http: Arc<dyn HttpClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            cancel,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// `path` must start with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> HttpRequest {
        HttpRequest::get(self.url(path)).with_header("Accept", JSON)
    }

    /// POST without a body.
    pub fn post(&self, path: &str) -> HttpRequest {
        HttpRequest::post(self.url(path), Vec::new(), None).with_header("Accept", JSON)
    }

    pub fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<HttpRequest> {
        let url = self.url(path);
        let body = serde_json::to_vec(body).map_err(|e| {
            Error::Protocol(format!("cannot encode request for {}: {e}", without_query(&url)))
        })?;
        Ok(HttpRequest::post(url, body, Some(JSON)).with_header("Accept", JSON))
    }

    pub fn post_xml(&self, path: &str, body: Vec<u8>) -> HttpRequest {
        HttpRequest::post(self.url(path), body, Some(XML)).with_header("Accept", JSON)
    }

    /// Perform one call. Non-success statuses become [`Error::Api`].
    pub fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.cancel.check()?;
        let method = request.method_name();
        let url = without_query(&request.url).to_string();

        let response = self
            .http
            .request(request)
            .map_err(|source| Error::Transport {
                url: url.clone(),
                source,
            })?;
        tracing::debug!(method, url = %url, status = response.status, "ksef call");

        self.cancel.check()?;
        if !response.is_success() {
            return Err(ApiError::from_response(response.status, &response.body).into());
        }
        Ok(response)
    }

    pub fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        let url = without_query(&request.url).to_string();
        let response = self.send(request)?;
        decode(&url, &response.body)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// `url` up to its query or fragment, which may hold a pre-signed credential.
pub fn without_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

pub fn decode<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| Error::Decode {
        url: url.to_string(),
        source,
    })
}

//! HTTP seam between the protocol engine and the network.
//!
//! The engine only ever talks to the Service through [`HttpClient`], so
//! tests can script responses and callers can bring their own transport.

mod reqwest_client;

pub use reqwest_client::ReqwestClient;

/// HTTP request to be sent by an HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// The HTTP method and optional body.
    pub method: HttpMethod,
    /// Extra request headers (authorization, accept, continuation cursor).
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>, content_type: Option<&str>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post {
                body,
                content_type: content_type.map(str::to_string),
            },
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        match &self.method {
            HttpMethod::Get => &[],
            HttpMethod::Post { body, .. } => body,
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self.method {
            HttpMethod::Get => "GET",
            HttpMethod::Post { .. } => "POST",
        }
    }
}

/// HTTP method with optional body for POST requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    /// HTTP GET request.
    Get,
    /// HTTP POST request; an empty body is sent without a content type.
    Post {
        body: Vec<u8>,
        content_type: Option<String>,
    },
}

/// HTTP response from an HTTP client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below HTTP: connection refused, TLS, timeout.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Low-level HTTP client trait.
///
/// Implementors perform exactly one request per call; the engine never
/// retries a failed call on its own.
pub trait HttpClient: Send + Sync {
    /// Send an HTTP request and return the response, whatever its status.
    fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

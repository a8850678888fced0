//! Error taxonomy shared by every protocol operation.
//!
//! Components with their own failure vocabulary (certificate loading,
//! signing, encryption) keep dedicated enums; [`Error`] wraps them and adds
//! the protocol-level categories: transport failures, structured API
//! errors, protocol violations, lifecycle misuse, polling exhaustion and
//! local validation.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::http::TransportError;
use crate::{encryption, keystore, xades};

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything a client operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request never produced an HTTP response.
    #[error("transport error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },
    /// The Service answered with a non-success status.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// A success response could not be decoded.
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    /// A success response lacked a token the protocol requires.
    #[error("response is missing the {0}")]
    MissingToken(&'static str),
    /// A success response was well-formed but semantically incomplete.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The operation does not fit the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A polling loop hit its attempt cap without a terminal answer.
    #[error("{operation} polling count exceeded after {attempts} attempts")]
    PollingExceeded {
        operation: &'static str,
        attempts: u32,
    },
    /// Inputs were rejected before any network call.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
    /// No cached refresh token can renew the access token.
    #[error("re-authentication required: {0}")]
    ReauthenticationRequired(&'static str),
    /// The Service published no certificate usable for key wrapping.
    #[error("no suitable RSA public key found")]
    NoSuitableKey,
    /// Authorization polling ended with a non-success status.
    #[error("authorization failed ({code}): {description}")]
    AuthorizationFailed { code: i32, description: String },
    /// Session polling ended with a non-success status.
    #[error("session failed ({code}): {description}")]
    SessionFailed { code: i32, description: String },
    /// The metadata query window was too wide for the Service.
    #[error("invoice query truncated, reduce the date range")]
    TruncatedResult,
    #[error(transparent)]
    CertificateLoad(#[from] keystore::Error),
    #[error(transparent)]
    Signing(#[from] xades::Error),
    #[error(transparent)]
    Encryption(#[from] encryption::Error),
}

impl Error {
    /// Whether repeating the same call later may succeed.
    ///
    /// Transport failures, polling exhaustion and server-side (5xx)
    /// failures are transient; structured client errors, lifecycle
    /// misuse and validation failures will fail again unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } | Error::PollingExceeded { .. } => true,
            Error::Api(api) => api.is_server_error(),
            _ => false,
        }
    }
}

/// Local input validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("subject type is required")]
    SubjectTypeRequired,
    #[error("date from is required")]
    DateFromRequired,
    #[error("invalid sort order: {0}")]
    InvalidSortOrder(String),
    #[error("invalid subject type: {0}")]
    InvalidSubjectType(String),
    #[error("ksef number is required")]
    KsefNumberRequired,
    #[error("ksef number contains characters that are not URL safe: {0}")]
    InvalidKsefNumber(String),
    #[error("context identifier value is empty")]
    EmptyIdentifier,
}

/// Error envelope returned by the Service for rejected requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEnvelope {
    pub exception: Exception,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Exception {
    pub service_ctx: String,
    pub service_code: String,
    pub service_name: String,
    pub timestamp: String,
    pub reference_number: String,
    pub exception_detail_list: Vec<ExceptionDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExceptionDetail {
    pub exception_code: i64,
    pub exception_description: String,
}

/// A non-2xx answer from the Service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ApiError {
    pub status: u16,
    /// Parsed envelope; `None` when the body was empty or not the
    /// documented JSON shape (typical for 5xx). Kept even without details
    /// for its service code and reference number.
    pub envelope: Option<ExceptionEnvelope>,
    /// Raw body, kept for diagnostics when no envelope could be parsed.
    pub body: String,
}

impl ApiError {
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let envelope = serde_json::from_slice::<ExceptionEnvelope>(body).ok();
        Self {
            status,
            envelope,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Exception details, empty when the body carried no envelope.
    pub fn details(&self) -> &[ExceptionDetail] {
        self.envelope
            .as_ref()
            .map(|e| e.exception.exception_detail_list.as_slice())
            .unwrap_or_default()
    }

    /// `code: description` for every detail entry, joined by `; `.
    pub fn joined_details(&self) -> String {
        self.details()
            .iter()
            .map(|d| format!("{}: {}", d.exception_code, d.exception_description))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details = self.joined_details();
        if !details.is_empty() {
            return write!(f, "API error (HTTP {}): {}", self.status, details);
        }
        if self.body.trim().is_empty() {
            write!(f, "API error (HTTP {})", self.status)
        } else {
            write!(f, "API error (HTTP {}): {}", self.status, self.body.trim())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_details_are_joined() {
        let body = br#"{"exception":{"serviceCtx":"srvTEMFA","serviceCode":"20250101-EX-1",
            "serviceName":"online.session","timestamp":"2025-01-01T10:00:00Z",
            "referenceNumber":"R-1","exceptionDetailList":[
            {"exceptionCode":21405,"exceptionDescription":"Invalid content"},
            {"exceptionCode":21111,"exceptionDescription":"Bad challenge"}]}}"#;
        let error = ApiError::from_response(400, body);

        assert_eq!(error.details().len(), 2);
        assert_eq!(
            error.joined_details(),
            "21405: Invalid content; 21111: Bad challenge"
        );
        assert_eq!(
            error.to_string(),
            "API error (HTTP 400): 21405: Invalid content; 21111: Bad challenge"
        );
        assert!(!Error::Api(error).is_retryable());
    }

    #[test]
    fn envelope_without_details_is_kept() {
        let body = br#"{"exception":{"serviceCode":"20250101-EX-2","referenceNumber":"R-2",
            "exceptionDetailList":[]}}"#;
        let error = ApiError::from_response(401, body);

        let envelope = error.envelope.as_ref().unwrap();
        assert_eq!(envelope.exception.service_code, "20250101-EX-2");
        assert_eq!(envelope.exception.reference_number, "R-2");
        assert!(error.details().is_empty());
        assert!(error.to_string().starts_with("API error (HTTP 401): {"));
    }

    #[test]
    fn server_errors_without_envelope_are_retryable() {
        let error = ApiError::from_response(503, b"<html>unavailable</html>");

        assert!(error.envelope.is_none());
        assert_eq!(error.to_string(), "API error (HTTP 503): <html>unavailable</html>");
        assert!(Error::Api(error).is_retryable());
    }

    #[test]
    fn classification() {
        assert!(Error::PollingExceeded {
            operation: "session",
            attempts: 30
        }
        .is_retryable());
        assert!(!Error::InvalidState("closed".into()).is_retryable());
        assert!(!Error::Validation(ValidationError::DateFromRequired).is_retryable());
        assert!(!Error::MissingToken("authentication token").is_retryable());
    }
}

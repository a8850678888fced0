//! The business entity a session acts on behalf of.
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Exactly one identifier of the represented entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextIdentifier {
    /// Domestic tax number (NIP).
    Nip(String),
    /// Service-internal identifier.
    InternalId(String),
    /// EU VAT number.
    NipVatUe(String),
    /// Peppol participant identifier.
    PeppolId(String),
}

impl ContextIdentifier {
    /// XML element name used in the authentication request.
    pub fn element_name(&self) -> &'static str {
        match self {
            ContextIdentifier::Nip(_) => "Nip",
            ContextIdentifier::InternalId(_) => "InternalId",
            ContextIdentifier::NipVatUe(_) => "NipVatUe",
            ContextIdentifier::PeppolId(_) => "PeppolId",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ContextIdentifier::Nip(v)
            | ContextIdentifier::InternalId(v)
            | ContextIdentifier::NipVatUe(v)
            | ContextIdentifier::PeppolId(v) => v,
        }
    }

    /// Which certificate attribute the Service matches against the identity.
    pub fn subject_identifier_type(&self) -> SubjectIdentifierType {
        match self {
            ContextIdentifier::NipVatUe(_) => SubjectIdentifierType::CertificateFingerprint,
            _ => SubjectIdentifierType::CertificateSubject,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.value().trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectIdentifierType {
    CertificateSubject,
    CertificateFingerprint,
}

impl SubjectIdentifierType {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectIdentifierType::CertificateSubject => "certificateSubject",
            SubjectIdentifierType::CertificateFingerprint => "certificateFingerprint",
        }
    }
}

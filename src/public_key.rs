//! Selection of the Service certificate used to wrap session keys.
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::gateway::Gateway;

pub const PUBLIC_KEYS_PATH: &str = "/security/public-key-certificates";

/// Usage tag of certificates that may wrap symmetric keys.
pub const SYMMETRIC_KEY_ENCRYPTION: &str = "SymmetricKeyEncryption";

/// One entry of the Service's certificate listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCertificate {
    /// Base64 DER.
    pub certificate: String,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_to: OffsetDateTime,
    #[serde(default)]
    pub usage: Vec<String>,
}

impl PublicKeyCertificate {
    /// `valid_from <= now < valid_to` and tagged with `usage`.
    pub fn is_usable(&self, now: OffsetDateTime, usage: &str) -> bool {
        self.valid_from <= now && now < self.valid_to && self.usage.iter().any(|u| u == usage)
    }
}

/// First certificate, in listing order, usable for key wrapping at `now`.
pub fn select_symmetric_key_certificate(
    certificates: &[PublicKeyCertificate],
    now: OffsetDateTime,
) -> Result<&PublicKeyCertificate> {
    certificates
        .iter()
        .find(|c| c.is_usable(now, SYMMETRIC_KEY_ENCRYPTION))
        .ok_or_else(|| {
            tracing::warn!(
                listed = certificates.len(),
                "no Service certificate is valid for symmetric key encryption"
            );
            Error::NoSuitableKey
        })
}

/// Fetch the listing and select from it.
pub fn fetch(gateway: &Gateway, now: OffsetDateTime) -> Result<PublicKeyCertificate> {
    let certificates: Vec<PublicKeyCertificate> = gateway.send_json(gateway.get(PUBLIC_KEYS_PATH))?;
    select_symmetric_key_certificate(&certificates, now).cloned()
}

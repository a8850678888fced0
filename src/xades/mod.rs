//! XAdES-BES enveloped signing of the authentication request.
//!
//! The flow:
//!
//! 1. Build the unsigned `AuthTokenRequest` and digest its inclusive
//!    canonical form (the document reference uses the enveloped-signature
//!    transform, so the signature element never contributes to it).
//! 2. Build `xades:SignedProperties` (signing time, certificate digest,
//!    issuer in the Service's layout, decimal serial) and digest its
//!    exclusive canonical form.
//! 3. Build `ds:SignedInfo` over both digests, canonicalize it exclusively
//!    and sign it with RSA PKCS#1 v1.5 / SHA-256.
//! 4. Embed the canonical parts into `ds:Signature`, append it to the root
//!    and declare the XAdES namespace on `xades:QualifyingProperties`.
use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs1v15::SigningKey;
use rsa::BigUint;
use sha2::{Digest, Sha256};
use signature::{SignatureEncoding, Signer};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::identity::ContextIdentifier;
use crate::keystore::SigningCredentials;

pub mod c14n;
pub mod document;
pub mod issuer;
pub mod postprocess;

use document::{SignatureIds, SignatureParts, SignedPropertiesInput};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot write XML: {0}")]
    Xml(String),
    #[error("cannot parse signed XML: {0}")]
    Parse(String),
    #[error("canonicalization failed: {0}")]
    Canonicalization(String),
    #[error("cannot encode certificate field: {0}")]
    Der(#[from] x509_cert::der::Error),
    #[error("cannot format signing time: {0}")]
    SigningTime(#[from] time::error::Format),
    #[error("RSA signing failed: {0}")]
    Sign(#[from] signature::Error),
}

/// Signs authentication requests with one loaded identity.
#[derive(Debug, Clone, Copy)]
pub struct RequestSigner<'a> {
    credentials: &'a SigningCredentials,
}

impl<'a> RequestSigner<'a> {
    pub fn new(credentials: &'a SigningCredentials) -> Self {
        Self { credentials }
    }

    /// Signed `AuthTokenRequest` for `challenge`, ready to POST.
    pub fn sign(
        &self,
        challenge: &str,
        identity: &ContextIdentifier,
        signing_time: OffsetDateTime,
    ) -> Result<Vec<u8>, Error> {
        let unsigned = document::auth_token_request(challenge, identity)?;
        let document_digest = digest(&c14n::inclusive(&unsigned)?);

        let ids = SignatureIds::generate();
        let certificate = self.credentials.certificate();
        let signing_time = format_signing_time(signing_time)?;
        let certificate_digest = digest(self.credentials.certificate_der());
        let issuer_name = issuer::format_issuer_name(&certificate.tbs_certificate.issuer)?;
        let serial = certificate.tbs_certificate.serial_number.as_bytes();
        let serial_number = BigUint::from_bytes_be(serial).to_string();

        let signed_properties = c14n::exclusive(&document::signed_properties(
            &ids,
            &SignedPropertiesInput {
                signing_time: &signing_time,
                certificate_digest: &certificate_digest,
                issuer_name: &issuer_name,
                serial_number: &serial_number,
            },
        )?)?;
        let properties_digest = digest(&signed_properties);

        let signed_info =
            c14n::exclusive(&document::signed_info(&ids, &document_digest, &properties_digest)?)?;
        let signing_key = SigningKey::<Sha256>::new(self.credentials.private_key().clone());
        let signature_value = signing_key.try_sign(&signed_info)?;

        let signature = document::signature(&SignatureParts {
            ids: &ids,
            signed_info: &signed_info,
            signature_value: &STANDARD.encode(signature_value.to_bytes()),
            certificate: &STANDARD.encode(self.credentials.certificate_der()),
            signed_properties: &signed_properties,
        })?;
        let signed = document::insert_signature(&unsigned, &signature)?;
        postprocess::declare_qualifying_properties_namespace(&signed)
    }
}

fn digest(bytes: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(bytes))
}

/// UTC, second precision, `Z` suffix.
pub fn format_signing_time(time: OffsetDateTime) -> Result<String, Error> {
    Ok(time
        .to_offset(UtcOffset::UTC)
        .format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"))?)
}

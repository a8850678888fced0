//! Per-session hybrid encryption.
//!
//! A fresh AES-256 key and IV are generated for every upload session; the
//! key travels to the Service wrapped with RSA-OAEP (SHA-256) under the
//! Service's published certificate, and every invoice uploaded in that
//! session is AES-256-CBC encrypted with PKCS#7 padding.
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot decode public key certificate: {0}")]
    CertificateEncoding(#[from] base64::DecodeError),
    #[error("cannot parse public key certificate: {0}")]
    CertificateParse(#[from] x509_cert::der::Error),
    #[error("public key certificate does not carry an RSA key: {0}")]
    NotRsa(String),
    #[error("cannot wrap symmetric key: {0}")]
    KeyWrap(#[from] rsa::Error),
    #[error("symmetric key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("initialization vector must be 16 bytes, got {0}")]
    InvalidIvLength(usize),
    #[error("invoice payload is empty")]
    EmptyPayload,
    #[error("ciphertext length {0} is not a multiple of the block size")]
    CiphertextLength(usize),
    #[error("invalid PKCS#7 padding")]
    InvalidPadding,
}

/// RSA public key embedded in a base64 DER certificate.
pub fn certificate_public_key(certificate_b64: &str) -> Result<RsaPublicKey, Error> {
    let der = STANDARD.decode(certificate_b64.trim())?;
    let certificate = Certificate::from_der(&der)?;
    let spki = certificate.tbs_certificate.subject_public_key_info.to_der()?;
    RsaPublicKey::from_public_key_der(&spki).map_err(|e| Error::NotRsa(e.to_string()))
}

/// Key material for one upload session.
///
/// Owned by exactly one session and wiped from memory when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionEncryptionMaterial {
    symmetric_key: [u8; KEY_LEN],
    initialization_vector: [u8; IV_LEN],
    wrapped_key: Vec<u8>,
}

impl SessionEncryptionMaterial {
    /// Generate a random key and IV and wrap the key under `public_key`.
    pub fn generate(public_key: &RsaPublicKey) -> Result<Self, Error> {
        let mut rng = rand::thread_rng();
        let mut symmetric_key = [0u8; KEY_LEN];
        let mut initialization_vector = [0u8; IV_LEN];
        rng.fill_bytes(&mut symmetric_key);
        rng.fill_bytes(&mut initialization_vector);

        let wrapped_key = public_key.encrypt(&mut rng, Oaep::new::<Sha256>(), &symmetric_key)?;

        Ok(Self {
            symmetric_key,
            initialization_vector,
            wrapped_key,
        })
    }

    /// [`generate`](Self::generate) for a Service-published base64 certificate.
    pub fn for_certificate(certificate_b64: &str) -> Result<Self, Error> {
        Self::generate(&certificate_public_key(certificate_b64)?)
    }

    pub fn symmetric_key(&self) -> &[u8] {
        &self.symmetric_key
    }

    pub fn initialization_vector(&self) -> &[u8] {
        &self.initialization_vector
    }

    pub fn wrapped_key(&self) -> &[u8] {
        &self.wrapped_key
    }

    /// The part of the material sent when opening a session.
    pub fn encryption_info(&self) -> EncryptionInfo {
        EncryptionInfo {
            encrypted_symmetric_key: STANDARD.encode(&self.wrapped_key),
            initialization_vector: STANDARD.encode(self.initialization_vector),
        }
    }

    pub fn encrypt_invoice(&self, invoice: &[u8]) -> Result<EncryptedInvoice, Error> {
        EncryptedInvoice::build(&self.symmetric_key, &self.initialization_vector, invoice)
    }
}

impl fmt::Debug for SessionEncryptionMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEncryptionMaterial")
            .field("wrapped_key_len", &self.wrapped_key.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionInfo {
    pub encrypted_symmetric_key: String,
    pub initialization_vector: String,
}

/// Body of the invoice upload call. Hashes are base64 SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedInvoice {
    pub invoice_hash: String,
    pub invoice_size: usize,
    pub encrypted_invoice_hash: String,
    pub encrypted_invoice_size: usize,
    pub encrypted_invoice_content: String,
    pub offline_mode: bool,
}

impl EncryptedInvoice {
    pub fn build(key: &[u8], iv: &[u8], invoice: &[u8]) -> Result<Self, Error> {
        if invoice.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let ciphertext = encrypt(key, iv, invoice)?;

        Ok(Self {
            invoice_hash: STANDARD.encode(Sha256::digest(invoice)),
            invoice_size: invoice.len(),
            encrypted_invoice_hash: STANDARD.encode(Sha256::digest(&ciphertext)),
            encrypted_invoice_size: ciphertext.len(),
            encrypted_invoice_content: STANDARD.encode(&ciphertext),
            offline_mode: false,
        })
    }
}

/// PKCS#7: always appends between 1 and `block_size` bytes.
pub fn pkcs7_pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let padding = block_size - data.len() % block_size;
    let mut out = Vec::with_capacity(data.len() + padding);
    out.extend_from_slice(data);
    out.resize(data.len() + padding, padding as u8);
    out
}

pub fn pkcs7_unpad(data: &[u8], block_size: usize) -> Result<&[u8], Error> {
    let padding = *data.last().ok_or(Error::InvalidPadding)? as usize;
    if padding == 0
        || padding > block_size
        || padding > data.len()
        || data.len() % block_size != 0
    {
        return Err(Error::InvalidPadding);
    }
    let (body, tail) = data.split_at(data.len() - padding);
    if tail.iter().any(|b| *b as usize != padding) {
        return Err(Error::InvalidPadding);
    }
    Ok(body)
}

fn check_key_iv(key: &[u8], iv: &[u8]) -> Result<(), Error> {
    if key.len() != KEY_LEN {
        return Err(Error::InvalidKeyLength(key.len()));
    }
    if iv.len() != IV_LEN {
        return Err(Error::InvalidIvLength(iv.len()));
    }
    Ok(())
}

/// AES-256-CBC with PKCS#7 padding.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    check_key_iv(key, iv)?;
    let padded = pkcs7_pad(plaintext, BLOCK_SIZE);
    let cipher =
        Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| Error::InvalidKeyLength(key.len()))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(&padded))
}

pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    check_key_iv(key, iv)?;
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::CiphertextLength(ciphertext.len()));
    }
    let cipher =
        Aes256CbcDec::new_from_slices(key, iv).map_err(|_| Error::InvalidKeyLength(key.len()))?;
    let padded = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| Error::CiphertextLength(ciphertext.len()))?;
    Ok(pkcs7_unpad(&padded, BLOCK_SIZE)?.to_vec())
}

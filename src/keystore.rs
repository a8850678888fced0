//! Loading of the taxpayer's signing identity from a PKCS#12 container.
//!
//! The XAdES signer downstream only supports RSA keys, so anything else
//! is rejected at load time.
use std::fmt;
use std::path::{Path, PathBuf};

use openssl::pkcs12::Pkcs12;
use openssl::pkey::Id;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use x509_cert::der::Decode;
use x509_cert::Certificate;
use zeroize::Zeroizing;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read certificate file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open PKCS#12 container (wrong password or corrupt file): {0}")]
    Pkcs12(#[from] openssl::error::ErrorStack),
    #[error("PKCS#12 container holds no private key")]
    MissingPrivateKey,
    #[error("PKCS#12 container holds no certificate")]
    MissingCertificate,
    #[error("certificate private key is not RSA ({0})")]
    NotRsa(String),
    #[error("cannot convert private key: {0}")]
    KeyConversion(String),
    #[error("cannot decode certificate: {0}")]
    CertificateDecode(#[from] x509_cert::der::Error),
}

/// Private key and certificate used to sign authentication requests.
///
/// Read-only after loading; share it behind an `Arc` across
/// authentication attempts.
pub struct SigningCredentials {
    private_key: RsaPrivateKey,
    certificate: Certificate,
    certificate_der: Vec<u8>,
}

impl SigningCredentials {
    /// Read and decrypt a `.p12`/`.pfx` file.
    pub fn load(path: impl AsRef<Path>, password: &str) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pkcs12_der(&bytes, password)
    }

    pub fn from_pkcs12_der(der: &[u8], password: &str) -> Result<Self, Error> {
        let parsed = Pkcs12::from_der(der)?.parse2(password)?;
        let pkey = parsed.pkey.ok_or(Error::MissingPrivateKey)?;
        let cert = parsed.cert.ok_or(Error::MissingCertificate)?;

        if pkey.id() != Id::RSA {
            return Err(Error::NotRsa(format!("{:?}", pkey.id())));
        }
        let pkcs1 = Zeroizing::new(pkey.rsa()?.private_key_to_der()?);
        let private_key = RsaPrivateKey::from_pkcs1_der(&pkcs1)
            .map_err(|e| Error::KeyConversion(e.to_string()))?;

        let certificate_der = cert.to_der()?;
        let certificate = Certificate::from_der(&certificate_der)?;

        Ok(Self {
            private_key,
            certificate,
            certificate_der,
        })
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("subject", &self.certificate.tbs_certificate.subject.to_string())
            .finish_non_exhaustive()
    }
}

//! Client for the Polish national e-invoicing gateway (KSeF).
//!
//! A [`Client`] authenticates an identity with a qualified certificate
//! (XAdES-signed challenge), keeps its access token fresh, uploads
//! encrypted invoices through [`session::UploadSession`] and queries or
//! downloads invoices already in the system.
//!
//! ```no_run
//! use ksef_client::{Client, ContextIdentifier, Environment, SigningCredentials};
//!
//! # fn main() -> ksef_client::Result<()> {
//! let client = Client::builder()
//!     .environment(Environment::Test)
//!     .credentials(SigningCredentials::load("seal.p12", "secret")?)
//!     .context(ContextIdentifier::Nip("5265877635".into()))
//!     .build()?;
//! client.authenticate()?;
//!
//! let mut session = client.open_session()?;
//! session.upload_invoice(b"<Faktura/>")?;
//! session.finish()?;
//! let status = session.poll_status()?;
//! println!("{} invoices accepted", status.successful_invoice_count);
//! # Ok(())
//! # }
//! ```
pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod encryption;
pub mod error;
pub mod gateway;
pub mod http;
pub mod identity;
pub mod invoices;
pub mod keystore;
pub mod pagination;
pub mod polling;
pub mod public_key;
pub mod session;
pub mod token;
pub mod xades;

pub use client::{Client, ClientBuilder};
pub use clock::{CancellationToken, Clock, SystemClock};
pub use config::{ClientConfig, Environment, PollingPolicy};
pub use error::{ApiError, Error, Result, ValidationError};
pub use identity::ContextIdentifier;
pub use invoices::{InvoiceQuery, SortOrder, SubjectType};
pub use keystore::SigningCredentials;
pub use session::UploadSession;
pub use token::{ApiToken, TokenPair};

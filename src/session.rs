//! Online upload sessions.
//!
//! A session is opened with freshly generated encryption material, accepts
//! any number of invoice uploads while open, is closed with
//! [`UploadSession::finish`] and then polled until the Service reports a
//! terminal status. The key material lives exactly as long as the
//! [`UploadSession`] value.
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::config::FormCode;
use crate::encryption::{EncryptionInfo, SessionEncryptionMaterial};
use crate::error::{Error, Result};
use crate::gateway::{self, CONTINUATION_HEADER};
use crate::http::HttpRequest;
use crate::pagination::{collect_continuation, ContinuationPage};
use crate::polling::{poll_until, OperationStatus, PollStatus};

pub const OPEN_PATH: &str = "/sessions/online";

const LISTING_PAGE_SIZE: u32 = 100;

const SUCCEEDED: i32 = 200;
/// 100: uploads still accepted; 150 and 170: uploaded invoices are being
/// processed.
const PROCESSING: [i32; 3] = [100, 150, 170];

/// Client-side lifecycle of an [`UploadSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SessionState {
    Open,
    Closed,
    Succeeded,
    Failed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenSessionRequest<'a> {
    form_code: &'a FormCode,
    encryption: EncryptionInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenSessionResponse {
    #[serde(default)]
    reference_number: String,
    #[serde(default)]
    valid_until: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UploadResponse {
    reference_number: Option<String>,
}

/// Session status as reported by the Service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStatus {
    pub status: Option<OperationStatus>,
    pub invoice_count: u32,
    pub successful_invoice_count: u32,
    pub failed_invoice_count: u32,
    pub upo: Option<Upo>,
}

/// Official acknowledgement of receipt, split into downloadable pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Upo {
    pub pages: Vec<UpoPage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpoPage {
    pub reference_number: String,
    /// Absolute, pre-signed URL.
    pub download_url: String,
    pub download_url_expiration_date: String,
}

/// An invoice the Service accepted into the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadedInvoice {
    pub ordinal_number: u32,
    pub reference_number: String,
    pub ksef_number: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_hash: String,
    pub status: Option<OperationStatus>,
}

/// An invoice the Service rejected during processing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailedUploadInvoice {
    pub ordinal_number: u32,
    pub reference_number: String,
    pub invoice_hash: String,
    pub status: Option<OperationStatus>,
}

/// One open session; borrows the client whose tokens authorize it.
#[derive(Debug)]
pub struct UploadSession<'c> {
    client: &'c Client,
    reference_number: String,
    valid_until: String,
    encryption: SessionEncryptionMaterial,
    state: SessionState,
}

impl<'c> UploadSession<'c> {
    /// Select a Service certificate, generate key material and open the
    /// session. Nothing is kept if any step fails.
    pub(crate) fn open(client: &'c Client) -> Result<Self> {
        let access_token = client.access_token()?;
        let certificate = client.public_key_certificate()?;
        let encryption = SessionEncryptionMaterial::for_certificate(&certificate.certificate)?;

        let gateway = client.gateway();
        let body = OpenSessionRequest {
            form_code: &client.config().form_code,
            encryption: encryption.encryption_info(),
        };
        let response: OpenSessionResponse =
            gateway.send_json(gateway.post_json(OPEN_PATH, &body)?.with_bearer(&access_token))?;
        if response.reference_number.is_empty() {
            return Err(Error::Protocol(
                "session open response has no reference number".into(),
            ));
        }

        tracing::info!(
            reference = %response.reference_number,
            valid_until = %response.valid_until,
            "upload session opened"
        );
        Ok(Self {
            client,
            reference_number: response.reference_number,
            valid_until: response.valid_until,
            encryption,
            state: SessionState::Open,
        })
    }

    pub fn reference_number(&self) -> &str {
        &self.reference_number
    }

    pub fn valid_until(&self) -> &str {
        &self.valid_until
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn encryption(&self) -> &SessionEncryptionMaterial {
        &self.encryption
    }

    fn require_open(&self, operation: &str) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(Error::InvalidState(format!(
                "cannot {operation}: session {} is {}",
                self.reference_number, self.state
            )));
        }
        Ok(())
    }

    fn authorized(&self, request: HttpRequest) -> Result<HttpRequest> {
        Ok(request.with_bearer(&self.client.access_token()?))
    }

    /// Encrypt and upload one invoice document.
    ///
    /// Returns the invoice reference number when the Service assigns one.
    /// A rejected upload does not change the session state; per-invoice
    /// failures surface later through status polling and
    /// [`list_failed_uploads`](Self::list_failed_uploads).
    pub fn upload_invoice(&mut self, invoice: &[u8]) -> Result<Option<String>> {
        self.require_open("upload invoice")?;
        let body = self.encryption.encrypt_invoice(invoice)?;

        let gateway = self.client.gateway();
        let path = format!("{OPEN_PATH}/{}/invoices", self.reference_number);
        let request = self.authorized(gateway.post_json(&path, &body)?)?;
        let response = gateway.send(request)?;

        let reference = serde_json::from_slice::<UploadResponse>(&response.body)
            .ok()
            .and_then(|r| r.reference_number)
            .filter(|r| !r.is_empty());
        tracing::debug!(
            session = %self.reference_number,
            size = body.invoice_size,
            reference = reference.as_deref().unwrap_or("-"),
            "invoice uploaded"
        );
        Ok(reference)
    }

    /// Close the session; the Service starts processing what was uploaded.
    pub fn finish(&mut self) -> Result<()> {
        self.require_open("finish")?;
        let gateway = self.client.gateway();
        let path = format!("{OPEN_PATH}/{}/close", self.reference_number);
        gateway.send(self.authorized(gateway.post(&path))?)?;

        self.state = SessionState::Closed;
        tracing::info!(reference = %self.reference_number, "upload session closed");
        Ok(())
    }

    /// One status read. A response without a status block is a protocol
    /// violation, not "still processing".
    pub fn status(&self) -> Result<SessionStatus> {
        let gateway = self.client.gateway();
        let path = format!("/sessions/{}", self.reference_number);
        let status: SessionStatus = gateway.send_json(self.authorized(gateway.get(&path))?)?;
        if status.status.is_none() {
            return Err(Error::Protocol(format!(
                "session {} status response has no status",
                self.reference_number
            )));
        }
        Ok(status)
    }

    /// Poll until the session reaches a terminal status.
    pub fn poll_status(&mut self) -> Result<SessionStatus> {
        let outcome = poll_until(
            "session",
            &self.client.config().polling,
            self.client.clock(),
            self.client.gateway().cancellation(),
            |_| {
                let status = self.status()?;
                let code = status.status.as_ref().map_or(0, |s| s.code);
                if PROCESSING.contains(&code) {
                    return Ok(PollStatus::Pending);
                }
                Ok(PollStatus::Done(status))
            },
        )?;

        let (code, description) = outcome
            .status
            .as_ref()
            .map(|s| (s.code, s.description.clone()))
            .unwrap_or_default();
        if code == SUCCEEDED {
            self.state = SessionState::Succeeded;
            tracing::info!(
                reference = %self.reference_number,
                invoices = outcome.invoice_count,
                successful = outcome.successful_invoice_count,
                failed = outcome.failed_invoice_count,
                "session processed"
            );
            return Ok(outcome);
        }

        self.state = SessionState::Failed;
        tracing::warn!(reference = %self.reference_number, code, %description, "session failed");
        Err(Error::SessionFailed { code, description })
    }

    fn list<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let gateway = self.client.gateway();
        let path = format!("{path}?pageSize={LISTING_PAGE_SIZE}");
        collect_continuation(|cursor| {
            let mut request = self.authorized(gateway.get(&path))?;
            if let Some(cursor) = cursor {
                request = request.with_header(CONTINUATION_HEADER, cursor);
            }
            gateway.send_json::<ContinuationPage<T>>(request)
        })
    }

    /// Every invoice accepted into the session, in Service order.
    pub fn list_uploaded_invoices(&self) -> Result<Vec<UploadedInvoice>> {
        self.list(&format!("/sessions/{}/invoices", self.reference_number))
    }

    pub fn list_failed_uploads(&self) -> Result<Vec<FailedUploadInvoice>> {
        self.list(&format!("/sessions/{}/invoices/failed", self.reference_number))
    }

    /// Download one UPO page. The URL is pre-signed, so no bearer token is
    /// sent.
    pub fn download_upo(&self, page: &UpoPage) -> Result<Vec<u8>> {
        if page.download_url.is_empty() {
            return Err(Error::Protocol(format!(
                "UPO page {} has no download URL",
                page.reference_number
            )));
        }
        let request =
            HttpRequest::get(page.download_url.as_str()).with_header("Accept", gateway::XML);
        Ok(self.client.gateway().send(request)?.body)
    }
}

//! Certificate-based authentication: challenge, signed submission,
//! authorization polling and token redemption.
//!
//! Each step consumes the previous step's output, so the steps can only
//! run in protocol order. A failure anywhere means starting over with a
//! fresh challenge; challenges are single use.
use std::fmt;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::config::PollingPolicy;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::identity::ContextIdentifier;
use crate::keystore::SigningCredentials;
use crate::polling::{poll_until, OperationStatus, PollStatus};
use crate::token::{ApiToken, TokenPair};
use crate::xades::RequestSigner;

pub const CHALLENGE_PATH: &str = "/auth/challenge";
pub const XADES_SIGNATURE_PATH: &str = "/auth/xades-signature";
pub const REDEEM_PATH: &str = "/auth/token/redeem";

const AUTHORIZED: i32 = 200;
const IN_PROGRESS: i32 = 100;

/// Server-issued nonce to be signed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub challenge: String,
}

/// Handle of a submitted authentication request.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationTicket {
    pub reference_number: String,
    pub authentication_token: String,
}

impl fmt::Debug for AuthenticationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationTicket")
            .field("reference_number", &self.reference_number)
            .finish_non_exhaustive()
    }
}

/// A ticket the Service has confirmed; the only input token redemption
/// accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedTicket(AuthenticationTicket);

impl AuthorizedTicket {
    pub fn reference_number(&self) -> &str {
        &self.0.reference_number
    }
}

/// The Service has sent the authentication token both bare and wrapped
/// with its expiry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenField {
    Plain(String),
    Structured(ApiToken),
}

impl TokenField {
    fn into_token(self) -> String {
        match self {
            TokenField::Plain(token) => token,
            TokenField::Structured(token) => token.token,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionResponse {
    #[serde(default)]
    reference_number: String,
    authentication_token: Option<TokenField>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Option<OperationStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedeemResponse {
    access_token: Option<ApiToken>,
    refresh_token: Option<ApiToken>,
}

/// Drives one authentication attempt for one identity.
pub struct Authenticator<'a> {
    gateway: &'a Gateway,
    clock: &'a dyn Clock,
    polling: &'a PollingPolicy,
    credentials: &'a SigningCredentials,
    identity: &'a ContextIdentifier,
}

impl<'a> Authenticator<'a> {
    pub fn new(
        gateway: &'a Gateway,
        clock: &'a dyn Clock,
        polling: &'a PollingPolicy,
        credentials: &'a SigningCredentials,
        identity: &'a ContextIdentifier,
    ) -> Self {
        Self {
            gateway,
            clock,
            polling,
            credentials,
            identity,
        }
    }

    /// Run all four steps.
    pub fn authenticate(&self) -> Result<TokenPair> {
        self.identity.validate()?;
        let challenge = self.request_challenge()?;
        let ticket = self.submit_signed_request(&challenge)?;
        let authorized = self.await_authorization(ticket)?;
        let tokens = self.redeem_tokens(authorized)?;
        tracing::info!(
            context = self.identity.element_name(),
            valid_until = %tokens.access_token.valid_until,
            "authenticated"
        );
        Ok(tokens)
    }

    pub fn request_challenge(&self) -> Result<Challenge> {
        self.gateway.send_json(self.gateway.post(CHALLENGE_PATH))
    }

    pub fn submit_signed_request(&self, challenge: &Challenge) -> Result<AuthenticationTicket> {
        let signed = RequestSigner::new(self.credentials).sign(
            &challenge.challenge,
            self.identity,
            self.clock.now(),
        )?;

        let response: SubmissionResponse = self
            .gateway
            .send_json(self.gateway.post_xml(XADES_SIGNATURE_PATH, signed))?;
        let authentication_token = response
            .authentication_token
            .map(TokenField::into_token)
            .filter(|token| !token.is_empty())
            .ok_or(Error::MissingToken("authentication token"))?;
        if response.reference_number.is_empty() {
            return Err(Error::Protocol(
                "signed submission response has no reference number".into(),
            ));
        }

        tracing::debug!(reference = %response.reference_number, "authentication request accepted");
        Ok(AuthenticationTicket {
            reference_number: response.reference_number,
            authentication_token,
        })
    }

    /// Poll until the Service reports 200; 100 means keep waiting.
    pub fn await_authorization(&self, ticket: AuthenticationTicket) -> Result<AuthorizedTicket> {
        let path = format!("/auth/{}", ticket.reference_number);
        poll_until(
            "authorization",
            self.polling,
            self.clock,
            self.gateway.cancellation(),
            |_| {
                let request = self
                    .gateway
                    .get(&path)
                    .with_bearer(&ticket.authentication_token);
                let response: StatusResponse = self.gateway.send_json(request)?;
                let status = response.status.ok_or_else(|| {
                    Error::Protocol("authorization status response has no status".into())
                })?;
                match status.code {
                    AUTHORIZED => Ok(PollStatus::Done(())),
                    IN_PROGRESS => Ok(PollStatus::Pending),
                    code => {
                        tracing::warn!(
                            code,
                            description = %status.description,
                            "authorization rejected"
                        );
                        Err(Error::AuthorizationFailed {
                            code,
                            description: status.description,
                        })
                    }
                }
            },
        )?;
        Ok(AuthorizedTicket(ticket))
    }

    pub fn redeem_tokens(&self, ticket: AuthorizedTicket) -> Result<TokenPair> {
        let request = self
            .gateway
            .post(REDEEM_PATH)
            .with_bearer(&ticket.0.authentication_token);
        let response: RedeemResponse = self.gateway.send_json(request)?;

        let access_token = response
            .access_token
            .filter(|t| !t.token.is_empty())
            .ok_or(Error::MissingToken("access token"))?;
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.token.is_empty())
            .ok_or(Error::MissingToken("refresh token"))?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

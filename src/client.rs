//! The entry point: one authenticated identity talking to one Service
//! deployment.
use std::fmt;
use std::sync::Arc;

use crate::auth::Authenticator;
use crate::clock::{CancellationToken, Clock, SystemClock};
use crate::config::{ClientConfig, Environment};
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::http::{HttpClient, ReqwestClient};
use crate::identity::ContextIdentifier;
use crate::invoices::{self, InvoiceMetadata, InvoiceQuery, MetadataPage};
use crate::keystore::SigningCredentials;
use crate::pagination::collect_offset;
use crate::public_key::{self, PublicKeyCertificate};
use crate::session::UploadSession;
use crate::token::{TokenManager, TokenPair};

/// Client for the KSeF gateway.
///
/// Tokens are shared by every operation, including upload sessions opened
/// from this client, so one `Client` serves one context identifier.
pub struct Client {
    config: ClientConfig,
    gateway: Gateway,
    clock: Arc<dyn Clock>,
    tokens: TokenManager,
    credentials: Option<Arc<SigningCredentials>>,
    context: Option<ContextIdentifier>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn context(&self) -> Option<&ContextIdentifier> {
        self.context.as_ref()
    }

    /// Cancel every call and polling loop running on this client.
    pub fn cancel(&self) {
        self.gateway.cancellation().cancel();
    }

    /// Run the full authentication flow and cache the resulting tokens.
    pub fn authenticate(&self) -> Result<TokenPair> {
        let credentials = self
            .credentials
            .as_deref()
            .ok_or_else(|| Error::InvalidState("no signing credentials configured".into()))?;
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no context identifier configured".into()))?;

        let tokens = Authenticator::new(
            &self.gateway,
            self.clock.as_ref(),
            &self.config.polling,
            credentials,
            context,
        )
        .authenticate()?;
        self.tokens.store(tokens.clone());
        Ok(tokens)
    }

    /// A currently valid access token, renewed on demand.
    pub fn access_token(&self) -> Result<String> {
        self.tokens.access_token(&self.gateway, self.clock.now())
    }

    /// The Service certificate to wrap session keys with.
    pub fn public_key_certificate(&self) -> Result<PublicKeyCertificate> {
        public_key::fetch(&self.gateway, self.clock.now())
    }

    pub fn open_session(&self) -> Result<UploadSession<'_>> {
        UploadSession::open(self)
    }

    /// One page of invoice metadata, at the query's own page offset.
    pub fn query_invoice_metadata_page(&self, query: &InvoiceQuery) -> Result<MetadataPage> {
        let query = query.normalize()?;
        let token = self.access_token()?;
        invoices::fetch_metadata_page(&self.gateway, &token, &query, query.page_offset)
    }

    /// Every page of invoice metadata from the query's page offset on.
    pub fn query_invoice_metadata(&self, query: &InvoiceQuery) -> Result<Vec<InvoiceMetadata>> {
        let query = query.normalize()?;
        let items = collect_offset(query.page_offset, |offset| {
            invoices::fetch_metadata_page(&self.gateway, &self.access_token()?, &query, offset)
        })?;
        tracing::info!(
            subject = %query.subject_type,
            invoices = items.len(),
            "invoice metadata query complete"
        );
        Ok(items)
    }

    pub fn download_invoice(&self, ksef_number: &str) -> Result<Vec<u8>> {
        invoices::validate_ksef_number(ksef_number)?;
        invoices::download(&self.gateway, &self.access_token()?, ksef_number)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.base_url)
            .field("context", &self.context)
            .field("authenticated", &self.tokens.is_authenticated())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    http: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    cancel: Option<CancellationToken>,
    credentials: Option<Arc<SigningCredentials>>,
    context: Option<ContextIdentifier>,
    tokens: Option<TokenPair>,
}

impl ClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn environment(self, environment: Environment) -> Self {
        self.config(ClientConfig::for_environment(environment))
    }

    /// Replace the default reqwest transport.
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn credentials(mut self, credentials: SigningCredentials) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    pub fn context(mut self, context: ContextIdentifier) -> Self {
        self.context = Some(context);
        self
    }

    /// Start from tokens obtained earlier instead of authenticating.
    pub fn tokens(mut self, tokens: TokenPair) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn build(self) -> Result<Client> {
        let config = self.config.unwrap_or_default();
        if let Some(context) = &self.context {
            context.validate()?;
        }

        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(
                ReqwestClient::with_timeout(config.request_timeout).map_err(|source| {
                    Error::Transport {
                        url: config.base_url.clone(),
                        source,
                    }
                })?,
            ),
        };
        let gateway = Gateway::new(
            config.base_url.clone(),
            http,
            self.cancel.unwrap_or_default(),
        );
        let tokens = match self.tokens {
            Some(pair) => TokenManager::with_tokens(pair),
            None => TokenManager::new(),
        };

        Ok(Client {
            config,
            gateway,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            tokens,
            credentials: self.credentials,
            context: self.context,
        })
    }
}

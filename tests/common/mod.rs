//! Scripted transport, fake clock and a throwaway signing identity.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};
use time::macros::datetime;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use ksef_client::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use ksef_client::{
    ApiToken, CancellationToken, Client, ClientConfig, Clock, ContextIdentifier, Error,
    PollingPolicy, SigningCredentials, TokenPair,
};

pub const BASE_URL: &str = "http://ksef.local/api/v2";
pub const NOW: OffsetDateTime = datetime!(2025-06-01 12:00 UTC);
pub const PASSWORD: &str = "secret";

/// Responses keyed by method and path; the last response of a route
/// repeats once the queue is down to one.
#[derive(Default)]
pub struct MockHttp {
    routes: Mutex<HashMap<(&'static str, String), VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(
        &self,
        method: &'static str,
        path: &str,
        status: u16,
        body: impl Into<Vec<u8>>,
    ) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(HttpResponse::new(status, body));
        self
    }

    pub fn json(&self, method: &'static str, path: &str, body: serde_json::Value) -> &Self {
        self.on(method, path, 200, body.to_string())
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method_name() == method && route_path(&r.url) == path)
            .collect()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests_to(method, path).len()
    }
}

/// Path relative to [`BASE_URL`] without the query; other URLs verbatim.
pub fn route_path(url: &str) -> String {
    let path = url.strip_prefix(BASE_URL).unwrap_or(url);
    path.split('?').next().unwrap_or(path).to_string()
}

/// Value of a query parameter in `url`.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

impl HttpClient for MockHttp {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let key = (request.method_name(), route_path(&request.url));
        self.requests.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(&key)
            .ok_or_else(|| TransportError::new(format!("no route for {} {}", key.0, key.1)))?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.ok_or_else(|| TransportError::new(format!("no response for {} {}", key.0, key.1)))
    }
}

/// Clock that never blocks: sleeping advances `now` and is recorded.
pub struct FakeClock {
    now: Mutex<OffsetDateTime>,
    sleeps: Mutex<Vec<Duration>>,
    cancel_on_sleep: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeClock {
    pub fn new(now: OffsetDateTime) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
            cancel_on_sleep: Mutex::new(None),
        })
    }

    pub fn sleeps(&self) -> usize {
        self.sleeps.lock().unwrap().len()
    }

    /// Fire `token` when the `n`-th sleep starts.
    pub fn cancel_on_sleep(&self, n: usize, token: CancellationToken) {
        *self.cancel_on_sleep.lock().unwrap() = Some((n, token));
    }
}

impl Clock for FakeClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> ksef_client::Result<()> {
        let count = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(duration);
            sleeps.len()
        };
        if let Some((n, token)) = self.cancel_on_sleep.lock().unwrap().as_ref() {
            if count >= *n {
                token.cancel();
            }
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut now = self.now.lock().unwrap();
        *now += duration;
        Ok(())
    }
}

/// Everything logged at debug level or above while `f` runs on this thread.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (result, logs)
}

pub struct Identity {
    pub pkcs12: Vec<u8>,
    /// Base64 DER of the certificate.
    pub certificate: String,
}

/// One RSA identity per test binary; key generation is slow.
pub fn identity() -> &'static Identity {
    static IDENTITY: OnceLock<Identity> = OnceLock::new();
    IDENTITY.get_or_init(|| {
        let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("C", "PL").unwrap();
        name.append_entry_by_text("O", "Test Org").unwrap();
        name.append_entry_by_text("CN", "Test Seal").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(4242).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        let certificate = builder.build();

        let pkcs12 = Pkcs12::builder()
            .name("seal")
            .pkey(&pkey)
            .cert(&certificate)
            .build2(PASSWORD)
            .unwrap()
            .to_der()
            .unwrap();

        Identity {
            pkcs12,
            certificate: STANDARD.encode(certificate.to_der().unwrap()),
        }
    })
}

pub fn credentials() -> SigningCredentials {
    SigningCredentials::from_pkcs12_der(&identity().pkcs12, PASSWORD).unwrap()
}

pub fn rfc3339(time: OffsetDateTime) -> String {
    time.format(&Rfc3339).unwrap()
}

/// Access token valid for an hour and refresh token valid for a week.
pub fn fresh_tokens() -> TokenPair {
    TokenPair {
        access_token: ApiToken::new("ACC1", NOW + time::Duration::hours(1)),
        refresh_token: ApiToken::new("REF1", NOW + time::Duration::days(7)),
    }
}

pub fn config() -> ClientConfig {
    ClientConfig::default()
        .with_base_url(BASE_URL)
        .with_polling(PollingPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 30,
        })
}

pub fn client(http: &Arc<MockHttp>, clock: &Arc<FakeClock>, tokens: Option<TokenPair>) -> Client {
    let mut builder = Client::builder()
        .config(config())
        .http_client(http.clone())
        .clock(clock.clone())
        .credentials(credentials())
        .context(ContextIdentifier::Nip("5265877635".into()));
    if let Some(tokens) = tokens {
        builder = builder.tokens(tokens);
    }
    builder.build().unwrap()
}

/// Listing with the test identity's certificate as the only key.
pub fn public_key_listing() -> serde_json::Value {
    serde_json::json!([{
        "certificate": identity().certificate,
        "validFrom": "2025-01-01T00:00:00Z",
        "validTo": "2026-01-01T00:00:00Z",
        "usage": ["KsefTokenEncryption", "SymmetricKeyEncryption"]
    }])
}

pub fn status(code: i32, description: &str) -> serde_json::Value {
    serde_json::json!({"status": {"code": code, "description": description}})
}

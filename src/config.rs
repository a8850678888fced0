//! Client configuration.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Service deployments; they differ only by host.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Production,
    Demo,
    #[default]
    Test,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Production => "https://ksef.mf.gov.pl/api/v2",
            Environment::Demo => "https://ksef-demo.mf.gov.pl/api/v2",
            Environment::Test => "https://ksef-test.mf.gov.pl/api/v2",
        }
    }
}

/// Fixed-interval bounded polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingPolicy {
    #[serde(with = "millis")]
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

/// Document schema announced when opening an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormCode {
    pub system_code: String,
    pub schema_version: String,
    pub value: String,
}

impl Default for FormCode {
    fn default() -> Self {
        Self {
            system_code: "FA (3)".into(),
            schema_version: "1-0E".into(),
            value: "FA".into(),
        }
    }
}

/// Everything a [`Client`](crate::Client) needs besides credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Service root including the API version prefix, without trailing slash.
    pub base_url: String,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub polling: PollingPolicy,
    pub form_code: FormCode,
}

impl ClientConfig {
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            base_url: environment.base_url().to_string(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_polling(mut self, polling: PollingPolicy) -> Self {
        self.polling = polling;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Environment::default().base_url().to_string(),
            request_timeout: Duration::from_secs(30),
            polling: PollingPolicy::default(),
            form_code: FormCode::default(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

//! HTTP Webhook Notifier
//!
//! ## Overview
//!
//! Delivers alerts as JSON `POST`s to a single endpoint, for operators who
//! route alerts through a chat bot, an incident tool or a home automation hub.
//!
//! ## Retry Policy
//!
//! | Outcome                 | Action                         |
//! |-------------------------|--------------------------------|
//! | 2xx                     | delivered                      |
//! | 429, 5xx                | retry with exponential backoff |
//! | transport error         | retry with exponential backoff |
//! | other 4xx               | fail immediately               |
//!
//! ```text
//! delay(attempt) = backoff_base * 2^(attempt - 1)
//! ```
//!
//! Retries block the publisher thread, so keep `max_retries` small: the
//! update queue absorbs the stall, it does not make it free.
//!
//! ## Example Usage
//!
//! ```rust
//! use fieldgate_connectors::http::{WebhookConfig, WebhookNotifier};
//!
//! let config = WebhookConfig::new("https://hooks.example.com/fieldgate")
//!     .bearer_token("your-api-token")
//!     .timeout_secs(5);
//! let notifier = WebhookNotifier::new(config)?;
//! # Ok::<(), fieldgate_connectors::http::HttpError>(())
//! ```

use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alert::{Alert, Notifier};
use crate::{ConnectionStats, ConnectorError};

/// HTTP-specific errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(String),

    /// Server returned error status
    #[error("Server error {status}: {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Authentication methods
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// No authentication
    #[default]
    None,
    /// Bearer token
    Bearer {
        /// Token value
        token: String,
    },
    /// Basic authentication
    Basic {
        /// User name
        username: String,
        /// Password
        password: String,
    },
}

impl AuthMethod {
    /// `Authorization` header value
    fn header_value(&self) -> Option<String> {
        match self {
            AuthMethod::None => None,
            AuthMethod::Bearer { token } => Some(format!("Bearer {}", token)),
            AuthMethod::Basic { username, password } => {
                let credentials = STANDARD.encode(format!("{}:{}", username, password));
                Some(format!("Basic {}", credentials))
            }
        }
    }
}

/// Webhook configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Endpoint receiving the POSTs
    pub url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Authentication method
    pub auth: AuthMethod,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// User agent string
    pub user_agent: String,
}

impl WebhookConfig {
    /// Create new configuration for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            auth: AuthMethod::None,
            max_retries: 3,
            backoff_base: Duration::from_millis(200),
            user_agent: format!("FieldGate/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set bearer token authentication
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthMethod::Bearer { token: token.into() };
        self
    }

    /// Set basic authentication
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = AuthMethod::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Set request timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Set retry count and first backoff delay
    pub fn retries(mut self, max_retries: u32, backoff_base: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_base = backoff_base;
        self
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Alert notifier posting JSON to a webhook
pub struct WebhookNotifier {
    config: WebhookConfig,
    agent: ureq::Agent,
    stats: ConnectionStats,
}

impl WebhookNotifier {
    /// Create new notifier
    pub fn new(config: WebhookConfig) -> Result<Self, HttpError> {
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            return Err(HttpError::Config("URL must start with http:// or https://".into()));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build();

        Ok(Self {
            config,
            agent,
            stats: ConnectionStats::default(),
        })
    }

    /// Delivery statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// POST `body` with retries
    pub fn post_json<T: Serialize>(&mut self, body: &T) -> Result<(), HttpError> {
        let json = serde_json::to_string(body)?;

        match self.execute_with_retry(&json) {
            Ok(()) => {
                self.stats.record_sent(json.len());
                Ok(())
            }
            Err(e) => {
                self.stats.record_failure(&e);
                Err(e)
            }
        }
    }

    fn build_request(&self) -> ureq::Request {
        let mut request = self
            .agent
            .post(&self.config.url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");

        if let Some(value) = self.config.auth.header_value() {
            request = request.set("Authorization", &value);
        }
        request
    }

    fn execute_with_retry(&self, json: &str) -> Result<(), HttpError> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                thread::sleep(self.config.backoff(attempt));
            }

            match self.build_request().send_string(json) {
                Ok(_) => return Ok(()),
                Err(ureq::Error::Status(code, resp)) => {
                    let error = HttpError::ServerError {
                        status: code,
                        message: resp.into_string().unwrap_or_default(),
                    };
                    if code >= 500 || code == 429 {
                        log::debug!("webhook attempt {} got {}, retrying", attempt + 1, code);
                        last_error = Some(error);
                    } else {
                        return Err(error);
                    }
                }
                Err(ureq::Error::Transport(e)) => {
                    log::debug!("webhook attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(HttpError::Request(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| HttpError::Request("no attempt made".into())))
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn notify(&mut self, alert: &Alert) -> Result<(), ConnectorError> {
        self.post_json(alert).map_err(ConnectorError::from)
    }
}

//! Client configuration and its resolution from explicit options, the
//! environment and built-in defaults.

use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::runtime::{Runtime, env_nonempty};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Maximum number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;

pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_AUTH_TOKEN: &str = "ANTHROPIC_AUTH_TOKEN";
pub const ENV_BASE_URL: &str = "ANTHROPIC_BASE_URL";
pub const ENV_MAX_RETRIES: &str = "ANTHROPIC_MAX_RETRIES";
pub const ENV_TIMEOUT_MS: &str = "ANTHROPIC_TIMEOUT_MS";

/// Backoff schedule for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

/// Explicit, caller-supplied overrides. `None` falls through to the
/// environment and then to the built-in constant.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub initial_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub extra_headers: BTreeMap<String, String>,
    pub extra_query: BTreeMap<String, String>,
    pub extra_body: Map<String, Value>,
}

/// Resolved configuration, read-only once built and safe to share across
/// concurrent calls.
#[derive(Clone)]
pub struct ClientConfig {
    /// Sent as `x-api-key`.
    pub api_key: Option<String>,
    /// Sent as `authorization: Bearer ...`.
    pub auth_token: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub extra_headers: BTreeMap<String, String>,
    pub extra_query: BTreeMap<String, String>,
    pub extra_body: Map<String, Value>,
}

impl ClientConfig {
    /// Built-in constants only; no credentials.
    pub fn builtin() -> Self {
        Self {
            api_key: None,
            auth_token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            extra_headers: BTreeMap::new(),
            extra_query: BTreeMap::new(),
            extra_body: Map::new(),
        }
    }

    /// Built-in constants overlaid with whatever the environment provides.
    #[tracing::instrument(skip(runtime))]
    pub fn from_env(runtime: &dyn Runtime) -> Self {
        Self::resolve(&ClientOptions::default(), runtime)
    }

    /// Resolves every field as: explicit option, then environment, then
    /// built-in constant.
    #[tracing::instrument(skip(options, runtime))]
    pub fn resolve(options: &ClientOptions, runtime: &dyn Runtime) -> Self {
        let builtin = Self::builtin();

        let api_key = options
            .api_key
            .clone()
            .or_else(|| env_nonempty(runtime, ENV_API_KEY));
        let auth_token = options
            .auth_token
            .clone()
            .or_else(|| env_nonempty(runtime, ENV_AUTH_TOKEN));
        let base_url = options
            .base_url
            .clone()
            .or_else(|| env_nonempty(runtime, ENV_BASE_URL))
            .unwrap_or(builtin.base_url);

        let timeout = options
            .timeout
            .or_else(|| env_number(runtime, ENV_TIMEOUT_MS).map(Duration::from_millis))
            .unwrap_or(builtin.timeout);

        let max_retries = options
            .max_retries
            .or_else(|| {
                env_number(runtime, ENV_MAX_RETRIES).and_then(|n| u32::try_from(n).ok())
            })
            .unwrap_or(builtin.retry.max_retries);

        let retry = RetryPolicy {
            max_retries,
            initial_delay: options.initial_delay.unwrap_or(builtin.retry.initial_delay),
            max_delay: options.max_delay.unwrap_or(builtin.retry.max_delay),
        };

        debug!(
            "Resolved client config: base_url={}, api_key={}, auth_token={}, \
             timeout={:?}, retry={:?}",
            base_url,
            api_key.is_some(),
            auth_token.is_some(),
            timeout,
            retry
        );

        Self {
            api_key,
            auth_token,
            base_url,
            timeout,
            retry,
            extra_headers: options.extra_headers.clone(),
            extra_query: options.extra_query.clone(),
            extra_body: options.extra_body.clone(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_query.insert(key.into(), value.into());
        self
    }

    pub fn with_body_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_body.insert(key.into(), value);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

// Credentials stay out of debug output and logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .field("extra_query", &self.extra_query)
            .field("extra_body", &self.extra_body)
            .finish()
    }
}

fn env_number(runtime: &dyn Runtime, key: &str) -> Option<u64> {
    let raw = env_nonempty(runtime, key)?;
    match raw.parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring {}={:?}: expected a non-negative integer", key, raw);
            None
        }
    }
}

//! Request descriptors and the header / URL / body construction shared by the
//! buffered and streaming paths.

use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{ClientConfig, RetryPolicy};
use crate::error::ApiError;

pub const API_VERSION: &str = "2023-06-01";

pub const HEADER_API_VERSION: &str = "anthropic-version";
pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_USER_AGENT: &str = "user-agent";
pub const HEADER_REQUEST_ID: &str = "request-id";

const SENSITIVE_HEADERS: [&str; 2] = [HEADER_API_KEY, HEADER_AUTHORIZATION];

/// One API call: built fresh by each caller and never mutated by the
/// executor.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Per-call headers; these win over every other header source.
    pub headers: BTreeMap<String, String>,
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
            retry: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_query_map(mut self, query: BTreeMap<String, String>) -> Self {
        self.query.extend(query);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Final status and decoded body of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub body: Value,
    pub request_id: Option<String>,
}

/// A descriptor with every per-call setting resolved against the config.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Resolves a descriptor against the client config. Fails with
/// `ValidationError` before any network activity.
pub fn prepare(
    request: &RequestDescriptor,
    config: &ClientConfig,
) -> Result<PreparedRequest, ApiError> {
    let mut query = request.query.clone();
    query.extend(
        config
            .extra_query
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    let url = build_url(&config.base_url, &request.path, &query)?;
    let headers = to_header_map(&build_headers(config, &request.headers))?;
    let body = build_body(request.body.as_ref(), &config.extra_body);

    let prepared = PreparedRequest {
        method: request.method.clone(),
        url,
        headers,
        body,
        timeout: request.timeout.unwrap_or(config.timeout),
        retry: request.retry.unwrap_or(config.retry),
    };
    debug!(
        "Prepared {} {} (timeout {:?}, max_retries {})",
        prepared.method, prepared.url, prepared.timeout, prepared.retry.max_retries
    );
    Ok(prepared)
}

/// Merges headers in increasing priority: defaults, `x-api-key`, bearer
/// auth, config extras, per-call extras. Names are lowercased so collisions
/// are detected regardless of case.
pub fn build_headers(
    config: &ClientConfig,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    headers.insert(HEADER_API_VERSION.to_owned(), API_VERSION.to_owned());
    headers.insert(HEADER_CONTENT_TYPE.to_owned(), "application/json".to_owned());
    headers.insert(HEADER_ACCEPT.to_owned(), "application/json".to_owned());
    headers.insert(HEADER_USER_AGENT.to_owned(), user_agent());

    if let Some(api_key) = &config.api_key {
        headers.insert(HEADER_API_KEY.to_owned(), api_key.clone());
    }
    if let Some(token) = &config.auth_token {
        headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {}", token));
    }

    for (key, value) in config.extra_headers.iter().chain(overrides.iter()) {
        headers.insert(key.trim().to_ascii_lowercase(), value.clone());
    }

    headers
}

pub fn user_agent() -> String {
    format!("anthropic-client/{}", env!("ANTHROPIC_CLIENT_VERSION"))
}

fn to_header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ApiError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ApiError::validation(format!("invalid header name: {:?}", name)))?;
        let mut header_value = HeaderValue::from_str(value)
            .map_err(|_| ApiError::validation(format!("invalid value for header {}", name)))?;
        if SENSITIVE_HEADERS.contains(&name.as_str()) {
            header_value.set_sensitive(true);
        }
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Joins base and path with exactly one `/` and appends the percent-encoded
/// query string when there is one.
pub fn build_url(
    base_url: &str,
    path: &str,
    query: &BTreeMap<String, String>,
) -> Result<Url, ApiError> {
    let path = path.trim().trim_start_matches('/');
    if path.is_empty() {
        return Err(ApiError::validation("request path must not be empty"));
    }

    let joined = format!("{}/{}", base_url.trim().trim_end_matches('/'), path);
    let mut url = Url::parse(&joined)
        .map_err(|e| ApiError::validation(format!("invalid URL {}: {}", joined, e)))?;

    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }

    Ok(url)
}

/// Config-level body params are merged into an object body, overriding the
/// caller's keys. Without a descriptor body nothing is sent.
pub fn build_body(body: Option<&Value>, extra: &Map<String, Value>) -> Option<Value> {
    match body? {
        Value::Object(fields) if !extra.is_empty() => {
            let mut merged = fields.clone();
            merged.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(Value::Object(merged))
        }
        other => Some(other.clone()),
    }
}

/// Guards path identifiers supplied by the endpoint layer, e.g. a message
/// batch id, before they are interpolated into a path.
pub fn require_id<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str, ApiError> {
    match value.map(str::trim) {
        Some(id) if !id.is_empty() && !id.contains('/') => Ok(id),
        Some(id) if id.contains('/') => Err(ApiError::validation(format!(
            "{} must not contain '/': {:?}",
            name, id
        ))),
        _ => Err(ApiError::validation(format!("{} is required", name))),
    }
}

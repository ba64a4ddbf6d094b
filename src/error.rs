//! Typed failures surfaced by the request executor, the event stream and the
//! pagination traversal.

use serde_json::Value;
use std::fmt;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// HTTP 400
    BadRequest,
    /// HTTP 401
    Authentication,
    /// HTTP 403
    PermissionDenied,
    /// HTTP 404
    NotFound,
    /// HTTP 409
    Conflict,
    /// HTTP 422
    UnprocessableEntity,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    InternalServer,
    /// Informational (< 200) final status
    UnexpectedStatus,
    /// Any other non-2xx status
    ApiError,
    /// Connection refused, timeout, DNS failure, broken read
    TransportFailure,
    /// Rejected locally before any network call
    ValidationError,
}

impl ErrorKind {
    /// Maps a final (non-2xx) HTTP status to its failure category.
    pub fn from_status(status: u16) -> ErrorKind {
        match status {
            s if s < 200 => ErrorKind::UnexpectedStatus,
            400 => ErrorKind::BadRequest,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::PermissionDenied,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            422 => ErrorKind::UnprocessableEntity,
            429 => ErrorKind::RateLimit,
            s if s >= 500 => ErrorKind::InternalServer,
            _ => ErrorKind::ApiError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::BadRequest => "Bad request",
            ErrorKind::Authentication => "Authentication failed",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::NotFound => "Not found",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::UnprocessableEntity => "Unprocessable entity",
            ErrorKind::RateLimit => "Rate limit exceeded",
            ErrorKind::InternalServer => "Internal server error",
            ErrorKind::UnexpectedStatus => "Unexpected status",
            ErrorKind::ApiError => "API error",
            ErrorKind::TransportFailure => "Transport failure",
            ErrorKind::ValidationError => "Invalid request",
        };
        f.write_str(name)
    }
}

/// A failed call: the category plus the HTTP status and raw body when the
/// server answered.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    status: Option<u16>,
    body: Option<Value>,
    request_id: Option<String>,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ApiError {
    /// Builds the error for a final non-2xx response.
    pub fn from_response(status: u16, body: Value, request_id: Option<String>) -> Self {
        let message = error_message(&body).unwrap_or_else(|| format!("HTTP {}", status));
        Self {
            kind: ErrorKind::from_status(status),
            status: Some(status),
            body: Some(body),
            request_id,
            message,
            source: None,
        }
    }

    pub fn transport(error: reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            format!("request timed out: {}", error)
        } else if error.is_connect() {
            format!("connection failed: {}", error)
        } else {
            error.to_string()
        };
        Self {
            kind: ErrorKind::TransportFailure,
            status: None,
            body: None,
            request_id: None,
            message,
            source: Some(Box::new(error)),
        }
    }

    /// A transport failure without an underlying `reqwest::Error`, e.g. an
    /// elapsed connect deadline.
    pub fn transport_message(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::TransportFailure,
            status: None,
            body: None,
            request_id: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ValidationError,
            status: None,
            body: None,
            request_id: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Raw decoded response body, if the server answered.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Value of the `request-id` response header, for support tickets.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.kind, status, self.message)?,
            None => write!(f, "{}: {}", self.kind, self.message)?,
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " [request-id: {}]", request_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Pulls `error.message` out of the API's error envelope:
/// `{"type": "error", "error": {"type": "...", "message": "..."}}`.
fn error_message(body: &Value) -> Option<String> {
    match body {
        Value::Object(_) => body
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(|message| message.as_str())
            .map(ToString::to_string),
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

//! HTTP client that executes request descriptors with bounded retry and maps
//! the outcome to a decoded body or a typed error.

use futures_util::StreamExt;
use log::debug;
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use super::request::{
    HEADER_REQUEST_ID, PreparedRequest, RequestDescriptor, ResponseEnvelope, prepare,
};
use super::retry::with_retry;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::sse::EventStream;

/// Thin wrapper over a shared `reqwest::Client`. Holds no per-call state,
/// so one instance may serve any number of concurrent calls.
#[derive(Clone, Default)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Executes one call: prepare, retry transient outcomes, interpret the
    /// final status.
    #[tracing::instrument(
        skip(self, request, config),
        fields(method = %request.method, path = %request.path)
    )]
    pub async fn execute(
        &self,
        request: &RequestDescriptor,
        config: &ClientConfig,
    ) -> Result<Value, ApiError> {
        let prepared = prepare(request, config)?;
        let envelope = self.send_with_retry(&prepared).await?;
        interpret(envelope)
    }

    /// Runs the retry loop and returns the final envelope, whatever its
    /// status. Only transport failures surface as errors here.
    pub async fn send_with_retry(
        &self,
        prepared: &PreparedRequest,
    ) -> Result<ResponseEnvelope, ApiError> {
        let operation_name = format!("{} {}", prepared.method, prepared.url.path());
        with_retry(&operation_name, &prepared.retry, |attempt| {
            self.send_once(prepared, attempt)
        })
        .await
    }

    /// Single attempt without retry.
    async fn send_once(
        &self,
        prepared: &PreparedRequest,
        attempt: u32,
    ) -> Result<ResponseEnvelope, ApiError> {
        debug!("{} {} (attempt {})...", prepared.method, prepared.url, attempt + 1);

        let response = self
            .request_builder(prepared)
            .timeout(prepared.timeout)
            .send()
            .await
            .map_err(ApiError::transport)?;

        let status = response.status().as_u16();
        let request_id = request_id(&response);
        let bytes = response.bytes().await.map_err(ApiError::transport)?;

        debug!("{} {} -> HTTP {} ({} bytes)", prepared.method, prepared.url, status, bytes.len());

        Ok(ResponseEnvelope {
            status,
            body: decode_body(&bytes),
            request_id,
        })
    }

    /// Opens a persistent event-stream connection. Never retried; the
    /// configured timeout bounds only the wait for response headers. The body
    /// is sent as given, so asking the server to stream is up to the caller.
    #[tracing::instrument(
        skip(self, request, config),
        fields(method = %request.method, path = %request.path)
    )]
    pub async fn open_stream(
        &self,
        request: &RequestDescriptor,
        config: &ClientConfig,
    ) -> Result<EventStream, ApiError> {
        let mut prepared = prepare(request, config)?;
        prepared
            .headers
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        debug!("Opening event stream {} {}...", prepared.method, prepared.url);

        let send = self.request_builder(&prepared).send();
        let response = tokio::time::timeout(prepared.timeout, send)
            .await
            .map_err(|_| {
                ApiError::transport_message(format!(
                    "no response headers within {}ms",
                    prepared.timeout.as_millis()
                ))
            })?
            .map_err(ApiError::transport)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let request_id = request_id(&response);
            let body = match response.bytes().await {
                Ok(bytes) => decode_body(&bytes),
                Err(e) => {
                    debug!("Failed to read error body of event stream: {}", e);
                    Value::Null
                }
            };
            return Err(ApiError::from_response(status, body, request_id));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ApiError::transport));

        Ok(EventStream::from_byte_stream(chunks.boxed()))
    }

    fn request_builder(&self, prepared: &PreparedRequest) -> RequestBuilder {
        let builder = self
            .client
            .request(prepared.method.clone(), prepared.url.clone())
            .headers(prepared.headers.clone());

        match &prepared.body {
            Some(body) => builder.json(body),
            None => builder,
        }
    }
}

/// Maps a final envelope to the decoded body or a typed error.
pub fn interpret(envelope: ResponseEnvelope) -> Result<Value, ApiError> {
    if (200..300).contains(&envelope.status) {
        Ok(envelope.body)
    } else {
        Err(ApiError::from_response(
            envelope.status,
            envelope.body,
            envelope.request_id,
        ))
    }
}

/// Empty bodies become `null`; bodies that are not JSON are kept as text.
fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn request_id(response: &Response) -> Option<String> {
    response
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

//! Client core for a generative-AI HTTP API: a retrying request executor, a
//! server-sent event decoder for streaming responses, and lazy traversal of
//! cursor-paginated list endpoints.
//!
//! Endpoint-specific payloads are left to the caller, which hands the
//! executor a [`http::RequestDescriptor`] and receives either the decoded
//! JSON body or an [`error::ApiError`].

pub mod config;
pub mod error;
pub mod http;
pub mod pagination;
pub mod runtime;
pub mod sse;

pub use config::{ClientConfig, ClientOptions, RetryPolicy};
pub use error::{ApiError, ErrorKind};
pub use http::{HttpClient, RequestDescriptor, ResponseEnvelope};
pub use pagination::{Cursor, FetchFn, FetchPage, HttpPageFetcher, ItemStream, PageStream};
pub use sse::{EventData, EventStream, SseEvent};

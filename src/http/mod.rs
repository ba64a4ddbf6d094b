//! Request executor: descriptor preparation, retry with backoff, and status
//! interpretation.

mod client;
mod request;
mod retry;

pub use client::{HttpClient, interpret};
pub use request::{
    API_VERSION, PreparedRequest, RequestDescriptor, ResponseEnvelope, build_body, build_headers,
    build_url, prepare, require_id,
};
pub use retry::{RETRYABLE_STATUSES, backoff_delay, is_retryable_status, with_retry};

//! Building blocks for the HTTP request a worker sends to a webhook target.
//!
//! Header names and the retry/status classification live here so both the
//! executor and its tests can share them without depending on the worker
//! binary's error types.

use http::StatusCode;
use thiserror::Error;

use crate::model::ScheduledJob;

/// Carries the payload's signature, when the job has one. Reserved for
/// forward-compatible signature verification on the receiver's end.
pub const HEADER_PAYLOAD_SIG: &str = "X-HERMESHOOKS-PAYLOAD-SIG";

/// Reserved for a server-computed signature over the payload. Always empty
/// today, included for forward compatibility.
pub const HEADER_SIG: &str = "X-HERMESHOOKS-SIG";

pub const USER_AGENT: &str = "hermeshook worker";

#[derive(Error, Debug)]
pub enum WebhookBuildError {
    #[error("invalid content-type header value: {0}")]
    InvalidContentType(http::header::InvalidHeaderValue),
    #[error("invalid signature header value: {0}")]
    InvalidSignature(http::header::InvalidHeaderValue),
    #[error("invalid target url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Build the POST request for delivering `job`, not yet sent.
pub fn build_request(
    client: &reqwest::Client,
    job: &ScheduledJob,
) -> Result<reqwest::RequestBuilder, WebhookBuildError> {
    let url: reqwest::Url = job.url.parse()?;

    let content_type: http::HeaderValue = job
        .content_type
        .parse()
        .map_err(WebhookBuildError::InvalidContentType)?;
    let signature: http::HeaderValue = job
        .signature
        .as_deref()
        .unwrap_or("")
        .parse()
        .map_err(WebhookBuildError::InvalidSignature)?;

    let request = client
        .post(url)
        .header(http::header::CONTENT_TYPE, content_type)
        .header(HEADER_PAYLOAD_SIG, signature)
        .header(HEADER_SIG, "")
        .body(job.payload.clone());

    Ok(request)
}

/// A response is retryable only if the request failed in transport or the
/// target answered with a server error. Everything else — including 4xx — is
/// accepted as terminal.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

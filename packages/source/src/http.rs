//! Single-shot HTTP helpers for the remote data services.
//!
//! Every remote query goes through [`send`], which performs exactly one
//! request: no retries and no backoff. Callers that want retry semantics
//! wrap the whole query at a higher level. Requests are always marked
//! `no-cache` so intermediate caches cannot serve stale rows.
//!
//! # Cancellation
//!
//! The returned futures hold no state outside themselves. Dropping one
//! (for example when a superseded request is abandoned) closes the
//! connection and leaves nothing behind.

use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};

use crate::SourceError;

/// Maximum length of a response body kept for error reporting.
pub const BODY_PREVIEW_LEN: usize = 500;

/// Builds the shared HTTP client.
///
/// # Errors
///
/// Returns [`SourceError::Http`] if the TLS backend cannot be initialized.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, SourceError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("crash-map/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Marks a request so that no cache between us and the origin answers it.
#[must_use]
pub fn no_cache(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    request
        .header(CACHE_CONTROL, "no-cache")
        .header(PRAGMA, "no-cache")
}

/// A fully read response.
#[derive(Debug)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body text.
    pub body: String,
}

impl RawResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Checks the status without consuming the response.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Upstream`] carrying the status and body
    /// preview when the status is not 2xx.
    pub fn check_status(&self, label: &str) -> Result<(), SourceError> {
        if self.is_success() {
            return Ok(());
        }
        Err(SourceError::Upstream {
            status: self.status,
            message: format!("{label} returned HTTP {}", self.status),
            body: non_empty_preview(&self.body),
        })
    }

    /// Converts a non-2xx response into [`SourceError::Upstream`].
    ///
    /// # Errors
    ///
    /// See [`RawResponse::check_status`].
    pub fn error_for_status(self, label: &str) -> Result<Self, SourceError> {
        self.check_status(label)?;
        Ok(self)
    }
}

/// Sends one request and reads the whole body as text.
///
/// Non-2xx statuses are not errors at this level; the caller decides how
/// to report them.
///
/// # Errors
///
/// Returns [`SourceError::Http`] on connection failure, timeout, or if the
/// body cannot be read.
pub async fn send(request: reqwest::RequestBuilder) -> Result<RawResponse, SourceError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response.text().await?;

    log::debug!(
        "HTTP {status} ({} bytes, content-type={content_type:?})",
        body.len()
    );

    Ok(RawResponse { status, body })
}

/// Truncates a body to [`BODY_PREVIEW_LEN`] characters for diagnostics.
#[must_use]
pub fn body_preview(text: &str) -> String {
    if text.chars().count() > BODY_PREVIEW_LEN {
        let head: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Like [`body_preview`], but `None` for blank bodies.
#[must_use]
pub fn non_empty_preview(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(body_preview(text))
    }
}

//! [`reqwest`]-backed implementation of [`HttpClient`].

use std::time::Duration;

use futures::FutureExt;

use super::{HttpClient, HttpResponse};
use crate::{CONNECT_TIMEOUT, READ_TIMEOUT};

/// Error type for the reqwest-based HTTP client.
#[derive(Debug, thiserror::Error)]
#[error("HTTP request failed: {0}")]
pub struct ReqwestHttpError(#[from] reqwest::Error);

/// A [`reqwest`]-backed [`HttpClient`] configured for long-poll traffic:
/// 15 second connect timeout, 120 second read timeout, redirects refused.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client with the transport's default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::with_read_timeout(READ_TIMEOUT)
    }

    /// Create a client with a custom read timeout. The server may hold any
    /// response open up to this long before the poll fails.
    #[must_use]
    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        Self {
            inner: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(read_timeout)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    type Error = ReqwestHttpError;

    fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> futures::future::BoxFuture<'static, Result<HttpResponse, Self::Error>> {
        let mut builder = self.inner.post(url);
        for &(name, value) in headers {
            builder = builder.header(name, value);
        }
        builder = builder.body(body);

        async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?.to_vec();

            Ok(HttpResponse { status, body })
        }
        .boxed()
    }
}

//! Minimal async HTTP client abstraction for the long-poll engine.
//!
//! The engine only ever POSTs, and it needs to park a request whose
//! response the server may hold open for a long time. Abstracting the
//! client keeps the state machine testable against a scripted transport
//! while production traffic goes through [`ReqwestHttpClient`].

use futures::future::BoxFuture;

pub mod reqwest_client;

pub use reqwest_client::{ReqwestHttpClient, ReqwestHttpError};

/// A minimal async HTTP client for POST requests.
///
/// Implementations handle the mechanics of making HTTP requests (TLS,
/// connection pooling, timeouts) while this trait exposes only what the
/// long-poll transport needs.
pub trait HttpClient: Clone + Send + Sync + 'static {
    /// The error type for HTTP operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send an HTTP POST and resolve to the eventual response.
    ///
    /// The returned future must be `'static`: the engine spawns it so the
    /// request goes on the wire immediately, then parks the in-flight
    /// exchange as the next receive channel while the server holds the
    /// response open.
    fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> BoxFuture<'static, Result<HttpResponse, Self::Error>>;
}

/// A minimal HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,

    /// The response body bytes.
    pub body: Vec<u8>,
}

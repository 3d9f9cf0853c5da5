//! A URL as a socket address.

use std::fmt;
use std::hash::{Hash, Hasher};

use url::Url;

/// The address of an HTTP messaging endpoint.
///
/// Equality and hashing are defined by the external string form of the
/// URL, so two addresses compare equal exactly when they serialize to the
/// same text.
#[derive(Debug, Clone)]
pub struct UrlSocketAddress {
    url: Url,
}

impl UrlSocketAddress {
    /// Wrap an endpoint URL.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// The underlying URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl PartialEq for UrlSocketAddress {
    fn eq(&self, other: &Self) -> bool {
        self.url.as_str() == other.url.as_str()
    }
}

impl Eq for UrlSocketAddress {}

impl Hash for UrlSocketAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.as_str().hash(state);
    }
}

impl fmt::Display for UrlSocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

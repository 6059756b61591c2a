use std::fmt;
use std::time::SystemTime;

use url::Url;

use crate::error::IoError;

/// A slide URL plus the credential needed to read it.
///
/// Immutable for the life of a request. The credential is sent as the
/// `Authorization` header of every range request and never leaves this
/// struct otherwise: [`RemoteSource::cache_identity`] and the `Debug` output
/// both omit it, and signed-URL query strings are stripped from identities.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteSource {
    url: Url,
    authorization: Option<String>,
    expires_at: Option<SystemTime>,
}

impl RemoteSource {
    /// Wrap an already parsed URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            authorization: None,
            expires_at: None,
        }
    }

    /// Parse a slide URL. Only `http` and `https` are accepted.
    pub fn parse(url: &str) -> Result<Self, IoError> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| IoError::InvalidSource(format!("{}: {}", redact(url), e)))?;

        match parsed.scheme() {
            "http" | "https" => Ok(Self::new(parsed)),
            other => Err(IoError::InvalidSource(format!(
                "unsupported URL scheme '{}'",
                other
            ))),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(self, token: impl AsRef<str>) -> Self {
        self.with_authorization(format!("Bearer {}", token.as_ref()))
    }

    /// Send a raw `Authorization` header value with every request.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Reject the source without any network traffic once `at` has passed.
    pub fn with_expiry(mut self, at: SystemTime) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// Whether the credential is expired at `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Fail with `PermissionDenied` when the credential has expired.
    pub fn ensure_usable(&self) -> Result<(), IoError> {
        if self.is_expired_at(SystemTime::now()) {
            return Err(IoError::PermissionDenied(format!(
                "credential for {} has expired",
                self.cache_identity()
            )));
        }
        Ok(())
    }

    /// The URL without query string or fragment.
    ///
    /// Used as structural cache key and in logs. Signed URLs carry their
    /// signature in the query, so it never ends up in either.
    pub fn cache_identity(&self) -> String {
        let mut url = self.url.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    }
}

impl fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSource")
            .field("url", &self.cache_identity())
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn redact(raw: &str) -> &str {
    raw.split('?').next().unwrap_or(raw)
}

//! Rate limit requests and counter key derivation.

use serde::{Deserialize, Serialize};

/// Namespace prefix shared by every counter key.
pub const KEY_PREFIX: &str = "rate_limit";
/// Delimiter between key segments.
pub const KEY_DELIMITER: char = ':';

/// The identity tuple a rate limit decision is made for.
///
/// Any string is accepted, including empty ones. Empty fields simply collapse
/// onto a shared key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitRequest {
    /// The resource being accessed, e.g. a URL or endpoint identifier
    pub resource: String,
    /// The calling client
    pub client_id: String,
    /// The user on whose behalf the client calls
    pub user_id: String,
}

impl RateLimitRequest {
    /// Create a new request.
    pub fn new(
        resource: impl Into<String>,
        client_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            client_id: client_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Derive the counter key for this request.
    pub fn key(&self) -> RateLimitKey {
        RateLimitKey::new(self)
    }
}

/// The store key a request's counter lives under.
///
/// Format: `rate_limit:{client_id}:{user_id}:{resource}`. Segments are not
/// escaped, so a field containing `:` can collide with a different tuple.
/// Existing deployments depend on this exact layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Build the key for a request.
    pub fn new(request: &RateLimitRequest) -> Self {
        Self(format!(
            "{prefix}{d}{client}{d}{user}{d}{resource}",
            prefix = KEY_PREFIX,
            d = KEY_DELIMITER,
            client = request.client_id,
            user = request.user_id,
            resource = request.resource,
        ))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key and return the owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

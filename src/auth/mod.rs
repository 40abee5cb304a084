use dashmap::DashMap;
use futures::future::{ready, BoxFuture, FutureExt};
use serde_json::Value;


/// Outcome of a join authorization check. The protocol engine only consumes
/// the granted/denied outcome plus the identity or reason string.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthOutcome {
    Granted { identity: String },
    Denied { reason: String },
}

/// External authorization collaborator consulted on every phx_join.
///
/// Boxed future so implementations may call out to a remote validator; the
/// session bounds the call with the configured join timeout either way.
pub trait JoinAuthorizer: Send + Sync + 'static {
    fn authorize<'a>(&'a self, credential: Option<&'a str>) -> BoxFuture<'a, AuthOutcome>;
}

/// Static token -> identity table loaded from config at startup.
pub struct TokenAuthorizer {
    tokens: DashMap<String, String>,
}

impl TokenAuthorizer {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    /// Build from the config's token table.
    pub fn from_tokens(tokens: impl IntoIterator<Item = (String, String)>) -> Self {
        let authorizer = Self::new();
        for (token, identity) in tokens {
            authorizer.tokens.insert(token, identity);
        }
        authorizer
    }

    pub fn register(&self, token: &str, identity: &str) {
        self.tokens.insert(token.to_string(), identity.to_string());
    }
}

impl Default for TokenAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinAuthorizer for TokenAuthorizer {
    fn authorize<'a>(&'a self, credential: Option<&'a str>) -> BoxFuture<'a, AuthOutcome> {
        let outcome = match credential {
            None => AuthOutcome::Denied {
                reason: "missing_token".to_string(),
            },
            Some(token) => match self.tokens.get(token) {
                Some(identity) => AuthOutcome::Granted {
                    identity: identity.clone(),
                },
                None => AuthOutcome::Denied {
                    reason: "invalid_token".to_string(),
                },
            },
        };
        ready(outcome).boxed()
    }
}

/// Extract the credential from a phx_join payload.
///
/// Expected format: {"token": "<string>", ...}
pub fn extract_token(payload: &Value) -> Result<String, TokenError> {
    let token = payload
        .get("token")
        .ok_or(TokenError::Missing)?
        .as_str()
        .ok_or(TokenError::InvalidFormat)?;

    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Parse a bearer token from an Authorization header value.
///
/// Used by the admin surface. Expected format: "Bearer <token>"
pub fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if parts[0].to_lowercase() != "bearer" {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Token field or Authorization header not present
    Missing,
    /// Invalid format (non-string token or not "Bearer <token>")
    InvalidFormat,
    /// Token is empty string
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}

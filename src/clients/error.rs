//! Errors raised by download client adapters.

use thiserror::Error;

use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure after retries.
    #[error("{client}: {source}")]
    Http {
        client: String,
        #[source]
        source: HttpError,
    },

    /// Credentials rejected or session could not be re-established.
    #[error("{client}: authentication failed: {message}")]
    Auth { client: String, message: String },

    /// The client cannot be used for the rest of this run (e.g. Deluge web UI
    /// has no daemon to talk to).
    #[error("{client}: {message}")]
    Fatal { client: String, message: String },

    /// The client answered, but not with anything we understand.
    #[error("{client}: unexpected response: {message}")]
    Protocol { client: String, message: String },

    #[error("{client}: {operation} is not supported")]
    Unsupported {
        client: String,
        operation: &'static str,
    },
}

impl ClientError {
    pub fn http(client: impl Into<String>, source: HttpError) -> Self {
        Self::Http {
            client: client.into(),
            source,
        }
    }

    pub fn auth(client: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            client: client.into(),
            message: message.into(),
        }
    }

    pub fn fatal(client: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            client: client.into(),
            message: message.into(),
        }
    }

    pub fn protocol(client: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            client: client.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(client: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            client: client.into(),
            operation,
        }
    }

    /// The adapter should be dropped for the remainder of the run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::Auth { .. })
    }

    /// Session rejected (explicit auth failure or 401/403).
    #[must_use]
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Auth { .. } => true,
            Self::Http { source, .. } => source.is_auth(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_from_http_status() {
        let error = ClientError::http("qbit", HttpError::status("http://x", 403, "Forbidden"));
        assert!(error.is_auth());
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_fatal_and_auth_are_fatal() {
        assert!(ClientError::fatal("deluge", "no hosts").is_fatal());
        assert!(ClientError::auth("deluge", "bad password").is_fatal());
        assert!(!ClientError::protocol("deluge", "?").is_fatal());
    }

    #[test]
    fn test_display_includes_client() {
        let error = ClientError::fatal("deluge-main", "no daemon hosts configured");
        assert_eq!(error.to_string(), "deluge-main: no daemon hosts configured");
    }
}

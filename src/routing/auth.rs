//! Credentials injected into requests forwarded to a site.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::config::{AuthConfig, ConfigError};
use crate::http::headers::Headers;

/// Supported credential schemes.
///
/// Adding a scheme means adding a variant here and teaching
/// [`Auth::apply`] how it is sent; the compiler points at every match that
/// needs to learn about it.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Basic { username: String, password: String },
}

impl Auth {
    /// Writes the credential headers onto an outgoing request.
    pub fn apply(&self, headers: &mut Headers) {
        match self {
            Auth::Basic { username, password } => {
                headers.set("Authorization", basic_authorization(username, password));
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Auth::Basic { .. } => "basic",
        }
    }
}

// Credentials never reach logs.
impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl TryFrom<&AuthConfig> for Auth {
    type Error = ConfigError;

    fn try_from(config: &AuthConfig) -> Result<Self, Self::Error> {
        match config.kind.to_ascii_lowercase().as_str() {
            "basic" => {
                let username = config
                    .username
                    .clone()
                    .ok_or_else(|| ConfigError::MissingAuthField {
                        kind: "basic".to_string(),
                        field: "username",
                    })?;
                let password = config
                    .password
                    .clone()
                    .ok_or_else(|| ConfigError::MissingAuthField {
                        kind: "basic".to_string(),
                        field: "password",
                    })?;
                Ok(Auth::Basic { username, password })
            }
            other => Err(ConfigError::UnsupportedAuthVariant(other.to_string())),
        }
    }
}

/// `Basic` followed by the base64 of `username:password`.
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

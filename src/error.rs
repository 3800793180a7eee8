/// Okta error code for an unknown or expired state token.
const EXPIRED_STATE_TOKEN: &str = "E0000011";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Identify, factor, authorize or token exchange step rejected by the provider.
    #[error("Login error ({code}): {message}")]
    Login { code: String, message: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token verification error: {0}")]
    Token(String),
    #[error("Token store error: {0}")]
    Store(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),
    #[error("Session is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

impl Error {
    pub(crate) fn login(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Login {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether the provider no longer recognizes the login attempt's state token.
    ///
    /// The pending OTP attempt cannot be resumed; the caller has to restart from
    /// [`login_with_id`](crate::IecSession::login_with_id).
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::Login { code, .. } if code == EXPIRED_STATE_TOKEN)
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipewatchError {
    #[error("API rejected credentials (status {status})")]
    Auth { status: u16 },

    #[error("API request failed: {0}")]
    Transport(String),

    #[error("Malformed API response: {0}")]
    Malformed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipewatchError {
    /// Whether this failure means the current credential is no longer usable.
    ///
    /// Callers use this to decide between invalidating the credential
    /// (auth failures) and leaving it untouched (transient failures).
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

impl From<reqwest::Error> for PipewatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, PipewatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_terminal_for_the_credential() {
        assert!(PipewatchError::Auth { status: 403 }.is_auth());
        assert!(!PipewatchError::Transport("connection reset".into()).is_auth());
        assert!(!PipewatchError::Malformed("unexpected EOF".into()).is_auth());
    }
}

use std::fmt;
use std::sync::Mutex;

use console::Term;
use log::{debug, info};

use crate::error::{PipewatchError, Result};

/// Opaque Bitbucket app credential (base64 `user:app-password` pair).
///
/// Sent verbatim in the `Authorization: Basic` header. The `Debug` impl
/// redacts the value so tokens never leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// Session-scoped credential holder shared between the API client and the
/// refresh loop.
///
/// The refresh loop calls [`CredentialStore::invalidate`] when the API
/// rejects the credential, so the next loop iteration re-prompts instead of
/// hammering the API with a dead token.
pub struct CredentialStore {
    token: Mutex<Option<Token>>,
}

impl CredentialStore {
    pub fn new(token: Option<Token>) -> Self {
        Self {
            token: Mutex::new(token),
        }
    }

    pub fn get(&self) -> Option<Token> {
        self.token.lock().unwrap().clone()
    }

    pub fn set(&self, token: Token) {
        *self.token.lock().unwrap() = Some(token);
    }

    /// Drops the current credential. Called on auth failures only.
    pub fn invalidate(&self) {
        info!("Invalidating rejected credential");
        *self.token.lock().unwrap() = None;
    }

    /// Returns the stored credential, prompting on the terminal if none is
    /// present.
    ///
    /// # Errors
    ///
    /// Returns a config error when the terminal is unavailable or the user
    /// submits an empty credential.
    pub fn get_or_prompt(&self) -> Result<Token> {
        if let Some(token) = self.get() {
            return Ok(token);
        }

        let term = Term::stderr();
        term.write_str("Enter authorisation token: ")
            .map_err(|e| PipewatchError::Config(format!("Cannot prompt for token: {e}")))?;

        let entered = term
            .read_secure_line()
            .map_err(|e| PipewatchError::Config(format!("Cannot read token: {e}")))?;

        if entered.trim().is_empty() {
            return Err(PipewatchError::Config(
                "No authorisation token specified".to_string(),
            ));
        }

        debug!("Credential entered interactively");
        let token = Token::from(entered.trim());
        self.set(token.clone());

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let token = Token::from("c2VjcmV0");
        assert_eq!(format!("{token:?}"), "Token(<redacted>)");
    }

    #[test]
    fn test_invalidate_clears_credential() {
        let store = CredentialStore::new(Some(Token::from("abc")));
        assert!(store.get().is_some());

        store.invalidate();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_set_replaces_credential() {
        let store = CredentialStore::new(None);
        store.set(Token::from("first"));
        store.set(Token::from("second"));
        assert_eq!(store.get().unwrap().as_str(), "second");
    }
}

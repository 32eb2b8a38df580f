//! Local login gate
//!
//! The gate only checks that both fields were filled in. The credentials are
//! kept in memory for the lifetime of the session and are later sent as Basic
//! authentication to the analysis endpoint, which is the party that actually
//! validates them.

use crate::error::CamlinkError;

/// Message shown when the login form is submitted with a blank field
pub const LOGIN_REQUIRED_MESSAGE: &str = "please fill in username and password";

/// Username and password held for the current session
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create credentials from raw form input
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Username as typed
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password as typed
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether both fields contain something other than whitespace
    pub fn is_filled(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.trim().is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Login gate state
#[derive(Debug, Default)]
pub struct SessionGate {
    active: Option<Credentials>,
}

impl SessionGate {
    /// Create a logged-out gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to log in. Both values must be non-blank; they are stored untrimmed.
    pub fn login(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<&Credentials, CamlinkError> {
        let credentials = Credentials::new(username, password);
        if !credentials.is_filled() {
            return Err(CamlinkError::LoginRejected {
                reason: LOGIN_REQUIRED_MESSAGE.to_string(),
            });
        }

        tracing::info!("User {} logged in", credentials.username());
        Ok(self.active.insert(credentials))
    }

    /// Drop the active credentials. Returns whether a session was active.
    pub fn logout(&mut self) -> bool {
        match self.active.take() {
            Some(credentials) => {
                tracing::info!("User {} logged out", credentials.username());
                true
            }
            None => false,
        }
    }

    /// Whether a user is logged in
    pub fn is_logged_in(&self) -> bool {
        self.active.is_some()
    }

    /// Active credentials
    pub fn credentials(&self) -> Result<&Credentials, CamlinkError> {
        self.active.as_ref().ok_or(CamlinkError::NotAuthenticated)
    }
}

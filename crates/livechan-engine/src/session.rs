use std::fmt;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::Result;

/// Session state shared by every outbound message of a connection.
///
/// The session id is opaque credential material and redacted in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: Option<String>,
    pub environment: String,
    pub server_address: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Session");
        if let Some(id) = &self.session_id {
            dbg.field("session_id", &format_args!("<redacted:{} bytes>", id.len()));
        } else {
            dbg.field("session_id", &Option::<String>::None);
        }
        dbg.field("environment", &self.environment)
            .field("server_address", &self.server_address)
            .finish()
    }
}

impl Session {
    /// Build the session from configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            session_id: config.stored_session_id.clone(),
            environment: config.environment.clone(),
            server_address: config.server_address()?.to_string(),
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Replace the session id. Returns true when it changed.
    pub fn update(&mut self, session_id: &str) -> bool {
        if self.session_id.as_deref() == Some(session_id) {
            return false;
        }
        self.session_id = Some(session_id.to_string());
        true
    }
}

/// Login credentials handed to an [`Authenticator`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field(
                "secret",
                &format_args!("<redacted:{} bytes>", self.secret.len()),
            )
            .finish()
    }
}

/// Successful authentication result.
#[derive(Clone, PartialEq)]
pub struct AuthGrant {
    pub session_id: String,
    /// Whatever else the authentication service returned.
    pub data: Value,
}

impl fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGrant")
            .field(
                "session_id",
                &format_args!("<redacted:{} bytes>", self.session_id.len()),
            )
            .field("data", &self.data)
            .finish()
    }
}

/// External authentication service.
pub trait Authenticator: Send {
    /// Exchange credentials for a session id.
    fn open(&mut self, credentials: &Credentials) -> Result<AuthGrant>;

    /// End a session. Returns whether the session was logged out.
    fn shut(&mut self, session_id: &str) -> Result<bool>;
}

impl<T: Authenticator + ?Sized> Authenticator for Box<T> {
    fn open(&mut self, credentials: &Credentials) -> Result<AuthGrant> {
        (**self).open(credentials)
    }

    fn shut(&mut self, session_id: &str) -> Result<bool> {
        (**self).shut(session_id)
    }
}

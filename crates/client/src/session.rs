//! Explicit session context passed into every remote operation.
//!
//! There is no ambient credential: the caller owns a [`Session`] value and
//! replaces it wholesale on login, logout, or expiry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A bearer token and the user it was issued to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub username: String,
}

impl Credential {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
        }
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

// Keeps tokens out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("username", &self.username)
            .finish()
    }
}

/// An error that may signal the credential is no longer accepted.
pub trait InvalidatesSession {
    fn invalidates_session(&self) -> bool;
}

/// The caller's authentication state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    /// Not logged in, or the credential was invalidated.
    #[default]
    Anonymous,
    /// Logged in with a bearer credential.
    Authenticated(Credential),
}

impl Session {
    /// The credential, if logged in.
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Session::Authenticated(c) => Some(c),
            Session::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated(_))
    }

    pub fn username(&self) -> Option<&str> {
        self.credential().map(|c| c.username.as_str())
    }

    /// Consumes the session and returns the "no session" value.
    pub fn invalidate(self) -> Session {
        Session::Anonymous
    }

    /// The session to keep using after `err`: anonymous if the credential
    /// was rejected, otherwise unchanged.
    pub fn after_error(self, err: &dyn InvalidatesSession) -> Session {
        if err.invalidates_session() {
            self.invalidate()
        } else {
            self
        }
    }
}

impl From<Option<Credential>> for Session {
    fn from(credential: Option<Credential>) -> Self {
        match credential {
            Some(c) => Session::Authenticated(c),
            None => Session::Anonymous,
        }
    }
}

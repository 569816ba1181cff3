//! Client authentication for the handshake channel.

use serde::Deserialize;

/// Credentials presented with `connect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    /// User name.
    #[serde(default)]
    pub user: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
}

impl Credentials {
    /// Builds a user/password pair.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            password: Some(password.into()),
        }
    }
}

/// Decides whether a client may attach.
pub trait Auth: Send + Sync {
    /// Whether `connect` must carry credentials.
    fn requires_authentication(&self) -> bool;

    /// Whether the presented credentials grant debugging rights.
    fn user_can_debug(&self, credentials: &Credentials) -> bool;
}

/// Lets everyone in.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Auth for AllowAll {
    fn requires_authentication(&self) -> bool {
        false
    }

    fn user_can_debug(&self, _credentials: &Credentials) -> bool {
        true
    }
}

/// A single fixed user/password pair.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    user: String,
    password: String,
}

impl StaticCredentials {
    /// Accepts exactly `user` / `password`.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl Auth for StaticCredentials {
    fn requires_authentication(&self) -> bool {
        true
    }

    fn user_can_debug(&self, credentials: &Credentials) -> bool {
        credentials.user.as_deref() == Some(self.user.as_str())
            && credentials.password.as_deref() == Some(self.password.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credentials_need_exact_match() {
        let auth = StaticCredentials::new("ann", "pw");
        assert!(auth.requires_authentication());
        assert!(auth.user_can_debug(&Credentials::new("ann", "pw")));
        assert!(!auth.user_can_debug(&Credentials::new("ann", "PW")));
        assert!(!auth.user_can_debug(&Credentials::default()));
        assert!(AllowAll.user_can_debug(&Credentials::default()));
    }
}

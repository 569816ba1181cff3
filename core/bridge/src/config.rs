//! Bridge configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! port = 9229
//! max_pages = 4
//! backend = "cdp"
//!
//! [credentials]
//! user = "dev"
//! password = "secret"
//! ```

use crate::auth::{AllowAll, Auth, StaticCredentials};
use crate::error::{BridgeError, BridgeResult};
use crate::queue::DEFAULT_CAPACITY;
use crate::registry::K_MAX_PAGES;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Which debugger implementation serves the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The DevTools protocol bridge.
    #[default]
    Cdp,
    /// No debugger: breakpoints never fire.
    Disabled,
}

/// Fixed login accepted by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialsConfig {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

/// Runtime settings of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Listen address.
    pub bind: IpAddr,
    /// Listen port; 0 picks an ephemeral port.
    pub port: u16,
    /// Page slots available to contexts.
    pub max_pages: usize,
    /// Capacity of each page FIFO.
    pub queue_capacity: usize,
    /// Capacity of each per-context trace queue.
    pub trace_capacity: usize,
    /// How long the network thread waits on one source before polling the other.
    pub poll_interval_ms: u64,
    /// How long a page waits for the engine to answer a lookup or evaluation.
    pub reply_timeout_ms: u64,
    /// Name echoed in the `connect` reply.
    pub solution: String,
    /// Debugger implementation.
    pub backend: Backend,
    /// When set, `connect` must present these credentials.
    pub credentials: Option<CredentialsConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9222,
            max_pages: K_MAX_PAGES,
            queue_capacity: DEFAULT_CAPACITY,
            trace_capacity: 32,
            poll_interval_ms: 50,
            reply_timeout_ms: 5000,
            solution: "default".to_owned(),
            backend: Backend::Cdp,
            credentials: None,
        }
    }
}

impl BridgeConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::InvalidParameter`] on bad syntax, unknown keys
    /// or ill-typed values.
    pub fn from_toml(text: &str) -> BridgeResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| BridgeError::invalid(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors and everything [`from_toml`](Self::from_toml) rejects.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Fails when a capacity or interval is zero.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.max_pages == 0 {
            return Err(BridgeError::invalid("config: max_pages must be at least 1"));
        }
        if self.queue_capacity == 0 || self.trace_capacity == 0 {
            return Err(BridgeError::invalid("config: queue capacities must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(BridgeError::invalid("config: poll_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Listen socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reply timeout as a duration.
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Authenticator matching `credentials`.
    #[must_use]
    pub fn auth(&self) -> Arc<dyn Auth> {
        match &self.credentials {
            Some(login) => Arc::new(StaticCredentials::new(&login.user, &login.password)),
            None => Arc::new(AllowAll),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use indoc::indoc;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(BridgeConfig::from_toml("").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn full_document() {
        let config = BridgeConfig::from_toml(indoc! {r#"
            bind = "0.0.0.0"
            port = 9229
            max_pages = 2
            reply_timeout_ms = 100
            solution = "shop"
            backend = "disabled"

            [credentials]
            user = "dev"
            password = "secret"
        "#})
        .unwrap();
        assert_eq!(config.port, 9229);
        assert_eq!(config.max_pages, 2);
        assert_eq!(config.backend, Backend::Disabled);
        assert_eq!(config.reply_timeout(), Duration::from_millis(100));
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:9229");

        let auth = config.auth();
        assert!(auth.requires_authentication());
        assert!(auth.user_can_debug(&Credentials::new("dev", "secret")));
    }

    #[test]
    fn rejects_unknown_keys_and_zero_capacity() {
        assert!(BridgeConfig::from_toml("prot = 1").is_err());
        assert!(BridgeConfig::from_toml("max_pages = 0").is_err());
        assert!(BridgeConfig::from_toml("backend = \"jsc\"").is_err());
    }
}

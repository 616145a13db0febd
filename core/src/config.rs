//! Serializable session configuration.
//!
//! `SessionConfig` can be deserialized from any serde format or read from
//! `PVE_*` environment variables, then turned into a session with
//! `SessionBuilder::from_config`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::{SessionBuilder, DEFAULT_PORT};
use crate::transport::DEFAULT_TIMEOUT;
use crate::types::{Decoding, ResponseFormat, Verbosity};

/// Everything needed to open a session, minus the ticket (which comes from
/// `login`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub hostname: String,
    pub port: u16,
    pub api_token: Option<String>,
    pub response_format: ResponseFormat,
    pub decoding: Decoding,
    pub verbosity: Verbosity,
    pub timeout_secs: u64,
    pub verify_tls: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: DEFAULT_PORT,
            api_token: None,
            response_format: ResponseFormat::default(),
            decoding: Decoding::default(),
            verbosity: Verbosity::default(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            verify_tls: false,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("response_format", &self.response_format)
            .field("decoding", &self.decoding)
            .field("verbosity", &self.verbosity)
            .field("timeout_secs", &self.timeout_secs)
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

impl SessionConfig {
    /// Read `PVE_HOST`, `PVE_PORT`, `PVE_API_TOKEN`, `PVE_VERBOSITY` and
    /// `PVE_VERIFY_TLS` from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self {
            hostname: lookup("PVE_HOST").ok_or_else(|| Error::config("PVE_HOST is not set"))?,
            ..Self::default()
        };
        if let Some(port) = lookup("PVE_PORT") {
            config.port = port
                .parse()
                .map_err(|_| Error::config(format!("PVE_PORT is not a port number: {port}")))?;
        }
        config.api_token = lookup("PVE_API_TOKEN").filter(|token| !token.is_empty());
        if let Some(level) = lookup("PVE_VERBOSITY") {
            let level: u8 = level
                .parse()
                .map_err(|_| Error::config(format!("PVE_VERBOSITY is not a number: {level}")))?;
            config.verbosity = Verbosity::try_from(level)?;
        }
        if let Some(verify) = lookup("PVE_VERIFY_TLS") {
            config.verify_tls = matches!(verify.as_str(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    pub fn into_builder(self) -> SessionBuilder {
        SessionBuilder::from_config(self)
    }
}

// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration loaded from TOML.
//!
//! ```toml
//! max_payload = 100
//! max_channels = 64
//! max_connections = 256
//! call_timeout_ms = 500
//! send_policy = "serialize"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nexus_envelope::DEFAULT_MAX_PAYLOAD;
use serde::Deserialize;
use thiserror::Error;

use crate::Wait;

/// What a second `send` on a connection does while the first is still in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SendPolicy {
    /// Queue behind the in-flight call (FIFO per connection).
    #[default]
    Serialize,
    /// Fail immediately with `IpcError::Busy`.
    RejectBusy,
}

/// Limits and defaults shared by every process of a [`crate::Kernel`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendezvousConfig {
    /// Largest envelope payload accepted, in bytes.
    pub max_payload: usize,
    /// Channels a single process may hold open.
    pub max_channels: usize,
    /// Connections a single process may hold attached.
    pub max_connections: usize,
    /// Deadline applied by `Process::call`; unset blocks indefinitely.
    pub call_timeout_ms: Option<u64>,
    /// Behaviour of concurrent sends on one connection.
    pub send_policy: SendPolicy,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_channels: 64,
            max_connections: 256,
            call_timeout_ms: None,
            send_policy: SendPolicy::Serialize,
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration text is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

impl RendezvousConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    /// Rejects values the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 || self.max_payload > u32::MAX as usize {
            return Err(ConfigError::Invalid("max_payload must be within 1..=u32::MAX"));
        }
        if self.max_channels == 0 {
            return Err(ConfigError::Invalid("max_channels must be non-zero"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be non-zero"));
        }
        if self.call_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("call_timeout_ms must be non-zero when set"));
        }
        Ok(())
    }

    /// Configured call deadline.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Wait mode applied when the caller does not pick one.
    pub fn default_wait(&self) -> Wait {
        match self.call_timeout() {
            Some(timeout) => Wait::Timeout(timeout),
            None => Wait::Blocking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RendezvousConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendezvousConfig::default());
        assert_eq!(config.max_payload, 100);
        assert_eq!(config.default_wait(), Wait::Blocking);
    }

    #[test]
    fn parses_all_fields() {
        let config = RendezvousConfig::from_toml_str(
            r#"
            max_payload = 256
            max_channels = 4
            max_connections = 8
            call_timeout_ms = 250
            send_policy = "reject-busy"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_payload, 256);
        assert_eq!(config.max_channels, 4);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.send_policy, SendPolicy::RejectBusy);
        assert_eq!(config.default_wait(), Wait::Timeout(Duration::from_millis(250)));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = RendezvousConfig::from_toml_str("max_payloads = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_limits_rejected() {
        assert!(matches!(
            RendezvousConfig::from_toml_str("max_payload = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RendezvousConfig::from_toml_str("call_timeout_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_channels = 2").unwrap();
        let config = RendezvousConfig::load(file.path()).unwrap();
        assert_eq!(config.max_channels, 2);
    }

    #[test]
    fn load_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        match RendezvousConfig::load(&path) {
            Err(ConfigError::Read { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

//! Server configuration.
//!
//! Everything has a default, so an empty JSON object is a valid config.
//! Load with [`ServerConfig::from_file`] or [`ServerConfig::from_json`];
//! both validate before returning.

use std::path::Path;
use std::time::Duration;

use keystone_protocol::{Phase, SequenceMode};
use keystone_session::DuplicateLoginPolicy;
use serde::{Deserialize, Serialize};

use crate::KeystoneError;

/// Smallest frame the server must be able to receive: the 13-byte
/// handshake echo.
const MIN_PACKET_SIZE: usize = 13;

/// Largest frame a 16-bit length prefix can describe, plus its prefix.
const MAX_PACKET_SIZE: usize = u16::MAX as usize + 4;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Which server this process is. Decides the phase a session enters once
/// its handshake is verified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    /// Authentication gateway: handshake → `AUTH`.
    Auth,
    /// Game world: handshake → `LOGIN`.
    #[default]
    Game,
}

impl ServerRole {
    pub fn phase_after_handshake(self) -> Phase {
        match self {
            Self::Auth => Phase::Auth,
            Self::Game => Phase::Login,
        }
    }
}

/// What to do with an inbound header that has no schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPacketPolicy {
    /// Log it and discard the buffered bytes.
    #[default]
    Ignore,
    /// Close the connection.
    Close,
}

/// What to do with an application packet before the handshake is done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnverifiedPacketPolicy {
    /// Discard the packet and keep the connection.
    Drop,
    /// Close the connection.
    #[default]
    Close,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. `"0.0.0.0:11002"`).
    pub bind_addr: String,

    pub role: ServerRole,

    /// Upper bound for one in-flight frame, prefix included.
    pub max_packet_size: usize,

    /// Close a connection after this many seconds without inbound bytes.
    /// `0` disables the timeout.
    pub idle_timeout_secs: u64,

    /// Allowed clock drift when checking a handshake echo.
    pub handshake_sync_window_ms: u32,

    pub unknown_packet_policy: UnknownPacketPolicy,

    pub unverified_packet_policy: UnverifiedPacketPolicy,

    pub duplicate_login_policy: DuplicateLoginPolicy,

    pub sequence_mode: SequenceMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:13000".to_string(),
            role: ServerRole::default(),
            max_packet_size: 4096,
            idle_timeout_secs: 60,
            handshake_sync_window_ms: 50,
            unknown_packet_policy: UnknownPacketPolicy::default(),
            unverified_packet_policy: UnverifiedPacketPolicy::default(),
            duplicate_login_policy: DuplicateLoginPolicy::default(),
            sequence_mode: SequenceMode::default(),
        }
    }
}

impl ServerConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(content: &str) -> Result<Self, KeystoneError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| KeystoneError::Config(format!("failed to parse JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, KeystoneError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| KeystoneError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Checks that the values can work together.
    ///
    /// # Errors
    /// [`KeystoneError::Config`] listing every problem found.
    pub fn validate(&self) -> Result<(), KeystoneError> {
        let mut errors = Vec::new();

        if self.bind_addr.trim().is_empty() {
            errors.push("bind_addr must not be empty".to_string());
        }
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&self.max_packet_size) {
            errors.push(format!(
                "max_packet_size must be within {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}, got {}",
                self.max_packet_size
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KeystoneError::Config(errors.join("; ")))
        }
    }

    /// The idle timeout, or `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

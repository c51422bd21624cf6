//! Watcher configuration

use serde::Deserialize;

use crate::error::SyncError;

fn default_port() -> u16 {
    22
}

fn default_use_keyboard() -> bool {
    true
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_timeout_sec() -> u64 {
    60
}

fn default_max_err_count() -> u32 {
    3
}

fn default_stable_poll_ms() -> u64 {
    250
}

/// Configuration of one watcher instance.
///
/// Deserializes from a TOML profile; the camelCase aliases accept the field
/// names of the original front-end configuration objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatcherConfig {
    /// DNS name or address of the remote endpoint
    pub host: String,

    /// TCP port of the SSH transport
    #[serde(default = "default_port")]
    pub port: u16,

    /// Remote account name
    pub username: String,

    /// Absolute remote root directory
    #[serde(alias = "remotePath")]
    pub remote_path: String,

    /// Absolute local root directory
    #[serde(alias = "localPath")]
    pub local_path: String,

    /// Public-key path; valid only together with `privkey`
    #[serde(default)]
    pub pubkey: Option<String>,

    /// Private-key path; valid only together with `pubkey`
    #[serde(default)]
    pub privkey: Option<String>,

    /// Password, keyboard-interactive response, or key passphrase
    #[serde(default)]
    pub password: Option<String>,

    /// Allow keyboard-interactive fallback for password authentication
    #[serde(default = "default_use_keyboard", alias = "useKeyboard")]
    pub use_keyboard: bool,

    /// Sleep between passes, in milliseconds
    #[serde(default = "default_delay_ms", alias = "delayMs")]
    pub delay_ms: u64,

    /// Session timeout in seconds; also bounds the stability wait and caps
    /// the reconnect backoff
    #[serde(default = "default_timeout_sec", alias = "timeout")]
    pub timeout_sec: u64,

    /// Consecutive walk failures before the reconnect sub-loop runs
    #[serde(default = "default_max_err_count", alias = "maxErrCount")]
    pub max_err_count: u32,

    /// Sampling interval of the pre-transfer stability wait, in milliseconds
    #[serde(default = "default_stable_poll_ms", alias = "stablePollMs")]
    pub stable_poll_ms: u64,
}

impl WatcherConfig {
    /// Check the construction-time rules: mandatory fields present, one
    /// satisfied authentication method.
    ///
    /// # Errors
    /// Returns a configuration error naming the offending field.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.host.is_empty() {
            return Err(SyncError::config("'host' is empty"));
        }
        if self.username.is_empty() {
            return Err(SyncError::config("'username' is empty"));
        }
        if self.remote_path.is_empty() {
            return Err(SyncError::config("'remote_path' is empty"));
        }
        if self.local_path.is_empty() {
            return Err(SyncError::config("'local_path' is empty"));
        }
        if !self.has_key_auth() && !self.has_password_auth() {
            return Err(SyncError::config(
                "no valid authentication: set both 'pubkey' and 'privkey', or 'password'",
            ));
        }
        if self.delay_ms == 0 {
            return Err(SyncError::config("'delay_ms' must be greater than zero"));
        }
        if self.timeout_sec == 0 {
            return Err(SyncError::config("'timeout_sec' must be greater than zero"));
        }
        Ok(())
    }

    /// Both key paths are configured and non-empty
    #[must_use]
    pub fn has_key_auth(&self) -> bool {
        matches!((&self.pubkey, &self.privkey), (Some(p), Some(k)) if !p.is_empty() && !k.is_empty())
    }

    /// A non-empty password is configured
    #[must_use]
    pub fn has_password_auth(&self) -> bool {
        matches!(&self.password, Some(p) if !p.is_empty())
    }
}

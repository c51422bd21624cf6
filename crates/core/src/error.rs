//! The watcher's error record
//!
//! Errors carry their origin, the numeric code where the origin has a code
//! space (SFTP status codes, OS errnos), and the path they refer to when one
//! is known.

use thiserror::Error;

/// Where an error was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    Config,
    Transport,
    Session,
    Sftp,
    Local,
    Custom,
}

/// Error record surfaced through the error events and the last-error slot
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Rejected at construction; no watcher exists
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket, resolve, handshake, or authentication failure
    #[error("transport error: {message}")]
    Transport {
        message: String,
        path: Option<String>,
    },

    /// Unexpected condition from the SSH session after the handshake
    #[error("session error: {message}")]
    Session {
        message: String,
        path: Option<String>,
    },

    /// Well-known remote filesystem error, by SFTP status code
    #[error("sftp error {code} ({name})")]
    Sftp {
        code: u32,
        name: &'static str,
        path: Option<String>,
    },

    /// Local filesystem failure with its OS error code
    #[error("local filesystem error {code}: {message}")]
    Local {
        code: i32,
        message: String,
        path: Option<String>,
    },

    /// Out-of-band condition raised by the engine itself
    #[error("{message}")]
    Custom {
        code: i32,
        message: String,
        path: Option<String>,
    },
}

impl SyncError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            path: None,
        }
    }

    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
            path: None,
        }
    }

    /// An SFTP error by status code; the name is resolved from the static
    /// table below.
    #[must_use]
    pub fn sftp(code: u32) -> Self {
        Self::Sftp {
            code,
            name: sftp_status_name(code),
            path: None,
        }
    }

    /// Capture a local OS failure with its errno-equivalent code
    #[must_use]
    pub fn local(err: &std::io::Error, path: impl Into<String>) -> Self {
        Self::Local {
            code: err.raw_os_error().unwrap_or(-1),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    #[must_use]
    pub fn custom(code: i32, message: impl Into<String>) -> Self {
        Self::Custom {
            code,
            message: message.into(),
            path: None,
        }
    }

    #[must_use]
    pub fn origin(&self) -> ErrorOrigin {
        match self {
            Self::Config(_) => ErrorOrigin::Config,
            Self::Transport { .. } => ErrorOrigin::Transport,
            Self::Session { .. } => ErrorOrigin::Session,
            Self::Sftp { .. } => ErrorOrigin::Sftp,
            Self::Local { .. } => ErrorOrigin::Local,
            Self::Custom { .. } => ErrorOrigin::Custom,
        }
    }

    /// The path the error refers to, when one is attached
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Config(_) => None,
            Self::Transport { path, .. }
            | Self::Session { path, .. }
            | Self::Sftp { path, .. }
            | Self::Local { path, .. }
            | Self::Custom { path, .. } => path.as_deref(),
        }
    }

    /// Attach the affected path, replacing any previous one
    #[must_use]
    pub fn with_path(mut self, new_path: impl Into<String>) -> Self {
        match &mut self {
            Self::Config(_) => {}
            Self::Transport { path, .. }
            | Self::Session { path, .. }
            | Self::Sftp { path, .. }
            | Self::Local { path, .. }
            | Self::Custom { path, .. } => *path = Some(new_path.into()),
        }
        self
    }
}

/// Human-readable name of a well-known SFTP status code
#[must_use]
pub fn sftp_status_name(code: u32) -> &'static str {
    match code {
        0 => "SFTP_OK",
        1 => "SFTP_EOF",
        2 => "SFTP_NO_SUCH_FILE",
        3 => "SFTP_PERMISSION_DENIED",
        4 => "SFTP_FAILURE",
        5 => "SFTP_BAD_MESSAGE",
        6 => "SFTP_NO_CONNECTION",
        7 => "SFTP_CONNECTION_LOST",
        8 => "SFTP_OP_UNSUPPORTED",
        9 => "SFTP_INVALID_HANDLE",
        10 => "SFTP_NO_SUCH_PATH",
        11 => "SFTP_FILE_ALREADY_EXISTS",
        12 => "SFTP_WRITE_PROTECT",
        13 => "SFTP_NO_MEDIA",
        14 => "SFTP_NO_SPACE_ON_FILESYSTEM",
        15 => "SFTP_QUOTA_EXCEEDED",
        16 => "SFTP_UNKNOWN_PRINCIPAL",
        17 => "SFTP_LOCK_CONFLICT",
        18 => "SFTP_DIR_NOT_EMPTY",
        19 => "SFTP_NOT_A_DIRECTORY",
        20 => "SFTP_INVALID_FILENAME",
        21 => "SFTP_LINK_LOOP",
        _ => "SFTP_UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sftp_code_resolves_name() {
        let err = SyncError::sftp(2);
        assert_eq!(err.origin(), ErrorOrigin::Sftp);
        assert!(err.to_string().contains("SFTP_NO_SUCH_FILE"));
        assert_eq!(sftp_status_name(99), "SFTP_UNKNOWN");
    }

    #[test]
    fn test_with_path_attaches() {
        let err = SyncError::sftp(3).with_path("/srv/data/a.txt");
        assert_eq!(err.path(), Some("/srv/data/a.txt"));

        let err = SyncError::config("bad").with_path("/ignored");
        assert_eq!(err.path(), None);
    }

    #[test]
    fn test_local_captures_os_code() {
        let io = std::io::Error::from_raw_os_error(2);
        let err = SyncError::local(&io, "/tmp/x");
        match err {
            SyncError::Local { code, .. } => assert_eq!(code, 2),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}

//! Error types for the fan control daemon

use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for the fan control daemon
pub type Result<T> = std::result::Result<T, FanControlError>;

/// Main error type for the fan control daemon
#[derive(Error, Debug)]
pub enum FanControlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("DBus error: {0}")]
    DBus(#[from] zbus::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid curve configuration: {0}")]
    InvalidCurveConfig(String),

    #[error("failed to read {path}: {source}")]
    SysfsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    SysfsWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Fan control faulted: {0}")]
    Faulted(String),

    #[error("blocking I/O task failed: {0}")]
    BlockingTask(#[from] tokio::task::JoinError),
}

impl FanControlError {
    /// The underlying I/O error, when this error came from a file operation.
    pub fn io_source(&self) -> Option<&std::io::Error> {
        match self {
            Self::Io(e) => Some(e),
            Self::SysfsRead { source, .. } | Self::SysfsWrite { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failure reported by a hardware actuator.
///
/// The kind decides what the control loop does next: transient errors are
/// retried on the following tick, permission errors fault the run, and
/// unsupported operations drop the loop into monitoring-only mode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("permission denied: {0} (run with elevated privileges)")]
    PermissionDenied(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

const EINVAL: i32 = 22;
const EOPNOTSUPP: i32 = 95;

impl From<FanControlError> for ActuatorError {
    fn from(err: FanControlError) -> Self {
        let message = err.to_string();
        match err {
            FanControlError::Actuator(inner) => inner,
            other => match other.io_source() {
                Some(io) if io.kind() == ErrorKind::PermissionDenied => {
                    Self::PermissionDenied(message)
                }
                Some(io) if io.kind() == ErrorKind::NotFound => Self::Unsupported(message),
                Some(io) if matches!(io.raw_os_error(), Some(EINVAL) | Some(EOPNOTSUPP)) => {
                    Self::Unsupported(message)
                }
                _ => Self::TransientIo(message),
            },
        }
    }
}

/// Helper function to convert display errors to zbus errors
pub fn zbus_error_from_display(err: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}", err))
}

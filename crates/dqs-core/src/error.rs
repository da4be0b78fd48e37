//! Error types for dqs-core.

use std::io;

use thiserror::Error;

/// Coarse failure category reported to callers of the launch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A caller-supplied value or configuration was rejected.
    InvalidValue,
    /// Device memory (or a ring slot) could not be obtained.
    ResourceExhausted,
    /// A kernel or driver call failed.
    DriverIo,
    /// A per-stream structure needed by the task is missing.
    StateInconsistent,
    /// A notify object could not be set up or waited on.
    SyncFailure,
}

/// Errors raised while building, launching or tearing down DQS tasks.
#[derive(Debug, Error)]
pub enum DqsError {
    /// Caller-supplied value rejected.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The stream handed to the launch path has no DQS extension.
    #[error("stream {stream_id} does not support DQS tasks")]
    NotDqsCapable {
        /// Stream identifier.
        stream_id: u32,
    },

    /// A queue resolved to an entity type the task cannot use.
    #[error("queue {queue_id} has entity type {actual}, expected {expected}")]
    QueueTypeMismatch {
        /// Queue identifier.
        queue_id: u32,
        /// Type reported by the driver.
        actual: u32,
        /// Type required by the caller.
        expected: u32,
    },

    /// Device memory allocation failed.
    #[error("device memory allocation of {size} bytes failed on device {device_id}")]
    OutOfDeviceMemory {
        /// Bytes requested.
        size: u64,
        /// Device identifier.
        device_id: u32,
    },

    /// The stream's task ring has no free slot.
    #[error("task ring of stream {stream_id} is full")]
    RingFull {
        /// Stream identifier.
        stream_id: u32,
    },

    /// The kernel control node could not be opened.
    #[error("failed to open {path}: {source}")]
    DeviceOpen {
        /// Node path.
        path: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// A kernel control command returned an error.
    #[error("control command {cmd} failed: {source}")]
    Command {
        /// Command name.
        cmd: &'static str,
        /// Underlying OS error.
        source: io::Error,
    },

    /// A driver call returned a non-zero status.
    #[error("driver call {op} failed with code {code}")]
    Driver {
        /// Driver operation name.
        op: &'static str,
        /// Raw status code.
        code: i32,
    },

    /// The kernel answered with a payload that makes no sense.
    #[error("malformed response to {cmd}: {detail}")]
    MalformedResponse {
        /// Command name.
        cmd: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// A per-stream structure needed by the task is absent.
    #[error("{what} is not available on stream {stream_id}")]
    MissingState {
        /// Structure name.
        what: &'static str,
        /// Stream identifier.
        stream_id: u32,
    },

    /// Notify setup or wait failed.
    #[error("sync failure: {0}")]
    Sync(String),
}

impl DqsError {
    /// Shorthand for [`DqsError::InvalidValue`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Failure category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidValue(_) | Self::NotDqsCapable { .. } | Self::QueueTypeMismatch { .. } => {
                ErrorKind::InvalidValue
            }
            Self::OutOfDeviceMemory { .. } | Self::RingFull { .. } => ErrorKind::ResourceExhausted,
            Self::DeviceOpen { .. }
            | Self::Command { .. }
            | Self::Driver { .. }
            | Self::MalformedResponse { .. } => ErrorKind::DriverIo,
            Self::MissingState { .. } => ErrorKind::StateInconsistent,
            Self::Sync(_) => ErrorKind::SyncFailure,
        }
    }

    /// Whether the failure is due to memory or slot exhaustion.
    #[must_use]
    pub fn is_resource_error(&self) -> bool {
        self.kind() == ErrorKind::ResourceExhausted
    }

    /// Convert to a negative errno for C-facing callers.
    #[must_use]
    pub fn to_errno(&self) -> i32 {
        use nix::libc;
        match self {
            Self::DeviceOpen { source, .. } | Self::Command { source, .. } => {
                -source.raw_os_error().unwrap_or(libc::EIO)
            }
            Self::OutOfDeviceMemory { .. } => -libc::ENOMEM,
            Self::RingFull { .. } => -libc::EBUSY,
            Self::MissingState { .. } => -libc::ENODEV,
            Self::Sync(_) => -libc::ETIMEDOUT,
            Self::Driver { .. } | Self::MalformedResponse { .. } => -libc::EIO,
            Self::InvalidValue(_) | Self::NotDqsCapable { .. } | Self::QueueTypeMismatch { .. } => {
                -libc::EINVAL
            }
        }
    }
}

/// Result type for DQS operations.
pub type Result<T> = std::result::Result<T, DqsError>;

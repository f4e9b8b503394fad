//! Error types for the HMVM host runtime

use crate::registry::ContextId;
use crate::storage::CommitError;
use thiserror::Error;

/// Result type for HMVM host operations
pub type Result<T> = std::result::Result<T, HostVmError>;

/// Errors that can occur while servicing host functions
#[derive(Debug, Error)]
pub enum HostVmError {
    /// No context was ever allocated under this id (or none is current)
    #[error("context {0} not found")]
    ContextNotFound(ContextId),

    /// The context existed but has been destroyed
    #[error("context {0} has been destroyed")]
    ContextDestroyed(ContextId),

    /// No context is selected as current
    #[error("no current context")]
    NoCurrentContext,

    /// Argument index past the staged arguments
    #[error("argument {index} not found ({count} staged)")]
    ArgumentNotFound {
        /// Requested index
        index: usize,
        /// Number of staged arguments
        count: usize,
    },

    /// Event group has fewer members than requested
    #[error("event {name:?} occurrence {occurrence} not found")]
    EventNotFound {
        /// Event name
        name: String,
        /// Requested occurrence within the name group
        occurrence: usize,
    },

    /// Key is absent from the contract's state
    #[error("state key not found")]
    KeyNotFound,

    /// Read offset lies past the end of the value
    #[error("offset {offset} exceeds value length {len}")]
    OffsetOutOfRange {
        /// Requested offset
        offset: u64,
        /// Length of the value being read
        len: usize,
    },

    /// Operation not permitted at this lifecycle point
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Destination buffer smaller than the payload
    #[error("capacity exceeded: need {needed} bytes, have {capacity}")]
    CapacityExceeded {
        /// Bytes that had to be written
        needed: usize,
        /// Bytes available at the destination
        capacity: usize,
    },

    /// Input larger than the host accepts
    #[error("{what} too large: {len} bytes (max {max})")]
    TooLarge {
        /// What was oversized (key, value, message)
        what: &'static str,
        /// Actual length
        len: u64,
        /// Maximum accepted length
        max: u64,
    },

    /// Pop on an empty call stack
    #[error("call stack underflow")]
    StackUnderflow,

    /// Nested call would exceed the configured depth
    #[error("call depth exceeded (max {0})")]
    CallDepthExceeded(usize),

    /// The commit coordinator rejected the submitted read/write sets
    #[error("commit failed: {0}")]
    CommitFailure(#[from] CommitError),

    /// Guest address range is not mapped (or not writable)
    #[error("memory access violation at address {address:#x} (len {len})")]
    MemoryAccessViolation {
        /// Start of the offending range
        address: u64,
        /// Length of the offending range
        len: u64,
    },

    /// The backing store failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Signature recovery failed or is unavailable
    #[error("signature recovery failed: {0}")]
    SignatureRecovery(String),
}

/// Coarse error categories, as seen by the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown or destroyed context, missing argument/event/key
    NotFound,
    /// Lifecycle violation or invalid input
    InvalidState,
    /// Destination too small
    CapacityExceeded,
    /// Call stack bookkeeping is broken; the context must be aborted
    StackUnderflow,
    /// Commit coordinator rejection
    CommitFailure,
    /// Bad guest pointer
    MemoryAccess,
    /// Backing store or delegated collaborator failure
    Storage,
}

impl HostVmError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostVmError::ContextNotFound(_)
            | HostVmError::ContextDestroyed(_)
            | HostVmError::NoCurrentContext
            | HostVmError::ArgumentNotFound { .. }
            | HostVmError::EventNotFound { .. }
            | HostVmError::KeyNotFound
            | HostVmError::OffsetOutOfRange { .. } => ErrorKind::NotFound,
            HostVmError::InvalidState(_)
            | HostVmError::TooLarge { .. }
            | HostVmError::CallDepthExceeded(_) => ErrorKind::InvalidState,
            HostVmError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            HostVmError::StackUnderflow => ErrorKind::StackUnderflow,
            HostVmError::CommitFailure(_) => ErrorKind::CommitFailure,
            HostVmError::MemoryAccessViolation { .. } => ErrorKind::MemoryAccess,
            HostVmError::Storage(_) | HostVmError::SignatureRecovery(_) => ErrorKind::Storage,
        }
    }

    /// Negative status returned to the guest for this error
    pub fn status_code(&self) -> i64 {
        match self.kind() {
            ErrorKind::NotFound => -1,
            ErrorKind::InvalidState => -2,
            ErrorKind::CapacityExceeded => -3,
            ErrorKind::StackUnderflow => -4,
            ErrorKind::CommitFailure => -5,
            ErrorKind::MemoryAccess => -6,
            ErrorKind::Storage => -7,
        }
    }

    /// Whether the owning context can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::StackUnderflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_negative() {
        let errors = [
            HostVmError::KeyNotFound,
            HostVmError::InvalidState("already initialized"),
            HostVmError::CapacityExceeded { needed: 4, capacity: 2 },
            HostVmError::StackUnderflow,
            HostVmError::CommitFailure(CommitError::Store("down".into())),
            HostVmError::MemoryAccessViolation { address: 0x10, len: 4 },
            HostVmError::Storage("io".into()),
        ];
        for err in &errors {
            assert!(err.status_code() < 0, "{err} must map to a negative status");
        }
    }

    #[test]
    fn test_only_underflow_is_fatal() {
        assert!(HostVmError::StackUnderflow.is_fatal());
        assert!(!HostVmError::ContextDestroyed(ContextId(3)).is_fatal());
        assert!(!HostVmError::InvalidState("x").is_fatal());
    }

    #[test]
    fn test_destroyed_context_is_not_found_kind() {
        assert_eq!(HostVmError::ContextDestroyed(ContextId(1)).kind(), ErrorKind::NotFound);
        assert_eq!(HostVmError::ContextNotFound(ContextId(1)).kind(), ErrorKind::NotFound);
    }
}

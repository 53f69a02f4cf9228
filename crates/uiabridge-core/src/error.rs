//! Command-level error taxonomy.
//!
//! A [`BridgeError`] raised while executing a command never ends the session
//! by itself: its `Display` text becomes the `error` field of the result
//! envelope, and the session loop decides whether to escalate.

use thiserror::Error;

use crate::host::HostError;
use crate::predicate::PredicateError;
use crate::qpath::QPathError;

/// Errors a command handler can report.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// An integer handle that was never issued, or was released.
    #[error("UnknownHandle: {0}")]
    UnknownHandle(u64),

    /// A handle reference that is neither an integer nor a structural locator.
    #[error("element id is invalid: {0}")]
    InvalidHandle(String),

    /// A structural locator that matched nothing.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// A direct-call function or locator strategy outside the allow-list.
    #[error("{0}")]
    UnsupportedOperation(String),

    /// A method name with no registered handler.
    #[error("UnknownMethod: {0}")]
    UnknownMethod(String),

    /// A positional parameter is missing or has the wrong shape.
    #[error("invalid argument {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },

    /// The host failed to carry out the operation.
    #[error(transparent)]
    Host(#[from] HostError),

    /// A structural locator could not be parsed.
    #[error("invalid locator: {0}")]
    Locator(#[from] QPathError),

    #[error("invalid predicate: {0}")]
    Predicate(#[from] PredicateError),
}

impl BridgeError {
    pub fn invalid_argument(index: usize, reason: impl Into<String>) -> Self {
        BridgeError::InvalidArgument {
            index,
            reason: reason.into(),
        }
    }
}

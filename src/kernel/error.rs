//! Kernel error types
//!
//! Two families live here. [`Error`] is returned to the *caller* of an API
//! (bad configuration, double resolution, misuse of the kernel). [`Fault`] is
//! the payload of a task that finished in the `Faulted` state; it travels
//! through listeners and combinators, never through `Result`s of kernel calls.

use super::deferred::DeferredId;
use super::task::TaskId;
use thiserror::Error;

/// Kernel result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported to the caller of a kernel, factory or deferred operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Rejected at construction time; never reaches the scheduler
    #[error("invalid {component} configuration: {reason}")]
    Configuration {
        component: &'static str,
        reason: String,
    },

    /// A deferred value was resolved or failed a second time
    #[error("deferred value {deferred} is already resolved")]
    ResolutionConflict { deferred: DeferredId },

    /// A terminal task was handed back to be resumed
    #[error("{task} is terminal and cannot be resumed")]
    TerminalResume { task: TaskId },

    #[error("step delta must be finite and non-negative, got {delta}")]
    InvalidDelta { delta: f64 },

    #[error("{task} is not scheduled on this kernel")]
    UnknownTask { task: TaskId },

    /// The kernel was re-entered from inside one of its own steps
    #[error("kernel is already stepping")]
    Reentrant,
}

impl Error {
    pub(crate) fn config(component: &'static str, reason: impl Into<String>) -> Self {
        let err = Error::Configuration {
            component,
            reason: reason.into(),
        };
        tracing::warn!(%err, "configuration rejected");
        err
    }
}

/// A task's terminal fault
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Fault {
    /// Raised by a task's own execution
    #[error("task fault: {message}")]
    Task { message: String },

    /// A barrier's fault: the first child fault in registration order
    #[error("barrier {barrier} faulted: {first}")]
    Aggregate { barrier: TaskId, first: Box<Fault> },
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Fault::Task {
            message: message.into(),
        }
    }

    pub(crate) fn aggregate(barrier: TaskId, first: Fault) -> Self {
        Fault::Aggregate {
            barrier,
            first: Box::new(first),
        }
    }

    /// The innermost task fault, unwrapping any barrier aggregation
    pub fn root(&self) -> &Fault {
        match self {
            Fault::Task { .. } => self,
            Fault::Aggregate { first, .. } => first.root(),
        }
    }

    /// Message of the innermost task fault
    pub fn message(&self) -> &str {
        match self {
            Fault::Task { message } => message,
            Fault::Aggregate { first, .. } => first.message(),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Fault::Aggregate { .. })
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Fault::new(message)
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Fault::new(message)
    }
}

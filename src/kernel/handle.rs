//! Handles: caller-side references to a task
//!
//! A handle observes a task and can ask it to cancel, but never keeps it
//! running. The task body belongs to its parent; the handle only shares the
//! small record holding state, outcome and listeners, which is freed once the
//! body is gone and every handle has been dropped.

use super::error::Fault;
use super::node::Shared;
use super::task::{Injected, Outcome, TaskId, TaskState, Value};
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub struct Handle {
    shared: Rc<Shared>,
}

impl Handle {
    pub(crate) fn new(shared: Rc<Shared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id()
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether a parent still owns the task body
    pub fn is_attached(&self) -> bool {
        self.shared.is_attached()
    }

    /// How many times the task has been resumed
    pub fn resume_count(&self) -> u64 {
        self.shared.resumes()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.shared.outcome()
    }

    /// Result value, if the task completed with one
    pub fn value(&self) -> Option<Value> {
        self.outcome().and_then(|o| o.value().cloned())
    }

    pub fn fault(&self) -> Option<Fault> {
        self.outcome().and_then(|o| o.fault().cloned())
    }

    /// Ask the task to cancel at its next suspension point.
    ///
    /// Returns false if the task already finished.
    pub fn cancel(&self) -> bool {
        let requested = self.shared.request_cancel();
        if requested {
            tracing::trace!(task = %self.id(), "cancellation requested");
        }
        requested
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel_requested()
    }

    /// Register a listener called exactly once with the task's outcome.
    ///
    /// If the task already finished, the listener runs immediately.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: FnOnce(&Outcome) + 'static,
    {
        self.shared.subscribe(Box::new(listener));
    }

    /// Deliver a value to the task's inbox; read on its next resume
    pub fn inject_value(&self, value: Value) -> bool {
        self.shared.inject(Injected::Value(value))
    }

    /// Deliver a fault to the task's inbox; read on its next resume
    pub fn inject_fault(&self, fault: Fault) -> bool {
        self.shared.inject(Injected::Fault(fault))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Handle {}

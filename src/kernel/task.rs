//! Task abstraction
//!
//! A Task is the unit of suspendable execution. The kernel (or a parent
//! combinator) resumes it once per step; the task answers with a [`Progress`]
//! saying whether it suspended or reached a terminal state. Nothing preempts a
//! task mid-resume: every suspension point is explicit.

use super::error::Fault;
use super::node::StepContext;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Allocate a process-unique id. Ids increase monotonically, so sorting
    /// by id gives creation order.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task execution state
///
/// Transitions only move toward one of the three terminal states
/// (`Completed`, `Faulted`, `Cancelled`). Once terminal, a state never
/// changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Built but never resumed
    Created,
    /// Inside its resume call right now
    Running,
    /// Yielded; will be resumed on a later step
    Suspended,
    /// Finished with an optional result value
    Completed,
    /// Finished with a fault
    Faulted,
    /// Finished because cancellation was requested
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Faulted | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Suspended => "suspended",
            TaskState::Completed => "completed",
            TaskState::Faulted => "faulted",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A type-erased result value.
///
/// Values are reference counted so that every listener and every handle can
/// observe the same result without requiring `T: Clone`.
#[derive(Clone)]
pub struct Value(Rc<dyn Any>);

impl Value {
    pub fn new<T: 'static>(value: T) -> Self {
        Value(Rc::new(value))
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Two values are the same if they share one allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Value(..)")
    }
}

/// How a task finished. Delivered to every listener exactly once.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(Option<Value>),
    Faulted(Fault),
    Cancelled,
}

impl Outcome {
    /// The terminal state this outcome corresponds to
    pub fn state(&self) -> TaskState {
        match self {
            Outcome::Completed(_) => TaskState::Completed,
            Outcome::Faulted(_) => TaskState::Faulted,
            Outcome::Cancelled => TaskState::Cancelled,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Completed(value) => value.as_ref(),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Outcome::Faulted(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Outcome::Faulted(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

impl From<Outcome> for Progress {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed(value) => Progress::Completed(value),
            Outcome::Faulted(fault) => Progress::Faulted(fault),
            Outcome::Cancelled => Progress::Cancelled,
        }
    }
}

/// What a task reports at the end of one resume
#[derive(Debug, Clone)]
pub enum Progress {
    /// Not done yet; resume me next step
    Suspended,
    Completed(Option<Value>),
    Faulted(Fault),
    Cancelled,
}

impl Progress {
    /// Complete with a result value
    pub fn complete<T: 'static>(value: T) -> Self {
        Progress::Completed(Some(Value::new(value)))
    }

    /// Complete without a result value
    pub fn done() -> Self {
        Progress::Completed(None)
    }

    /// Fault with a message
    pub fn fault(message: impl Into<String>) -> Self {
        Progress::Faulted(Fault::new(message))
    }
}

/// A value or fault pushed into a task's inbox, read on its next resume.
#[derive(Debug, Clone)]
pub enum Injected {
    Value(Value),
    Fault(Fault),
}

/// The Task trait - implement this to create a schedulable unit of work.
///
/// `resume` is called once per step until it returns something other than
/// [`Progress::Suspended`]. A well-behaved task checks
/// [`StepContext::is_cancel_requested`] at each resume and answers
/// [`Progress::Cancelled`] when it is set.
pub trait Task: 'static {
    fn resume(&mut self, cx: &mut StepContext<'_>) -> Progress;
}

impl<F> Task for F
where
    F: FnMut(&mut StepContext<'_>) -> Progress + 'static,
{
    fn resume(&mut self, cx: &mut StepContext<'_>) -> Progress {
        self(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique_and_increasing() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b > a);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Created.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Suspended.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Faulted.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_value_downcast() {
        let v = Value::new(42u32);
        assert!(v.is::<u32>());
        assert_eq!(v.downcast_ref::<u32>(), Some(&42));
        assert_eq!(v.downcast_ref::<i64>(), None);

        let shared = v.clone();
        assert!(v.ptr_eq(&shared));
    }

    #[test]
    fn test_outcome_accessors() {
        let done = Outcome::Completed(Some(Value::new("ok")));
        assert_eq!(done.state(), TaskState::Completed);
        assert_eq!(done.value().and_then(|v| v.downcast_ref::<&str>()), Some(&"ok"));
        assert!(done.fault().is_none());

        let failed = Outcome::Faulted(Fault::new("boom"));
        assert_eq!(failed.state(), TaskState::Faulted);
        assert_eq!(failed.fault().map(|f| f.message()), Some("boom"));

        assert_eq!(Outcome::Cancelled.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(format!("{}", TaskId(7)), "Task(7)");
    }
}

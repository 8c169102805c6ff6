//! Sequence: run children one at a time, in order
//!
//! Only the current child is resumed. The next child is first resumed on the
//! step after its predecessor completes, so each step resumes exactly one
//! child. A fault or cancellation of the current child ends the sequence;
//! later children are never started.

use super::node::{Node, StepContext};
use super::task::{Outcome, Progress, Task, TaskState, Value};
use super::trace::TraceCategory;

pub struct Sequence {
    children: Vec<Node>,
    index: usize,
    /// Result of the most recently completed child
    last: Option<Value>,
    cancel_forwarded: bool,
}

impl Sequence {
    pub(crate) fn new(children: Vec<Node>) -> Self {
        Self {
            children,
            index: 0,
            last: None,
            cancel_forwarded: false,
        }
    }
}

impl Task for Sequence {
    fn resume(&mut self, cx: &mut StepContext<'_>) -> Progress {
        let Some(current) = self.children.get_mut(self.index) else {
            return Progress::Completed(self.last.take());
        };

        if cx.is_cancel_requested() && !self.cancel_forwarded {
            // Children that have not started yet are never resumed
            if current.state() == TaskState::Created {
                return Progress::Cancelled;
            }
            current.request_cancel();
            self.cancel_forwarded = true;
        }

        match current.step(cx) {
            TaskState::Completed => {
                self.last = current.outcome().and_then(|o| o.value().cloned());
                self.index += 1;
                cx.trace(
                    TraceCategory::Combinator,
                    "sequence advanced",
                    Some(format!("{}/{}", self.index, self.children.len())),
                );
                if self.index == self.children.len() {
                    Progress::Completed(self.last.take())
                } else if self.cancel_forwarded {
                    Progress::Cancelled
                } else {
                    Progress::Suspended
                }
            }
            TaskState::Faulted | TaskState::Cancelled => match current.outcome() {
                Some(Outcome::Faulted(fault)) => Progress::Faulted(fault),
                _ => Progress::Cancelled,
            },
            _ => Progress::Suspended,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::kernel::error::Fault;
    use crate::kernel::factory::Factory;
    use crate::kernel::node::StepContext;
    use crate::kernel::task::{Progress, TaskState};
    use crate::kernel::Kernel;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// A child that logs each resume and finishes after `steps` resumes
    fn child(factory: &Factory, log: &Log, name: &'static str, steps: u32, fault: bool) -> crate::Node {
        let log = log.clone();
        let mut count = 0;
        factory.task(name, move |_: &mut StepContext<'_>| {
            count += 1;
            log.borrow_mut().push(format!("{name}{count}"));
            if count < steps {
                Progress::Suspended
            } else if fault {
                Progress::fault(format!("{name} failed"))
            } else {
                Progress::complete(name)
            }
        })
    }

    #[test]
    fn test_children_run_in_order() {
        let kernel = Kernel::new();
        let factory = kernel.factory();
        let log = Log::default();

        let seq = factory
            .sequence(vec![
                child(&factory, &log, "a", 2, false),
                child(&factory, &log, "b", 1, false),
                child(&factory, &log, "c", 2, false),
            ])
            .unwrap();
        let handle = kernel.schedule(seq);

        for _ in 0..5 {
            kernel.step(0.1).unwrap();
        }

        assert_eq!(log.borrow().as_slice(), &["a1", "a2", "b1", "c1", "c2"]);
        assert_eq!(handle.state(), TaskState::Completed);
        let value = handle.value().unwrap();
        assert_eq!(value.downcast_ref::<&str>(), Some(&"c"));
    }

    #[test]
    fn test_fault_stops_sequence() {
        let kernel = Kernel::new();
        let factory = kernel.factory();
        let log = Log::default();

        let later = child(&factory, &log, "later", 1, false);
        let later_handle = later.handle();
        let seq = factory
            .sequence(vec![child(&factory, &log, "bad", 1, true), later])
            .unwrap();
        let handle = kernel.schedule(seq);

        kernel.step(0.1).unwrap();
        kernel.step(0.1).unwrap();

        assert_eq!(handle.state(), TaskState::Faulted);
        assert_eq!(handle.fault(), Some(Fault::new("bad failed")));
        assert_eq!(later_handle.resume_count(), 0);
        assert_eq!(log.borrow().as_slice(), &["bad1"]);
    }

    #[test]
    fn test_cancel_reaches_only_current_child() {
        let kernel = Kernel::new();
        let factory = kernel.factory();

        let first = factory.task("first", |cx: &mut StepContext<'_>| {
            if cx.is_cancel_requested() {
                Progress::Cancelled
            } else {
                Progress::Suspended
            }
        });
        let second = factory.task("second", |_: &mut StepContext<'_>| Progress::done());
        let (first_handle, second_handle) = (first.handle(), second.handle());

        let handle = kernel.schedule(factory.sequence(vec![first, second]).unwrap());
        kernel.step(0.1).unwrap();

        handle.cancel();
        kernel.step(0.1).unwrap();

        assert_eq!(first_handle.state(), TaskState::Cancelled);
        assert!(!second_handle.is_cancel_requested());
        assert_eq!(second_handle.resume_count(), 0);
        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_cancel_between_children_starts_nothing() {
        let kernel = Kernel::new();
        let factory = kernel.factory();
        let log = Log::default();

        let second = child(&factory, &log, "b", 1, false);
        let second_handle = second.handle();
        let handle = kernel.schedule(
            factory
                .sequence(vec![child(&factory, &log, "a", 1, false), second])
                .unwrap(),
        );

        kernel.step(0.1).unwrap();
        assert_eq!(handle.state(), TaskState::Suspended);

        handle.cancel();
        kernel.step(0.1).unwrap();

        assert_eq!(handle.state(), TaskState::Cancelled);
        assert_eq!(second_handle.resume_count(), 0);
        assert!(!second_handle.is_cancel_requested());
        assert_eq!(log.borrow().as_slice(), &["a1"]);
    }

    #[test]
    fn test_child_cancelled_externally_cancels_sequence() {
        let kernel = Kernel::new();
        let factory = kernel.factory();

        let first = factory.task("first", |cx: &mut StepContext<'_>| {
            if cx.is_cancel_requested() {
                Progress::Cancelled
            } else {
                Progress::Suspended
            }
        });
        let first_handle = first.handle();
        let handle = kernel.schedule(factory.sequence(vec![first]).unwrap());

        kernel.step(0.1).unwrap();
        first_handle.cancel();
        kernel.step(0.1).unwrap();

        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_empty_sequence_completes_on_first_resume() {
        let kernel = Kernel::new();
        let handle = kernel.schedule(kernel.factory().sequence(Vec::new()).unwrap());

        kernel.step(0.0).unwrap();

        assert_eq!(handle.state(), TaskState::Completed);
        assert!(handle.value().is_none());
    }
}

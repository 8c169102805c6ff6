//! Trigger: race children, finish with the first one to finish
//!
//! All non-terminal children are resumed each step in registration order.
//! After the pass, the earliest-registered child that completed or faulted
//! this step wins and decides the trigger's outcome. Every other running
//! child gets a cancellation request and is handed to the kernel, which
//! drains it to a terminal state and ignores whatever it produces.

use super::node::{Node, StepContext};
use super::task::{Progress, Task, TaskState};
use super::trace::TraceCategory;

pub struct Trigger {
    children: Vec<Node>,
}

impl Trigger {
    pub(crate) fn new(children: Vec<Node>) -> Self {
        Self { children }
    }

    /// Cancel and hand off every child except `keep`
    fn release_losers(&mut self, keep: Option<usize>, cx: &mut StepContext<'_>) {
        for (index, child) in std::mem::take(&mut self.children).into_iter().enumerate() {
            if Some(index) == keep || child.is_terminal() {
                continue;
            }
            child.request_cancel();
            cx.orphan(child);
        }
    }
}

impl Task for Trigger {
    fn resume(&mut self, cx: &mut StepContext<'_>) -> Progress {
        if cx.is_cancel_requested() {
            self.release_losers(None, cx);
            return Progress::Cancelled;
        }

        let mut winner = None;
        for (index, child) in self.children.iter_mut().enumerate() {
            // A child finished by a deferred resolution reports here too
            let state = child.step(cx);
            if winner.is_none() && matches!(state, TaskState::Completed | TaskState::Faulted) {
                winner = Some(index);
            }
        }

        match winner {
            Some(index) => {
                let outcome = self.children[index].outcome();
                cx.trace(
                    TraceCategory::Combinator,
                    "trigger won",
                    Some(format!("{} ({})", self.children[index].id(), self.children[index].name())),
                );
                self.release_losers(Some(index), cx);
                outcome.map(Progress::from).unwrap_or(Progress::Cancelled)
            }
            // Every child was cancelled from outside: nothing left to race
            None if self.children.iter().all(Node::is_terminal) => Progress::Cancelled,
            None => Progress::Suspended,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::kernel::factory::Factory;
    use crate::kernel::node::StepContext;
    use crate::kernel::task::{Progress, TaskState};
    use crate::kernel::Kernel;
    use crate::Node;

    /// Finishes with `result` after `steps` resumes; honours cancellation
    fn racer(factory: &Factory, name: &'static str, steps: u32, result: Progress) -> Node {
        let mut count = 0;
        factory.task(name, move |cx: &mut StepContext<'_>| {
            if cx.is_cancel_requested() {
                return Progress::Cancelled;
            }
            count += 1;
            if count < steps {
                Progress::Suspended
            } else {
                result.clone()
            }
        })
    }

    #[test]
    fn test_first_to_finish_wins() {
        let kernel = Kernel::new();
        let factory = kernel.factory();

        let slow = racer(&factory, "slow", 5, Progress::complete("slow"));
        let slow_handle = slow.handle();
        let handle = kernel.schedule(
            factory
                .trigger(vec![slow, racer(&factory, "fast", 2, Progress::complete("fast"))])
                .unwrap(),
        );

        kernel.step(0.1).unwrap();
        kernel.step(0.1).unwrap();

        assert_eq!(handle.state(), TaskState::Completed);
        assert_eq!(handle.value().unwrap().downcast_ref::<&str>(), Some(&"fast"));
        assert!(slow_handle.is_cancel_requested());
        assert_eq!(kernel.draining_count(), 1);

        // The loser observes its cancellation on the next step
        kernel.step(0.1).unwrap();
        assert_eq!(slow_handle.state(), TaskState::Cancelled);
        assert_eq!(kernel.draining_count(), 0);
    }

    #[test]
    fn test_tie_goes_to_registration_order() {
        let kernel = Kernel::new();
        let factory = kernel.factory();

        let first = racer(&factory, "first", 1, Progress::complete(1u8));
        let second = racer(&factory, "second", 1, Progress::complete(2u8));
        let second_handle = second.handle();
        let handle = kernel.schedule(factory.trigger(vec![first, second]).unwrap());

        kernel.step(0.1).unwrap();

        assert_eq!(handle.value().unwrap().downcast_ref::<u8>(), Some(&1));
        // Finished in the same step, so its result is simply ignored
        assert_eq!(second_handle.state(), TaskState::Completed);
        assert!(!second_handle.is_cancel_requested());
    }

    #[test]
    fn test_fault_can_win() {
        let kernel = Kernel::new();
        let factory = kernel.factory();

        let handle = kernel.schedule(
            factory
                .trigger(vec![
                    racer(&factory, "ok", 3, Progress::done()),
                    racer(&factory, "bad", 1, Progress::fault("lost connection")),
                ])
                .unwrap(),
        );

        kernel.step(0.1).unwrap();

        assert_eq!(handle.state(), TaskState::Faulted);
        assert_eq!(handle.fault().unwrap().message(), "lost connection");
    }

    #[test]
    fn test_external_cancel_releases_all_children() {
        let kernel = Kernel::new();
        let factory = kernel.factory();

        let a = racer(&factory, "a", 10, Progress::done());
        let b = racer(&factory, "b", 10, Progress::done());
        let (ha, hb) = (a.handle(), b.handle());
        let handle = kernel.schedule(factory.trigger(vec![a, b]).unwrap());

        kernel.step(0.1).unwrap();
        handle.cancel();
        kernel.step(0.1).unwrap();
        assert_eq!(handle.state(), TaskState::Cancelled);

        kernel.step(0.1).unwrap();
        assert_eq!(ha.state(), TaskState::Cancelled);
        assert_eq!(hb.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_empty_trigger_rejected() {
        let factory = Factory::new();
        assert!(factory.trigger(Vec::new()).is_err());
    }
}

//! Barrier: run children together, finish when all of them have finished
//!
//! Every non-terminal child is resumed each step in registration order. A
//! faulted child does not stop its siblings: the barrier keeps resuming them
//! until all are terminal, then reports the first fault in registration
//! order wrapped as an aggregate. Otherwise it completes with the list of
//! child results.

use super::error::Fault;
use super::node::{Node, StepContext};
use super::task::{Outcome, Progress, Task, Value};
use super::trace::TraceCategory;

pub struct Barrier {
    children: Vec<Node>,
    cancel_forwarded: bool,
}

impl Barrier {
    pub(crate) fn new(children: Vec<Node>) -> Self {
        Self {
            children,
            cancel_forwarded: false,
        }
    }

    fn first_fault(&self) -> Option<Fault> {
        self.children.iter().find_map(|c| match c.outcome() {
            Some(Outcome::Faulted(fault)) => Some(fault),
            _ => None,
        })
    }
}

impl Task for Barrier {
    fn resume(&mut self, cx: &mut StepContext<'_>) -> Progress {
        if self.children.is_empty() {
            return Progress::done();
        }

        if cx.is_cancel_requested() && !self.cancel_forwarded {
            for child in self.children.iter().filter(|c| !c.is_terminal()) {
                child.request_cancel();
            }
            self.cancel_forwarded = true;
        }

        for child in self.children.iter_mut() {
            child.step(cx);
        }
        // Counted after the pass: a later sibling may have resolved a deferred
        // an earlier child was waiting on
        if self.children.iter().any(|c| !c.is_terminal()) {
            return Progress::Suspended;
        }

        if let Some(first) = self.first_fault() {
            let barrier = cx.task_id().unwrap_or(self.children[0].id());
            cx.trace(TraceCategory::Combinator, "barrier faulted", Some(first.to_string()));
            return Progress::Faulted(Fault::aggregate(barrier, first));
        }

        let outcomes: Vec<Outcome> = self.children.iter().filter_map(Node::outcome).collect();
        if self.cancel_forwarded || outcomes.iter().any(Outcome::is_cancelled) {
            return Progress::Cancelled;
        }

        let results: Vec<Option<Value>> = outcomes.iter().map(|o| o.value().cloned()).collect();
        Progress::complete(results)
    }
}

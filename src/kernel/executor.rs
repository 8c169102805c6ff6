//! Step-driven executor for cooperative task trees
//!
//! Designed for frame loops:
//! - Step-based execution (the host calls `step` once per frame)
//! - Deterministic order (top-level tasks resume in admission order)
//! - Deferred admission (tasks scheduled during a step start on the next one)
//! - Loser draining (cancelled race losers are finished off, outcome ignored)
//!
//! Every task in the active set is resumed on every step; there is no
//! wake-up bookkeeping because the step itself is the only event source.

use super::error::{Error, Result};
use super::handle::Handle;
use super::node::{Frame, Node, StepContext};
use super::task::TaskId;
use super::trace::{TraceCategory, Tracer};
use serde::{Deserialize, Serialize};
use slab::Slab;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Queue of tasks waiting to be admitted at the start of the next step.
///
/// Cloneable and usable while the kernel is stepping, so tasks can schedule
/// new top-level work from inside their own resume.
#[derive(Clone, Default)]
pub struct Spawner {
    queue: Rc<RefCell<VecDeque<Node>>>,
}

impl Spawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, node: Node) -> Handle {
        let handle = node.handle();
        tracing::trace!(task = %node.id(), name = node.name(), "scheduled");
        self.queue.borrow_mut().push_back(node);
        handle
    }

    /// Tasks waiting for admission
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    fn take(&self) -> VecDeque<Node> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    fn request_cancel(&self, id: TaskId) -> bool {
        self.queue
            .borrow()
            .iter()
            .find(|n| n.id() == id)
            .is_some_and(|n| n.request_cancel())
    }
}

/// What one step did
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepReport {
    pub step: u64,
    /// Kernel clock after the step (seconds)
    pub now: f64,
    /// Top-level tasks resumed
    pub resumed: usize,
    /// Top-level tasks that reached a terminal state and were removed
    pub finished: usize,
    /// Top-level tasks still active
    pub active: usize,
    /// Orphaned tasks still being drained
    pub draining: usize,
}

/// The executor - owns the active set and runs one step at a time
pub struct Executor {
    /// Active top-level tasks
    tasks: Slab<Node>,
    /// Slab keys in admission order
    order: Vec<usize>,
    /// Orphans handed over during the current step; drained from the next one
    orphans: Vec<Node>,
    /// Orphans being drained
    draining: Vec<Node>,
    frame: Frame,
    tracer: Tracer,
}

impl Executor {
    pub fn new(tracer: Tracer) -> Self {
        Self {
            tasks: Slab::new(),
            order: Vec::new(),
            orphans: Vec::new(),
            draining: Vec::new(),
            frame: Frame::default(),
            tracer,
        }
    }

    /// Time and step index of the last completed step
    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn active_count(&self) -> usize {
        self.order.len()
    }

    pub fn draining_count(&self) -> usize {
        self.draining.len() + self.orphans.len()
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    /// Handles to the active top-level tasks, in admission order
    pub fn active(&self) -> Vec<Handle> {
        self.order.iter().map(|&key| self.tasks[key].handle()).collect()
    }

    /// Request cancellation of an active or pending top-level task
    pub fn cancel(&self, id: TaskId, spawner: &Spawner) -> Result<()> {
        let active = self.order.iter().map(|&key| &self.tasks[key]).find(|n| n.id() == id);
        let requested = match active {
            Some(node) => node.request_cancel() || node.is_terminal(),
            None => spawner.request_cancel(id),
        };
        if requested {
            Ok(())
        } else {
            Err(Error::UnknownTask { task: id })
        }
    }

    /// Admit tasks scheduled since the last step
    fn admit(&mut self, spawner: &Spawner) {
        for node in spawner.take() {
            self.tracer
                .event(&self.frame, TraceCategory::Scheduler, "admitted", Some(node.id()), None);
            self.tracer.stats.scheduled += 1;
            let key = self.tasks.insert(node);
            self.order.push(key);
        }
        self.draining.append(&mut self.orphans);
    }

    /// Run one step
    ///
    /// Advances the clock by `delta`, admits pending tasks, resumes every
    /// active task in admission order, drains orphans, then removes tasks
    /// that reached a terminal state. Task faults never surface here; they
    /// go to the task's listeners.
    pub fn step(&mut self, delta: f64, spawner: &Spawner) -> Result<StepReport> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(Error::InvalidDelta { delta });
        }

        self.frame = Frame {
            step: self.frame.step + 1,
            now: self.frame.now + delta,
            delta,
        };
        self.admit(spawner);

        let frame = self.frame;
        self.tracer.stats.steps += 1;
        self.tracer.stats.peak_active = self.tracer.stats.peak_active.max(self.order.len());
        tracing::trace!(step = frame.step, now = frame.now, active = self.order.len(), "step");

        let Executor {
            tasks,
            order,
            orphans,
            draining,
            tracer,
            ..
        } = self;

        let mut resumed = 0;
        for &key in order.iter() {
            let node = &mut tasks[key];
            if node.is_terminal() {
                continue;
            }
            let mut cx = StepContext::root(frame, spawner, orphans, tracer);
            node.step(&mut cx);
            resumed += 1;
        }

        for node in draining.iter_mut() {
            let mut cx = StepContext::root(frame, spawner, orphans, tracer);
            node.step(&mut cx);
        }
        draining.retain(|node| !node.is_terminal());

        let before = order.len();
        order.retain(|&key| {
            if !tasks[key].is_terminal() {
                return true;
            }
            // Releases the body of a task finished after its own resume
            let mut cx = StepContext::root(frame, spawner, orphans, tracer);
            tasks[key].step(&mut cx);
            tasks.remove(key);
            false
        });

        Ok(StepReport {
            step: frame.step,
            now: frame.now,
            resumed,
            finished: before - order.len(),
            active: order.len(),
            draining: draining.len() + orphans.len(),
        })
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Tracer::default())
    }
}

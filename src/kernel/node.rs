//! Nodes: the owned, schedulable form of a task
//!
//! A [`Node`] pairs a task body with a shared record (state, outcome,
//! listeners, cancel flag, inbox). The body is owned by exactly one parent
//! (a combinator or the kernel's active set); the record is shared with any
//! number of [`Handle`]s. When the node reaches a terminal state the body is
//! dropped immediately, and the record lives on until the last handle goes.

use super::error::{Error, Result};
use super::executor::Spawner;
use super::handle::Handle;
use super::task::{Injected, Outcome, Progress, Task, TaskId, TaskState};
use super::trace::{TraceCategory, Tracer};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

pub(crate) type Listener = Box<dyn FnOnce(&Outcome)>;

/// Simulated time as seen by one kernel step
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Frame {
    /// 1-based index of the step
    pub step: u64,
    /// Kernel clock after this step's delta was applied (seconds)
    pub now: f64,
    /// Time advanced by this step (seconds)
    pub delta: f64,
}

/// State shared between a node and its handles
pub(crate) struct Shared {
    id: TaskId,
    name: String,
    state: Cell<TaskState>,
    cancel: Cell<bool>,
    attached: Cell<bool>,
    resumes: Cell<u64>,
    outcome: RefCell<Option<Outcome>>,
    listeners: RefCell<Vec<Listener>>,
    inbox: RefCell<VecDeque<Injected>>,
}

impl Shared {
    fn new(name: String) -> Rc<Self> {
        Rc::new(Self {
            id: TaskId::next(),
            name,
            state: Cell::new(TaskState::Created),
            cancel: Cell::new(false),
            attached: Cell::new(true),
            resumes: Cell::new(0),
            outcome: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
            inbox: RefCell::new(VecDeque::new()),
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.get()
    }

    pub(crate) fn resumes(&self) -> u64 {
        self.resumes.get()
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.get()
    }

    /// Set the cooperative cancel flag. Returns false if the task is
    /// already terminal.
    pub(crate) fn request_cancel(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.cancel.set(true);
        true
    }

    pub(crate) fn outcome(&self) -> Option<Outcome> {
        self.outcome.borrow().clone()
    }

    /// Register a completion listener; runs immediately if already terminal
    pub(crate) fn subscribe(&self, listener: Listener) {
        match self.outcome() {
            Some(outcome) => listener(&outcome),
            None => self.listeners.borrow_mut().push(listener),
        }
    }

    pub(crate) fn inject(&self, injected: Injected) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.inbox.borrow_mut().push_back(injected);
        true
    }

    fn take_injected(&self) -> Option<Injected> {
        self.inbox.borrow_mut().pop_front()
    }

    /// Finish a suspended task without resuming it. The owning node drops
    /// the body the next time its parent steps it. Returns false if the task
    /// is already terminal or is inside its own resume.
    pub(crate) fn finish_outside(&self, outcome: Outcome) -> bool {
        if self.state().is_terminal() || self.state() == TaskState::Running {
            return false;
        }
        self.finish(outcome);
        true
    }

    /// Publish the terminal outcome and notify listeners in subscription order
    fn finish(&self, outcome: Outcome) {
        debug_assert!(!self.state().is_terminal(), "{} finished twice", self.id);
        self.state.set(outcome.state());
        self.inbox.borrow_mut().clear();
        *self.outcome.borrow_mut() = Some(outcome.clone());

        // Borrow released before calling out: listeners may query or subscribe
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in listeners {
            listener(&outcome);
        }
    }
}

/// Context handed to a task body for one resume
///
/// Carries the step's simulated time, the task's cooperative cancel flag and
/// inbox, and the kernel-side sinks (scheduling, loser draining, tracing).
pub struct StepContext<'a> {
    frame: Frame,
    task: Option<&'a Rc<Shared>>,
    spawner: &'a Spawner,
    orphans: &'a mut Vec<Node>,
    tracer: &'a mut Tracer,
}

impl<'a> StepContext<'a> {
    /// Context for resuming top-level tasks (no current task)
    pub(crate) fn root(
        frame: Frame,
        spawner: &'a Spawner,
        orphans: &'a mut Vec<Node>,
        tracer: &'a mut Tracer,
    ) -> Self {
        Self {
            frame,
            task: None,
            spawner,
            orphans,
            tracer,
        }
    }

    fn for_task<'b>(&'b mut self, task: &'b Rc<Shared>) -> StepContext<'b> {
        StepContext {
            frame: self.frame,
            task: Some(task),
            spawner: self.spawner,
            orphans: &mut *self.orphans,
            tracer: &mut *self.tracer,
        }
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Kernel clock for this step
    pub fn now(&self) -> f64 {
        self.frame.now
    }

    /// Time advanced by this step
    pub fn delta(&self) -> f64 {
        self.frame.delta
    }

    /// Id of the task being resumed (`None` at the kernel root)
    pub fn task_id(&self) -> Option<TaskId> {
        self.task.map(|t| t.id())
    }

    /// Whether cancellation has been requested for the current task
    pub fn is_cancel_requested(&self) -> bool {
        self.task.is_some_and(|t| t.cancel_requested())
    }

    /// Pop the oldest value or fault injected into the current task
    pub fn take_injected(&mut self) -> Option<Injected> {
        self.task.and_then(|t| t.take_injected())
    }

    /// Schedule a new top-level task. It is first resumed on the next step.
    pub fn schedule(&mut self, node: Node) -> Handle {
        self.spawner.schedule(node)
    }

    pub(crate) fn current(&self) -> Option<Weak<Shared>> {
        self.task.map(Rc::downgrade)
    }

    /// Hand a node to the kernel, which keeps resuming it until it reaches a
    /// terminal state and ignores the outcome.
    pub(crate) fn orphan(&mut self, node: Node) {
        self.tracer.event(
            &self.frame,
            TraceCategory::Scheduler,
            "orphaned",
            Some(node.id()),
            None,
        );
        self.orphans.push(node);
    }

    pub(crate) fn tracer(&mut self) -> &mut Tracer {
        self.tracer
    }

    pub(crate) fn trace(&mut self, category: TraceCategory, name: &'static str, detail: Option<String>) {
        let task = self.task_id();
        self.tracer.event(&self.frame, category, name, task, detail);
    }
}

/// An owned, schedulable task: its body plus the shared record
pub struct Node {
    shared: Rc<Shared>,
    body: Option<Box<dyn Task>>,
}

impl Node {
    pub(crate) fn new(name: impl Into<String>, body: impl Task) -> Self {
        Self {
            shared: Shared::new(name.into()),
            body: Some(Box::new(body)),
        }
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

    /// An observation/cancellation handle. Does not keep the body alive.
    pub fn handle(&self) -> Handle {
        Handle::new(self.shared.clone())
    }

    /// Resume this node once, for use by custom combinators.
    ///
    /// Resuming a terminal node is a programming error and is reported as
    /// [`Error::TerminalResume`].
    pub fn resume(&mut self, cx: &mut StepContext<'_>) -> Result<TaskState> {
        if self.is_terminal() {
            return Err(Error::TerminalResume { task: self.id() });
        }
        Ok(self.step(cx))
    }

    pub(crate) fn request_cancel(&self) -> bool {
        self.shared.request_cancel()
    }

    pub(crate) fn outcome(&self) -> Option<Outcome> {
        self.shared.outcome()
    }

    /// Advance the state machine by one resume. Terminal nodes are not
    /// resumed; one that finished outside a resume has its body released.
    pub(crate) fn step(&mut self, cx: &mut StepContext<'_>) -> TaskState {
        let state = self.shared.state();
        if state.is_terminal() {
            if self.body.is_some()
                && let Some(outcome) = self.shared.outcome()
            {
                self.release(&outcome, cx);
            }
            return state;
        }
        let Some(body) = self.body.as_mut() else {
            return state;
        };

        self.shared.state.set(TaskState::Running);
        self.shared.resumes.set(self.shared.resumes() + 1);
        cx.tracer.stats.resumes += 1;

        let progress = {
            let mut task_cx = cx.for_task(&self.shared);
            body.resume(&mut task_cx)
        };

        let outcome = match progress {
            Progress::Suspended => {
                self.shared.state.set(TaskState::Suspended);
                return TaskState::Suspended;
            }
            Progress::Completed(value) => Outcome::Completed(value),
            Progress::Faulted(fault) => Outcome::Faulted(fault),
            Progress::Cancelled => Outcome::Cancelled,
        };
        self.finish(outcome, cx)
    }

    fn finish(&mut self, outcome: Outcome, cx: &mut StepContext<'_>) -> TaskState {
        let state = outcome.state();
        self.release(&outcome, cx);
        self.shared.finish(outcome);
        state
    }

    /// Drop the body and account for the terminal transition
    fn release(&mut self, outcome: &Outcome, cx: &mut StepContext<'_>) {
        let state = outcome.state();
        self.body = None;
        self.shared.attached.set(false);

        let stats = &mut cx.tracer.stats;
        match state {
            TaskState::Completed => stats.completed += 1,
            TaskState::Faulted => stats.faulted += 1,
            _ => stats.cancelled += 1,
        }
        let detail = outcome.fault().map(|f| f.to_string());
        match &detail {
            Some(fault) => {
                tracing::debug!(task = %self.id(), name = self.name(), %fault, "task faulted")
            }
            None => tracing::debug!(task = %self.id(), name = self.name(), %state, "task finished"),
        }
        cx.tracer
            .event(&cx.frame, TraceCategory::Task, state_event(state), Some(self.id()), detail);
    }
}

fn state_event(state: TaskState) -> &'static str {
    match state {
        TaskState::Completed => "completed",
        TaskState::Faulted => "faulted",
        _ => "cancelled",
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shared.attached.set(false);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

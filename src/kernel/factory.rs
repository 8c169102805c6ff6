//! Factory: validated construction of tasks, combinators, timers and
//! deferred values
//!
//! Every primitive is built here. Anything that can be misconfigured is
//! checked up front and rejected with [`Error::Configuration`], so the
//! scheduler only ever sees well-formed nodes.

use super::barrier::Barrier;
use super::config::{KernelConfig, TimerConfig};
use super::coroutine::Coroutine;
use super::deferred::{Deferred, Wait};
use super::error::{Error, Fault, Result};
use super::node::{Node, StepContext};
use super::sequence::Sequence;
use super::task::{Progress, Task};
use super::timer::{Deadline, Ticks, Timer};
use super::trigger::Trigger;
use std::future::Future;

#[derive(Debug, Clone, Default)]
pub struct Factory {
    max_catch_up_fires: u32,
}

impl Factory {
    /// A factory with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_config(config: &KernelConfig) -> Self {
        Self {
            max_catch_up_fires: config.max_catch_up_fires,
        }
    }

    /// A task from a closure resumed once per step
    pub fn task<F>(&self, name: impl Into<String>, body: F) -> Node
    where
        F: FnMut(&mut StepContext<'_>) -> Progress + 'static,
    {
        Node::new(name, body)
    }

    /// A task from any [`Task`] implementation
    pub fn node(&self, name: impl Into<String>, body: impl Task) -> Node {
        Node::new(name, body)
    }

    /// A task from a future; see [`coroutine`](super::coroutine)
    pub fn coroutine<F, T>(&self, name: impl Into<String>, future: F) -> Node
    where
        F: Future<Output = std::result::Result<T, Fault>> + 'static,
        T: 'static,
    {
        Node::new(name, Coroutine::new(future))
    }

    /// Run children one after another. An empty sequence completes on its
    /// first resume.
    pub fn sequence(&self, children: Vec<Node>) -> Result<Node> {
        check_children("sequence", &children)?;
        Ok(Node::new("sequence", Sequence::new(children)))
    }

    /// Run children together until all finish. An empty barrier completes
    /// on its first resume.
    pub fn barrier(&self, children: Vec<Node>) -> Result<Node> {
        check_children("barrier", &children)?;
        Ok(Node::new("barrier", Barrier::new(children)))
    }

    /// Race children; the first to finish decides the outcome
    pub fn trigger(&self, children: Vec<Node>) -> Result<Node> {
        if children.is_empty() {
            return Err(Error::config("trigger", "a trigger needs at least one child"));
        }
        check_children("trigger", &children)?;
        Ok(Node::new("trigger", Trigger::new(children)))
    }

    /// A one-shot or periodic timer, plus the observer for its fires
    pub fn timer(&self, config: TimerConfig) -> Result<(Node, Ticks)> {
        config.validate()?;
        let timer = Timer::new(&config, self.max_catch_up_fires);
        let ticks = timer.ticks();
        let name = if config.repeat { "interval" } else { "timer" };
        Ok((Node::new(name, timer), ticks))
    }

    /// A one-shot timer that faults instead of completing once `secs` of
    /// simulated time have passed
    pub fn timeout(&self, secs: f64) -> Result<Node> {
        let config = TimerConfig::once(secs);
        config.validate()?;
        let timer = Timer::new(&config, self.max_catch_up_fires);
        Ok(Node::new("timeout", Deadline::new(timer)))
    }

    /// Race `work` against a timeout. Completes with the work's result, or
    /// faults if the deadline passes first; the loser is cancelled.
    pub fn with_timeout(&self, work: Node, secs: f64) -> Result<Node> {
        let deadline = self.timeout(secs)?;
        self.trigger(vec![work, deadline])
    }

    /// An unresolved deferred value
    pub fn deferred(&self) -> Deferred {
        Deferred::new()
    }

    /// A task that completes with the deferred's value (or faults with its
    /// fault) once it is published
    pub fn wait(&self, deferred: &Deferred) -> Node {
        Node::new("wait", Wait::new(deferred.clone()))
    }
}

/// Children must not have finished already
fn check_children(component: &'static str, children: &[Node]) -> Result<()> {
    match children.iter().find(|c| c.is_terminal()) {
        Some(child) => Err(Error::config(
            component,
            format!("child {} ({}) is already {}", child.id(), child.name(), child.state()),
        )),
        None => Ok(()),
    }
}

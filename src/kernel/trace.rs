//! Instrumentation and Tracing
//!
//! Provides a bounded in-memory trace of scheduler events plus counters.
//!
//! Design:
//! - Ring buffer of recent events (bounded memory)
//! - Events carry the step index and simulated time, not wall time
//! - Counters are always collected; the event buffer only when enabled
//! - `tracing` output is emitted at the call sites, independent of this buffer

use super::node::Frame;
use super::task::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default number of events kept in the trace buffer
pub const TRACE_BUFFER_SIZE: usize = 1000;

/// Trace event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceCategory {
    /// Step boundaries, admission, draining
    Scheduler,
    /// Task terminal transitions
    Task,
    /// Sequence/barrier/trigger decisions
    Combinator,
    /// Timer fires
    Timer,
    /// Deferred value resolution and delivery
    Deferred,
}

impl fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceCategory::Scheduler => write!(f, "SCHED"),
            TraceCategory::Task => write!(f, "TASK"),
            TraceCategory::Combinator => write!(f, "COMB"),
            TraceCategory::Timer => write!(f, "TIMER"),
            TraceCategory::Deferred => write!(f, "DEFER"),
        }
    }
}

/// A single trace event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Step in which the event happened
    pub step: u64,
    /// Simulated time (seconds)
    pub time: f64,
    pub category: TraceCategory,
    pub name: String,
    pub task: Option<TaskId>,
    pub detail: Option<String>,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>5} {:>9.3}s] {} {}", self.step, self.time, self.category, self.name)?;
        if let Some(task) = self.task {
            write!(f, " {}", task)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Total steps executed
    pub steps: u64,
    /// Top-level tasks admitted to the active set
    pub scheduled: u64,
    /// Resume calls across all tasks, nested ones included
    pub resumes: u64,
    pub completed: u64,
    pub faulted: u64,
    pub cancelled: u64,
    /// Timer fire notifications
    pub timer_fires: u64,
    /// Largest active set seen at the start of a step
    pub peak_active: usize,
}

impl SchedulerStats {
    /// Average resumes per step
    pub fn avg_resumes_per_step(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.resumes as f64 / self.steps as f64
        }
    }

    /// Tasks that reached any terminal state
    pub fn finished(&self) -> u64 {
        self.completed + self.faulted + self.cancelled
    }
}

/// The tracer owned by a kernel
#[derive(Debug)]
pub struct Tracer {
    enabled: bool,
    capacity: usize,
    events: VecDeque<TraceEvent>,
    pub(crate) stats: SchedulerStats,
}

impl Tracer {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity,
            events: VecDeque::with_capacity(if enabled { capacity } else { 0 }),
            stats: SchedulerStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Record an event (no-op when disabled)
    pub fn record(&mut self, event: TraceEvent) {
        if !self.enabled || self.capacity == 0 {
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub(crate) fn event(
        &mut self,
        frame: &Frame,
        category: TraceCategory,
        name: &str,
        task: Option<TaskId>,
        detail: Option<String>,
    ) {
        if !self.enabled {
            return;
        }
        self.record(TraceEvent {
            step: frame.step,
            time: frame.now,
            category,
            name: name.to_string(),
            task,
            detail,
        });
    }

    /// Events currently held, oldest first
    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    /// Events of one category
    pub fn events_in(&self, category: TraceCategory) -> Vec<&TraceEvent> {
        self.events.iter().filter(|e| e.category == category).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Render the buffer one event per line
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&event.to_string());
            out.push('\n');
        }
        out
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(false, TRACE_BUFFER_SIZE)
    }
}

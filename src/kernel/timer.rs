//! Timers
//!
//! Timers measure simulated time only: each resume adds the step's delta to
//! the accumulated elapsed time, so a timer never fires between steps and
//! never sees wall-clock time.
//!
//! - One-shot: completes in the step where elapsed time first reaches the
//!   delay. The result value is the [`Fire`].
//! - Periodic: never completes on its own. Each time elapsed time crosses
//!   another whole multiple of the interval, listeners registered on the
//!   timer's [`Ticks`] get one notification. A large delta that crosses
//!   several intervals produces one notification per interval, in the same
//!   step.

use super::config::TimerConfig;
use super::node::StepContext;
use super::task::{Progress, Task, Value};
use super::trace::TraceCategory;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Slack for float accumulation: 0.1 + 0.2 must still reach 0.3
const EPSILON: f64 = 1e-9;

/// One timer notification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fire {
    /// 1-based count of this fire
    pub index: u64,
    /// Simulated time at which the interval was crossed
    pub at: f64,
}

type TickListener = Box<dyn FnMut(&Fire)>;

#[derive(Default)]
struct TicksInner {
    count: Cell<u64>,
    last: Cell<Option<Fire>>,
    listeners: RefCell<Vec<TickListener>>,
}

/// Observer side of a timer: fire count and per-fire listeners
#[derive(Clone, Default)]
pub struct Ticks {
    inner: Rc<TicksInner>,
}

impl Ticks {
    /// Call `listener` on every subsequent fire
    pub fn on_fire<F>(&self, listener: F)
    where
        F: FnMut(&Fire) + 'static,
    {
        self.inner.listeners.borrow_mut().push(Box::new(listener));
    }

    /// Fires so far
    pub fn count(&self) -> u64 {
        self.inner.count.get()
    }

    pub fn last(&self) -> Option<Fire> {
        self.inner.last.get()
    }

    fn notify(&self, fire: Fire) {
        self.inner.count.set(fire.index);
        self.inner.last.set(Some(fire));

        // Listeners may register more listeners while being called
        let mut listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        for listener in listeners.iter_mut() {
            listener(&fire);
        }
        let mut slot = self.inner.listeners.borrow_mut();
        listeners.append(&mut slot);
        *slot = listeners;
    }
}

impl fmt::Debug for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticks")
            .field("count", &self.count())
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}

/// Timer task body. Built through the factory, which validates the config.
pub struct Timer {
    delay: f64,
    repeat: bool,
    elapsed: f64,
    fired: u64,
    /// Most periodic fires delivered in one step (0 = no limit)
    max_catch_up: u32,
    ticks: Ticks,
}

impl Timer {
    pub(crate) fn new(config: &TimerConfig, max_catch_up: u32) -> Self {
        Self {
            delay: config.delay,
            repeat: config.repeat,
            elapsed: 0.0,
            fired: 0,
            max_catch_up,
            ticks: Ticks::default(),
        }
    }

    pub(crate) fn ticks(&self) -> Ticks {
        self.ticks.clone()
    }

    /// Record and announce the next fire
    fn fire(&mut self, cx: &mut StepContext<'_>) -> Fire {
        self.fired += 1;
        let crossed = self.delay * self.fired as f64;
        let fire = Fire {
            index: self.fired,
            at: cx.now() - (self.elapsed - crossed).max(0.0),
        };
        cx.tracer().stats.timer_fires += 1;
        cx.trace(TraceCategory::Timer, "fired", Some(format!("#{} at {:.3}s", fire.index, fire.at)));
        self.ticks.notify(fire);
        fire
    }
}

impl Task for Timer {
    fn resume(&mut self, cx: &mut StepContext<'_>) -> Progress {
        if cx.is_cancel_requested() {
            return Progress::Cancelled;
        }
        self.elapsed += cx.delta();

        if !self.repeat {
            if self.elapsed + EPSILON >= self.delay {
                let fire = self.fire(cx);
                return Progress::Completed(Some(Value::new(fire)));
            }
            return Progress::Suspended;
        }

        let due = ((self.elapsed + EPSILON) / self.delay).floor() as u64;
        let mut owed = due.saturating_sub(self.fired);
        if self.max_catch_up > 0 {
            owed = owed.min(u64::from(self.max_catch_up));
        }
        for _ in 0..owed {
            self.fire(cx);
        }
        Progress::Suspended
    }
}

/// One-shot timer whose fire is reported as a fault. Raced against work to
/// build a timeout.
pub(crate) struct Deadline {
    timer: Timer,
}

impl Deadline {
    pub(crate) fn new(timer: Timer) -> Self {
        Self { timer }
    }
}

impl Task for Deadline {
    fn resume(&mut self, cx: &mut StepContext<'_>) -> Progress {
        match self.timer.resume(cx) {
            Progress::Completed(_) => {
                Progress::fault(format!("timed out after {}s", self.timer.delay))
            }
            other => other,
        }
    }
}

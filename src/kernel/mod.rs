//! The kernel - frame-stepped cooperative scheduling
//!
//! The host owns the main loop and calls [`Kernel::step`] once per frame
//! with the elapsed simulated time. Everything else happens inside that
//! call:
//! - Tasks scheduled since the last step are admitted
//! - Every active top-level task is resumed once, in admission order
//! - Combinators resume their own children in registration order
//! - Terminal transitions notify listeners synchronously
//! - Finished tasks leave the active set before `step` returns
//!
//! Single-threaded by construction: kernel state uses `Rc`/`RefCell` and is
//! never shared across threads.

pub mod barrier;
pub mod config;
pub mod coroutine;
pub mod deferred;
pub mod error;
pub mod executor;
pub mod factory;
pub mod handle;
pub mod node;
pub mod sequence;
pub mod task;
pub mod timer;
pub mod trace;
pub mod trigger;


pub use config::{KernelConfig, TimerConfig};
pub use deferred::{Deferred, DeferredId};
pub use error::{Error, Fault, Result};
pub use executor::{Executor, Spawner, StepReport};
pub use factory::Factory;
pub use handle::Handle;
pub use node::{Frame, Node, StepContext};
pub use task::{Injected, Outcome, Progress, Task, TaskId, TaskState, Value};
pub use timer::{Fire, Ticks};
pub use trace::{SchedulerStats, TraceCategory, TraceEvent, Tracer};

use std::cell::{Cell, RefCell};

thread_local! {
    /// The default kernel for this thread
    static KERNEL: Kernel = Kernel::new();
}

/// Owns the active set and the simulated clock
pub struct Kernel {
    config: KernelConfig,
    executor: RefCell<Executor>,
    spawner: Spawner,
    factory: Factory,
    /// Report of the last completed step; readable while a step is running
    last: Cell<StepReport>,
}

impl Kernel {
    pub fn new() -> Self {
        Self::build(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: KernelConfig) -> Self {
        let tracer = Tracer::new(config.trace_enabled, config.trace_capacity);
        Self {
            factory: Factory::with_config(&config),
            executor: RefCell::new(Executor::new(tracer)),
            spawner: Spawner::new(),
            last: Cell::new(StepReport::default()),
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// A factory carrying this kernel's settings
    pub fn factory(&self) -> Factory {
        self.factory.clone()
    }

    /// A scheduling endpoint usable from inside tasks and listeners
    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    /// Register a top-level task. It is first resumed on the next step.
    pub fn schedule(&self, node: Node) -> Handle {
        self.spawner.schedule(node)
    }

    /// Advance simulated time by `delta` seconds and resume every active task
    /// once. Task faults go to the task's listeners, never to the caller.
    pub fn step(&self, delta: f64) -> Result<StepReport> {
        let mut executor = self.executor.try_borrow_mut().map_err(|_| Error::Reentrant)?;
        let report = executor.step(delta, &self.spawner)?;
        self.last.set(report);
        Ok(report)
    }

    /// Step until nothing is active, pending or draining, or `max_steps`
    /// steps have run. Returns the number of steps taken.
    pub fn run_until_idle(&self, delta: f64, max_steps: u64) -> Result<u64> {
        let mut steps = 0;
        while !self.is_idle() && steps < max_steps {
            self.step(delta)?;
            steps += 1;
        }
        Ok(steps)
    }

    /// Request cancellation of a top-level task, active or pending
    pub fn cancel(&self, task: TaskId) -> Result<()> {
        let executor = self.executor.try_borrow().map_err(|_| Error::Reentrant)?;
        executor.cancel(task, &self.spawner)
    }

    /// Simulated time after the last finished step (seconds)
    ///
    /// Inside a running step this still reports the previous step. Tasks
    /// read the current time from [`StepContext::now`], coroutines from
    /// [`coroutine::frame`].
    pub fn now(&self) -> f64 {
        self.last.get().now
    }

    /// Steps finished so far; lags by one inside a running step, like [`Kernel::now`]
    pub fn step_count(&self) -> u64 {
        self.last.get().step
    }

    /// Active top-level tasks plus those waiting for admission
    pub fn active_count(&self) -> usize {
        self.last.get().active + self.spawner.pending()
    }

    /// Cancelled race losers still being driven to a terminal state
    pub fn draining_count(&self) -> usize {
        self.last.get().draining
    }

    pub fn is_idle(&self) -> bool {
        self.active_count() == 0 && self.draining_count() == 0
    }

    /// Handles to the active top-level tasks; empty while a step is running
    pub fn tasks(&self) -> Vec<Handle> {
        self.executor
            .try_borrow()
            .map(|e| e.active())
            .unwrap_or_default()
    }

    /// Scheduler counters; zeroed while a step is running
    pub fn stats(&self) -> SchedulerStats {
        self.executor
            .try_borrow()
            .map(|e| e.tracer().stats().clone())
            .unwrap_or_default()
    }

    pub fn set_tracing(&self, enabled: bool) -> Result<()> {
        let mut executor = self.executor.try_borrow_mut().map_err(|_| Error::Reentrant)?;
        let tracer = executor.tracer_mut();
        if enabled {
            tracer.enable();
        } else {
            tracer.disable();
        }
        Ok(())
    }

    /// Recorded trace events, oldest first
    pub fn trace_events(&self) -> Vec<TraceEvent> {
        self.executor
            .try_borrow()
            .map(|e| e.tracer().events().cloned().collect())
            .unwrap_or_default()
    }

    /// Trace buffer rendered one event per line
    pub fn dump_trace(&self) -> String {
        self.executor
            .try_borrow()
            .map(|e| e.tracer().dump())
            .unwrap_or_default()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Schedule a task on this thread's default kernel
pub fn schedule(node: Node) -> Handle {
    KERNEL.with(|k| k.schedule(node))
}

/// Step this thread's default kernel
pub fn step(delta: f64) -> Result<StepReport> {
    KERNEL.with(|k| k.step(delta))
}

/// A factory for this thread's default kernel
pub fn factory() -> Factory {
    KERNEL.with(|k| k.factory())
}

/// Run `f` against this thread's default kernel
pub fn with_kernel<R>(f: impl FnOnce(&Kernel) -> R) -> R {
    KERNEL.with(f)
}

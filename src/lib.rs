//! stepflow - frame-stepped cooperative task scheduling
//!
//! Design principles:
//! - The host owns the loop: nothing runs except inside `Kernel::step`
//! - Deterministic: same steps, same deltas, same order of effects
//! - Explicit suspension: tasks yield by returning, never by preemption
//! - Composable: sequences, barriers and triggers nest freely
//!
//! ```ignore
//! use stepflow::{Kernel, TimerConfig};
//!
//! let kernel = Kernel::new();
//! let factory = kernel.factory();
//! let work = factory.coroutine("load", async { Ok(load_level().await) });
//! let handle = kernel.schedule(factory.with_timeout(work, 5.0)?);
//!
//! loop {
//!     kernel.step(frame_delta())?;
//!     if handle.is_terminal() {
//!         break;
//!     }
//! }
//! ```

pub mod kernel;

pub use kernel::coroutine::{frame, sleep, yield_now};
pub use kernel::{
    factory, schedule, step, with_kernel, Deferred, DeferredId, Error, Factory, Fault, Fire,
    Frame, Handle, Injected, Kernel, KernelConfig, Node, Outcome, Progress, Result,
    SchedulerStats, StepContext, StepReport, Task, TaskId, TaskState, Ticks, TimerConfig,
    TraceCategory, TraceEvent, Value,
};

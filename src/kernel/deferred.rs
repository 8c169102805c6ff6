//! Deferred values
//!
//! A single-writer, many-reader cell. Readers either schedule a [`Wait`]
//! task (built by the factory) or `.await` [`Deferred::wait`] from inside a
//! coroutine. Resolution happens at most once; at that moment every
//! registered waiter receives the value or fault, in registration order.
//! A task waiter receives it through its inbox and finishes on its next
//! resume.

use super::error::{Error, Fault, Result};
use super::node::{Shared, StepContext};
use super::task::{Injected, Outcome, Progress, Task, Value};
use super::trace::TraceCategory;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

/// Unique identifier for a deferred value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeferredId(pub u64);

impl fmt::Display for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deferred({})", self.0)
    }
}

type Slot = Rc<RefCell<Option<std::result::Result<Value, Fault>>>>;

enum Waiter {
    /// A scheduled task; delivery goes to its inbox
    Task(Weak<Shared>),
    /// A future polled by a coroutine
    Slot(Slot),
}

struct Inner {
    id: DeferredId,
    resolution: RefCell<Option<std::result::Result<Value, Fault>>>,
    waiters: RefCell<Vec<Waiter>>,
}

/// A value that will be published later, exactly once
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<Inner>,
}

impl Deferred {
    pub(crate) fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            inner: Rc::new(Inner {
                id: DeferredId(NEXT.fetch_add(1, Ordering::Relaxed)),
                resolution: RefCell::new(None),
                waiters: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> DeferredId {
        self.inner.id
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.resolution.borrow().is_some()
    }

    /// The published value or fault, if any
    pub fn peek(&self) -> Option<std::result::Result<Value, Fault>> {
        self.inner.resolution.borrow().clone()
    }

    /// Waiters registered and not yet delivered to
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    /// Publish a value
    pub fn resolve<T: 'static>(&self, value: T) -> Result<()> {
        self.settle(Ok(Value::new(value)))
    }

    /// Publish an already type-erased value
    pub fn resolve_value(&self, value: Value) -> Result<()> {
        self.settle(Ok(value))
    }

    /// Publish a fault
    pub fn fail(&self, fault: impl Into<Fault>) -> Result<()> {
        self.settle(Err(fault.into()))
    }

    /// A future resolving to the published value; for use in coroutines
    pub fn wait(&self) -> WaitFuture {
        WaitFuture {
            deferred: self.clone(),
            slot: None,
        }
    }

    fn settle(&self, resolution: std::result::Result<Value, Fault>) -> Result<()> {
        {
            let mut current = self.inner.resolution.borrow_mut();
            if current.is_some() {
                tracing::warn!(deferred = %self.id(), "second resolution rejected");
                return Err(Error::ResolutionConflict { deferred: self.id() });
            }
            *current = Some(resolution.clone());
        }

        let waiters = std::mem::take(&mut *self.inner.waiters.borrow_mut());
        tracing::debug!(
            deferred = %self.id(),
            ok = resolution.is_ok(),
            waiters = waiters.len(),
            "deferred resolved"
        );
        for waiter in waiters {
            match waiter {
                Waiter::Task(task) => {
                    if let Some(task) = task.upgrade() {
                        let outcome = match &resolution {
                            Ok(value) => Outcome::Completed(Some(value.clone())),
                            Err(fault) => Outcome::Faulted(fault.clone()),
                        };
                        task.finish_outside(outcome);
                    }
                }
                Waiter::Slot(slot) => *slot.borrow_mut() = Some(resolution.clone()),
            }
        }
        Ok(())
    }

    fn register(&self, waiter: Waiter) {
        self.inner.waiters.borrow_mut().push(waiter);
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.id())
            .field("resolved", &self.is_resolved())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

/// Task body that suspends until a deferred value is published
pub struct Wait {
    deferred: Deferred,
    registered: bool,
}

impl Wait {
    pub(crate) fn new(deferred: Deferred) -> Self {
        Self {
            deferred,
            registered: false,
        }
    }
}

fn settled(resolution: std::result::Result<Value, Fault>) -> Progress {
    match resolution {
        Ok(value) => Progress::Completed(Some(value)),
        Err(fault) => Progress::Faulted(fault),
    }
}

impl Task for Wait {
    fn resume(&mut self, cx: &mut StepContext<'_>) -> Progress {
        if let Some(injected) = cx.take_injected() {
            return match injected {
                Injected::Value(value) => Progress::Completed(Some(value)),
                Injected::Fault(fault) => Progress::Faulted(fault),
            };
        }
        if cx.is_cancel_requested() {
            return Progress::Cancelled;
        }
        if !self.registered {
            if let Some(resolution) = self.deferred.peek() {
                return settled(resolution);
            }
            if let Some(task) = cx.current() {
                self.deferred.register(Waiter::Task(task));
                self.registered = true;
                cx.trace(TraceCategory::Deferred, "waiting", Some(self.deferred.id().to_string()));
            }
        }
        Progress::Suspended
    }
}

/// Future returned by [`Deferred::wait`]
pub struct WaitFuture {
    deferred: Deferred,
    slot: Option<Slot>,
}

impl Future for WaitFuture {
    type Output = std::result::Result<Value, Fault>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(slot) = &self.slot {
            let delivered = slot.borrow_mut().take();
            return match delivered {
                Some(resolution) => Poll::Ready(resolution),
                None => Poll::Pending,
            };
        }

        if let Some(resolution) = self.deferred.peek() {
            return Poll::Ready(resolution);
        }
        let slot = Slot::default();
        self.deferred.register(Waiter::Slot(slot.clone()));
        self.slot = Some(slot);
        Poll::Pending
    }
}

//! Coroutine tasks
//!
//! Lets a task be written as straight-line `async` code. Each kernel resume
//! polls the future exactly once with a no-op waker; the step loop is the
//! only thing that ever drives it, so wakers carry no information.
//!
//! ```ignore
//! let node = factory.coroutine("fetch", async move {
//!     sleep(0.5).await;
//!     let reply = reply.wait().await?;
//!     yield_now().await;
//!     Ok(reply)
//! });
//! ```

use super::error::Fault;
use super::node::{Frame, StepContext};
use super::task::{Progress, Task, Value};
use std::any::TypeId;
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    static CURRENT: Cell<Option<Frame>> = const { Cell::new(None) };
}

/// Restores the enclosing coroutine's frame when a poll returns
struct EnterGuard {
    previous: Option<Frame>,
}

impl EnterGuard {
    fn enter(frame: Frame) -> Self {
        Self {
            previous: CURRENT.with(|c| c.replace(Some(frame))),
        }
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}

/// Step timing seen by the coroutine being polled; `None` outside one
pub fn frame() -> Option<Frame> {
    CURRENT.with(|c| c.get())
}

/// Suspend for exactly one step
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}

/// Suspend until `secs` of simulated time have passed
pub fn sleep(secs: f64) -> Sleep {
    Sleep {
        secs,
        deadline: None,
    }
}

pub struct Sleep {
    secs: f64,
    deadline: Option<f64>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        // Outside a kernel there is no clock to wait on
        let Some(now) = frame().map(|f| f.now) else {
            return Poll::Ready(());
        };
        let secs = self.secs;
        let deadline = *self.deadline.get_or_insert(now + secs);
        if now + 1e-9 >= deadline {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

type Body = Pin<Box<dyn Future<Output = Result<Option<Value>, Fault>>>>;

/// Task body driving a future
pub struct Coroutine {
    future: Option<Body>,
}

impl Coroutine {
    pub(crate) fn new<F, T>(future: F) -> Self
    where
        F: Future<Output = Result<T, Fault>> + 'static,
        T: 'static,
    {
        let body = async move { future.await.map(into_value) };
        Self {
            future: Some(Box::pin(body)),
        }
    }
}

/// `()` results complete without a value
fn into_value<T: 'static>(value: T) -> Option<Value> {
    if TypeId::of::<T>() == TypeId::of::<()>() {
        None
    } else {
        Some(Value::new(value))
    }
}

impl Task for Coroutine {
    fn resume(&mut self, cx: &mut StepContext<'_>) -> Progress {
        if cx.is_cancel_requested() {
            self.future = None;
            return Progress::Cancelled;
        }
        let Some(future) = self.future.as_mut() else {
            return Progress::Cancelled;
        };

        let poll = {
            let _guard = EnterGuard::enter(cx.frame());
            let mut waker_cx = Context::from_waker(futures::task::noop_waker_ref());
            future.as_mut().poll(&mut waker_cx)
        };

        match poll {
            Poll::Pending => Progress::Suspended,
            Poll::Ready(result) => {
                self.future = None;
                match result {
                    Ok(value) => Progress::Completed(value),
                    Err(fault) => Progress::Faulted(fault),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::task::TaskState;
    use crate::kernel::Kernel;
    use std::rc::Rc;

    #[test]
    fn test_yield_suspends_one_step() {
        let kernel = Kernel::new();
        let steps = Rc::new(Cell::new(0));
        let seen = steps.clone();

        let handle = kernel.schedule(kernel.factory().coroutine("yielder", async move {
            for _ in 0..3 {
                seen.set(seen.get() + 1);
                yield_now().await;
            }
            Ok(seen.get())
        }));

        for _ in 0..3 {
            kernel.step(0.1).unwrap();
        }
        assert_eq!(handle.state(), TaskState::Suspended);
        assert_eq!(steps.get(), 3);

        kernel.step(0.1).unwrap();
        assert_eq!(handle.value().unwrap().downcast_ref::<i32>(), Some(&3));
    }

    #[test]
    fn test_sleep_counts_simulated_time() {
        let kernel = Kernel::new();
        let handle = kernel.schedule(kernel.factory().coroutine("sleeper", async {
            sleep(1.0).await;
            Ok(frame().map(|f| f.now))
        }));

        for _ in 0..10 {
            kernel.step(0.25).unwrap();
            if handle.is_terminal() {
                break;
            }
        }

        // First poll at 0.25, deadline 1.25
        let woke_at = *handle.value().unwrap().downcast_ref::<Option<f64>>().unwrap();
        assert_eq!(woke_at, Some(1.25));
        assert_eq!(kernel.step_count(), 5);
    }

    #[test]
    fn test_unit_result_has_no_value() {
        let kernel = Kernel::new();
        let handle = kernel.schedule(kernel.factory().coroutine("unit", async { Ok(()) }));

        kernel.step(0.0).unwrap();

        assert_eq!(handle.state(), TaskState::Completed);
        assert!(handle.value().is_none());
    }

    #[test]
    fn test_error_becomes_fault() {
        let kernel = Kernel::new();
        let handle = kernel.schedule(kernel.factory().coroutine("broken", async {
            yield_now().await;
            Err::<(), _>(Fault::new("checksum mismatch"))
        }));

        kernel.step(0.1).unwrap();
        kernel.step(0.1).unwrap();

        assert_eq!(handle.state(), TaskState::Faulted);
        assert_eq!(handle.fault().unwrap().message(), "checksum mismatch");
    }

    #[test]
    fn test_cancel_drops_future() {
        struct DropFlag(Rc<Cell<bool>>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let kernel = Kernel::new();
        let dropped = Rc::new(Cell::new(false));
        let flag = DropFlag(dropped.clone());

        let handle = kernel.schedule(kernel.factory().coroutine("forever", async move {
            let _flag = flag;
            futures::future::pending::<()>().await;
            Ok(())
        }));

        kernel.step(0.1).unwrap();
        assert!(!dropped.get());

        handle.cancel();
        kernel.step(0.1).unwrap();
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert!(dropped.get());
    }

    #[test]
    fn test_awaits_deferred() {
        let kernel = Kernel::new();
        let factory = kernel.factory();
        let deferred = factory.deferred();
        let reader = deferred.clone();

        let handle = kernel.schedule(factory.coroutine("reader", async move {
            let value = reader.wait().await?;
            Ok::<u32, Fault>(*value.downcast_ref::<u32>().unwrap_or(&0) * 2)
        }));

        kernel.step(0.1).unwrap();
        kernel.step(0.1).unwrap();
        assert_eq!(handle.state(), TaskState::Suspended);

        deferred.resolve(21u32).unwrap();
        kernel.step(0.1).unwrap();
        assert_eq!(handle.value().unwrap().downcast_ref::<u32>(), Some(&42));
    }

    #[test]
    fn test_frame_outside_coroutine() {
        assert!(frame().is_none());
    }
}

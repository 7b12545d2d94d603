use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use futures::future::LocalBoxFuture;
use thiserror::Error;

/// Resolution of a [`Cancelable`] whose signal was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

#[derive(Default)]
struct SignalInner {
    aborted: Cell<bool>,
    wakers: RefCell<Vec<Waker>>,
}

/// Cooperative abort flag shared between a controller's cancel scope and the
/// work running under it.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Rc<SignalInner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.get()
    }

    /// Marks the signal aborted and wakes every future waiting on it.
    pub fn abort(&self) {
        if self.inner.aborted.replace(true) {
            return;
        }
        let wakers = std::mem::take(&mut *self.inner.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn register(&self, waker: &Waker) {
        let mut wakers = self.inner.wakers.borrow_mut();
        if !wakers.iter().any(|existing| existing.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Work bound to a [`CancelSignal`]. Resolves `Err(Cancelled)` as soon as the
/// signal aborts; the inner future is dropped at that point and never polled
/// again.
pub struct Cancelable<T> {
    signal: CancelSignal,
    work: Option<LocalBoxFuture<'static, T>>,
    on_finish: Option<Box<dyn FnOnce()>>,
}

impl<T> Cancelable<T> {
    pub fn new(signal: CancelSignal, work: LocalBoxFuture<'static, T>) -> Self {
        Self {
            signal,
            work: Some(work),
            on_finish: None,
        }
    }

    /// Runs `f` once when the work completes without being cancelled.
    pub(crate) fn on_finish(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_finish = Some(Box::new(f));
        self
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }
}

impl<T> Future for Cancelable<T> {
    type Output = Result<T, Cancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.signal.is_aborted() {
            self.work = None;
            self.on_finish = None;
            return Poll::Ready(Err(Cancelled));
        }
        let Some(work) = self.work.as_mut() else {
            return Poll::Ready(Err(Cancelled));
        };
        match work.as_mut().poll(cx) {
            Poll::Ready(value) => {
                self.work = None;
                if let Some(finish) = self.on_finish.take() {
                    finish();
                }
                Poll::Ready(Ok(value))
            }
            Poll::Pending => {
                self.signal.register(cx.waker());
                Poll::Pending
            }
        }
    }
}

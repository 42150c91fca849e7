//! Countdown gate for sequencing dependent loading steps.
//!
//! Each outstanding step holds a [`PendingCallback`] obtained from
//! [`Signal::pending`]. Work queued with [`Signal::wait_for_all`] runs once
//! every pending callback has been invoked, in the order it was queued.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::{trace, warn};

type Waiter = Box<dyn FnOnce()>;

struct SignalInner {
    label: String,
    pending: Cell<usize>,
    waiters: RefCell<VecDeque<Waiter>>,
    deferred: RefCell<VecDeque<Waiter>>,
}

impl SignalInner {
    fn release(&self) {
        let remaining = self.pending.get().saturating_sub(1);
        self.pending.set(remaining);
        trace!(signal = %self.label, remaining, "signal released");

        // A waiter may open new pending steps; stop draining as soon as it does.
        while self.pending.get() == 0 {
            let next = self.waiters.borrow_mut().pop_front();
            match next {
                Some(waiter) => waiter(),
                None => break,
            }
        }
    }
}

/// A named countdown of outstanding steps.
#[derive(Clone)]
pub struct Signal {
    inner: Rc<SignalInner>,
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("label", &self.inner.label)
            .field("pending", &self.inner.pending.get())
            .field("waiters", &self.inner.waiters.borrow().len())
            .finish()
    }
}

impl Signal {
    /// Creates a signal with nothing pending.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                label: label.into(),
                pending: Cell::new(0),
                waiters: RefCell::new(VecDeque::new()),
                deferred: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// The label given at construction.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Number of pending callbacks not yet invoked.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.get()
    }

    /// Returns true while at least one step is outstanding.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.pending_count() > 0
    }

    /// Opens a pending step and returns the callback that closes it.
    ///
    /// The wrapped callback forwards every invocation to `callback`, but only
    /// the first one counts the step down.
    pub fn pending<A: 'static>(&self, callback: impl Fn(A) + 'static) -> PendingCallback<A> {
        self.open(Rc::new(callback), false)
    }

    /// Like [`pending`](Self::pending), but the invocation is parked on the
    /// signal's deferred queue and only takes effect when
    /// [`flush_deferred`](Self::flush_deferred) runs. Used to group many
    /// loader callbacks into one batch.
    pub fn pending_deferred<A: 'static>(
        &self,
        callback: impl Fn(A) + 'static,
    ) -> PendingCallback<A> {
        self.open(Rc::new(callback), true)
    }

    /// Opens a pending step with no callback of its own.
    pub fn hold(&self) -> PendingCallback<()> {
        self.pending(|()| {})
    }

    fn open<A: 'static>(&self, callback: Rc<dyn Fn(A)>, deferred: bool) -> PendingCallback<A> {
        self.inner.pending.set(self.inner.pending.get() + 1);
        trace!(signal = %self.inner.label, pending = self.inner.pending.get(), "signal pending");
        PendingCallback {
            signal: Rc::clone(&self.inner),
            called: Rc::new(Cell::new(false)),
            callback,
            deferred,
        }
    }

    /// Runs `callback` now if nothing is pending, otherwise once the count
    /// returns to zero.
    pub fn wait_for_all(&self, callback: impl FnOnce() + 'static) {
        if self.inner.pending.get() == 0 {
            callback();
        } else {
            self.inner.waiters.borrow_mut().push_back(Box::new(callback));
        }
    }

    /// Runs every parked deferred invocation. Returns how many ran.
    pub fn flush_deferred(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.deferred.borrow_mut().pop_front();
            match next {
                Some(invocation) => {
                    invocation();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }
}

/// The callback handed out by [`Signal::pending`].
pub struct PendingCallback<A> {
    signal: Rc<SignalInner>,
    called: Rc<Cell<bool>>,
    callback: Rc<dyn Fn(A)>,
    deferred: bool,
}

impl<A> Clone for PendingCallback<A> {
    fn clone(&self) -> Self {
        Self {
            signal: Rc::clone(&self.signal),
            called: Rc::clone(&self.called),
            callback: Rc::clone(&self.callback),
            deferred: self.deferred,
        }
    }
}

impl<A> fmt::Debug for PendingCallback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCallback")
            .field("signal", &self.signal.label)
            .field("called", &self.called.get())
            .field("deferred", &self.deferred)
            .finish()
    }
}

impl<A: 'static> PendingCallback<A> {
    /// Returns true once the callback has been invoked at least once.
    #[must_use]
    pub fn is_called(&self) -> bool {
        self.called.get()
    }

    /// Invokes the callback.
    ///
    /// The wrapped callback runs first and the step is counted down after, so
    /// waiters observe its effects.
    pub fn call(&self, args: A) {
        if self.deferred {
            let this = PendingCallback {
                deferred: false,
                ..self.clone()
            };
            self.signal
                .deferred
                .borrow_mut()
                .push_back(Box::new(move || this.call(args)));
            return;
        }

        let first = !self.called.replace(true);
        if !first {
            warn!(signal = %self.signal.label, "pending callback invoked more than once");
        }

        (self.callback)(args);

        if first {
            self.signal.release();
        }
    }
}

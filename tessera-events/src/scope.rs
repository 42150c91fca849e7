//! Nested transaction scopes.
//!
//! A scope collects work that should run once a logical operation settles.
//! Scopes nest: the context tracks the active one, and a scope opened while
//! another is active records it as its parent. On exit, a nested scope hands
//! its unexecuted work to its parent instead of running it, so the outermost
//! scope is the single flush point.
//!
//! Work carries a cascade depth. Work added during a scope's own body has
//! depth 0; work produced while the outermost scope runs a handler of depth
//! `d` has depth `d + 1`. A hand-off that would reach the ceiling depth
//! aborts the handing scope, which breaks rule graphs that never settle
//! without limiting how much work one level may hold.

use crate::channel::{EventChannel, HandlerId};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Cascade depth ceiling used by [`ScopeContext::default`].
pub const DEFAULT_MAX_NESTING: usize = 100;

type ExitHandler<E> = Box<dyn FnOnce() -> Result<(), E>>;
type AbortHandler = Box<dyn FnOnce(bool)>;

/// Diagnostic published when a scope aborts because its work would have
/// reached the cascade ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestingExceeded {
    /// Cascade depth of the rejected hand-off.
    pub transfers: usize,
    /// The configured ceiling.
    pub ceiling: usize,
}

struct ContextState<E> {
    current: RefCell<Option<Scope<E>>>,
    max_nesting: Cell<usize>,
    nesting_exceeded: EventChannel<NestingExceeded>,
    next_id: Cell<u64>,
}

/// Owner of the "current scope" pointer.
///
/// The context is an explicit handle: everything that opens or subscribes to
/// scopes goes through one, so there is no process-global scope state.
pub struct ScopeContext<E> {
    state: Rc<ContextState<E>>,
}

impl<E> Clone for ScopeContext<E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<E> Default for ScopeContext<E> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NESTING)
    }
}

impl<E> fmt::Debug for ScopeContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeContext")
            .field("max_nesting", &self.state.max_nesting.get())
            .field("active", &self.state.current.borrow().is_some())
            .finish()
    }
}

impl<E> ScopeContext<E> {
    /// Creates a context whose cascades abort at depth `max_nesting`.
    pub fn new(max_nesting: usize) -> Self {
        Self {
            state: Rc::new(ContextState {
                current: RefCell::new(None),
                max_nesting: Cell::new(max_nesting.max(1)),
                nesting_exceeded: EventChannel::new(),
                next_id: Cell::new(1),
            }),
        }
    }

    /// The cascade depth ceiling.
    #[must_use]
    pub fn max_nesting(&self) -> usize {
        self.state.max_nesting.get()
    }

    /// Changes the ceiling for hand-offs made from now on.
    pub fn set_max_nesting(&self, max_nesting: usize) {
        self.state.max_nesting.set(max_nesting.max(1));
    }

    /// The active scope, if any.
    #[must_use]
    pub fn current(&self) -> Option<Scope<E>> {
        self.state
            .current
            .borrow()
            .as_ref()
            .filter(|scope| scope.is_active())
            .cloned()
    }

    /// Returns true while some scope is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// Opens a scope. The active scope, if any, becomes its parent.
    pub fn begin(&self) -> Scope<E> {
        let parent = self.current();
        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);

        let scope = Scope(Rc::new(ScopeInner {
            id,
            context: Rc::downgrade(&self.state),
            parent: parent.as_ref().map(|p| Rc::downgrade(&p.0)),
            active: Cell::new(true),
            transfers: Cell::new(0),
            flushing: Cell::new(None),
            exit_handlers: RefCell::new(VecDeque::new()),
            abort_handlers: RefCell::new(Vec::new()),
        }));

        trace!(scope = id, parent = ?parent.map(|p| p.id()), "scope opened");
        let previous = self.state.current.replace(Some(scope.clone()));
        drop(previous);
        scope
    }

    /// Subscribes to the abort of the active scope. The flag tells whether
    /// the abort was caused by the cascade ceiling. Without an active scope
    /// there is nothing to abort and the callback is dropped.
    pub fn on_abort(&self, callback: impl FnOnce(bool) + 'static) {
        if let Some(scope) = self.current() {
            scope.on_abort(callback);
        }
    }

    /// Subscribes to nesting-ceiling diagnostics.
    pub fn on_nesting_exceeded(&self, callback: impl Fn(&NestingExceeded) + 'static) -> HandlerId {
        self.state.nesting_exceeded.subscribe(move |event| {
            callback(event);
            Ok(())
        })
    }
}

impl<E: 'static> ScopeContext<E> {
    /// Defers `callback` to the exit of the active scope, or runs it right
    /// away when no scope is active.
    pub fn on_exit(&self, callback: impl FnOnce() -> Result<(), E> + 'static) -> Result<(), E> {
        match self.current() {
            Some(scope) => {
                scope.on_exit(callback);
                Ok(())
            }
            None => callback(),
        }
    }

    /// Runs `work` inside a fresh scope and exits it afterwards, whether or
    /// not `work` failed. An error from `work` wins over an error raised
    /// while flushing.
    ///
    /// If `work` panics the scope is aborted during unwinding so the context
    /// never points at a dead scope.
    pub fn perform<T>(&self, work: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let scope = self.begin();
        let guard = AbortOnUnwind(&scope);
        let result = work();
        let exited = scope.exit();
        drop(guard);
        let value = result?;
        exited?;
        Ok(value)
    }
}

struct AbortOnUnwind<'a, E>(&'a Scope<E>);

impl<E> Drop for AbortOnUnwind<'_, E> {
    fn drop(&mut self) {
        if self.0.is_active() {
            self.0.abort(false);
        }
    }
}

struct ScopeInner<E> {
    id: u64,
    context: Weak<ContextState<E>>,
    parent: Option<Weak<ScopeInner<E>>>,
    active: Cell<bool>,
    /// Deepest cascade level handed to this scope.
    transfers: Cell<usize>,
    /// Depth of the handler being run by [`Scope::flush`].
    flushing: Cell<Option<usize>>,
    exit_handlers: RefCell<VecDeque<(usize, ExitHandler<E>)>>,
    abort_handlers: RefCell<Vec<AbortHandler>>,
}

/// One transaction scope.
pub struct Scope<E>(Rc<ScopeInner<E>>);

impl<E> Clone for Scope<E> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<E> PartialEq for Scope<E> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<E> fmt::Debug for Scope<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.0.id)
            .field("active", &self.0.active.get())
            .field("transfers", &self.0.transfers.get())
            .field("pending", &self.0.exit_handlers.borrow().len())
            .finish()
    }
}

impl<E> Scope<E> {
    /// Sequence number, for diagnostics.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// The scope that was active when this one opened, while it still exists.
    #[must_use]
    pub fn parent(&self) -> Option<Scope<E>> {
        self.0.parent.as_ref().and_then(Weak::upgrade).map(Scope)
    }

    /// Deepest cascade level nested scopes have handed to this scope. Work
    /// handed over during the scope's own body is level 0.
    #[must_use]
    pub fn transfers(&self) -> usize {
        self.0.transfers.get()
    }

    /// Number of exit handlers waiting to run.
    #[must_use]
    pub fn pending_exit_handlers(&self) -> usize {
        self.0.exit_handlers.borrow().len()
    }

    /// Subscribes to this scope's abort.
    pub fn on_abort(&self, callback: impl FnOnce(bool) + 'static) {
        self.0.abort_handlers.borrow_mut().push(Box::new(callback));
    }

    /// Aborts the scope: abort subscribers run, pending exit work is
    /// discarded, and the context falls back to the nearest active ancestor.
    pub fn abort(&self, nesting_exceeded: bool) {
        if !self.is_active() {
            return;
        }

        let discarded = std::mem::take(&mut *self.0.exit_handlers.borrow_mut());
        drop(discarded);
        self.run_abort_handlers(nesting_exceeded);
        trace!(scope = self.0.id, nesting_exceeded, "scope aborted");
        self.deactivate();
    }

    fn run_abort_handlers(&self, nesting_exceeded: bool) {
        let handlers = std::mem::take(&mut *self.0.abort_handlers.borrow_mut());
        for handler in handlers {
            handler(nesting_exceeded);
        }
    }

    fn active_parent(&self) -> Option<Scope<E>> {
        self.parent().filter(Scope::is_active)
    }

    fn nearest_active_ancestor(&self) -> Option<Scope<E>> {
        let mut next = self.parent();
        while let Some(scope) = next {
            if scope.is_active() {
                return Some(scope);
            }
            next = scope.parent();
        }
        None
    }

    fn deactivate(&self) {
        self.0.active.set(false);
        let Some(context) = self.0.context.upgrade() else {
            return;
        };

        let points_here = match context.current.borrow().as_ref() {
            Some(current) => Rc::ptr_eq(&current.0, &self.0) || !current.is_active(),
            None => false,
        };
        if points_here {
            let previous = context.current.replace(self.nearest_active_ancestor());
            drop(previous);
        }
    }
}

impl<E: 'static> Scope<E> {
    /// Adds work to run when this scope (or the ancestor it is handed to)
    /// exits.
    pub fn on_exit(&self, callback: impl FnOnce() -> Result<(), E> + 'static) {
        let depth = self.cascade_depth();
        self.0
            .exit_handlers
            .borrow_mut()
            .push_back((depth, Box::new(callback)));
    }

    /// Depth of work added to this scope right now.
    fn cascade_depth(&self) -> usize {
        self.0.flushing.get().map_or(0, |depth| depth + 1)
    }

    /// Exits the scope.
    ///
    /// - No pending work: the scope just deactivates.
    /// - No active parent: pending work runs here, including work that nested
    ///   scopes hand back while it runs.
    /// - Active parent: pending work moves to the parent, unless it would
    ///   reach the ceiling depth there, in which case the scope aborts.
    pub fn exit(&self) -> Result<(), E> {
        if !self.is_active() {
            trace!(scope = self.0.id, "exit on inactive scope ignored");
            return Ok(());
        }

        if self.0.exit_handlers.borrow().is_empty() {
            self.0.abort_handlers.borrow_mut().clear();
            self.deactivate();
            return Ok(());
        }

        let outcome = match self.active_parent() {
            Some(parent) => {
                if self.transfer_to(&parent) {
                    Ok(())
                } else {
                    return Ok(());
                }
            }
            None => self.flush(),
        };

        self.deactivate();
        outcome
    }

    /// Hands pending work to `parent` at the parent's current cascade depth.
    /// Returns false if that depth reaches the ceiling and the scope aborted
    /// instead.
    fn transfer_to(&self, parent: &Scope<E>) -> bool {
        let transfers = parent.cascade_depth();

        let ceiling = self
            .0
            .context
            .upgrade()
            .map_or(DEFAULT_MAX_NESTING, |c| c.max_nesting.get());
        if transfers >= ceiling {
            warn!(
                scope = self.0.id,
                parent = parent.0.id,
                transfers,
                ceiling,
                "scope nesting ceiling reached, aborting"
            );
            self.abort(true);
            if let Some(context) = self.0.context.upgrade() {
                let event = NestingExceeded { transfers, ceiling };
                let _ = context.nesting_exceeded.publish(&event);
            }
            return false;
        }

        parent.0.transfers.set(parent.0.transfers.get().max(transfers));
        let exits = std::mem::take(&mut *self.0.exit_handlers.borrow_mut());
        let aborts = std::mem::take(&mut *self.0.abort_handlers.borrow_mut());
        trace!(
            scope = self.0.id,
            parent = parent.0.id,
            handlers = exits.len(),
            transfers,
            "scope work transferred"
        );
        parent
            .0
            .exit_handlers
            .borrow_mut()
            .extend(exits.into_iter().map(|(_, handler)| (transfers, handler)));
        parent.0.abort_handlers.borrow_mut().extend(aborts);
        true
    }

    fn flush(&self) -> Result<(), E> {
        loop {
            let next = self.0.exit_handlers.borrow_mut().pop_front();
            let Some((depth, handler)) = next else {
                break;
            };
            self.0.flushing.set(Some(depth));
            let result = handler();
            self.0.flushing.set(None);
            if let Err(error) = result {
                // Work that never ran is released the same way an abort
                // releases it.
                let discarded = std::mem::take(&mut *self.0.exit_handlers.borrow_mut());
                drop(discarded);
                self.run_abort_handlers(false);
                return Err(error);
            }
        }
        self.0.abort_handlers.borrow_mut().clear();
        Ok(())
    }
}

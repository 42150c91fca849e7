//! Publish/subscribe channel.
//!
//! Handlers run synchronously in subscription order. A handler may subscribe
//! or unsubscribe (itself included) while the channel is publishing; the
//! change applies to the handlers that have not run yet.

use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;

/// Identifies one subscription on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

type Callback<A, E> = Rc<dyn Fn(&A) -> Result<(), E>>;
type Filter<A> = Rc<dyn Fn(&A) -> bool>;

struct Handler<A, E> {
    id: HandlerId,
    once: bool,
    filter: Option<Filter<A>>,
    callback: Callback<A, E>,
}

impl<A, E> Clone for Handler<A, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            once: self.once,
            filter: self.filter.clone(),
            callback: Rc::clone(&self.callback),
        }
    }
}

struct ChannelState<A, E> {
    next_id: u64,
    handlers: Vec<Handler<A, E>>,
}

/// A shared, cloneable event channel.
///
/// Clones publish to and subscribe on the same handler list. `E` is the error
/// a handler may return; the first error stops publication and is returned
/// from [`publish`](Self::publish).
pub struct EventChannel<A, E = Infallible> {
    state: Rc<RefCell<ChannelState<A, E>>>,
}

impl<A, E> Clone for EventChannel<A, E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<A, E> Default for EventChannel<A, E> {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(ChannelState {
                next_id: 1,
                handlers: Vec::new(),
            })),
        }
    }
}

impl<A, E> fmt::Debug for EventChannel<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("handlers", &self.len())
            .finish()
    }
}

impl<A, E> EventChannel<A, E> {
    /// Creates a channel with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().handlers.len()
    }

    /// Returns true if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the handler is still subscribed.
    #[must_use]
    pub fn is_subscribed(&self, id: HandlerId) -> bool {
        self.state.borrow().handlers.iter().any(|h| h.id == id)
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.handlers.len();
        state.handlers.retain(|h| h.id != id);
        state.handlers.len() != before
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        // Handlers are moved out first so their captures drop without the
        // state borrowed.
        let handlers = std::mem::take(&mut self.state.borrow_mut().handlers);
        drop(handlers);
    }
}

impl<A: 'static, E: 'static> EventChannel<A, E> {
    /// Subscribes a handler that runs on every publication.
    pub fn subscribe(&self, callback: impl Fn(&A) -> Result<(), E> + 'static) -> HandlerId {
        self.add(false, None, Rc::new(callback))
    }

    /// Subscribes a handler that is removed after its first invocation.
    pub fn subscribe_once(&self, callback: impl Fn(&A) -> Result<(), E> + 'static) -> HandlerId {
        self.add(true, None, Rc::new(callback))
    }

    /// Subscribes a handler that only runs when `filter` accepts the event.
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&A) -> bool + 'static,
        callback: impl Fn(&A) -> Result<(), E> + 'static,
    ) -> HandlerId {
        self.add(false, Some(Rc::new(filter)), Rc::new(callback))
    }

    /// Once-only handler behind a filter. Events the filter rejects do not
    /// consume the subscription.
    pub fn subscribe_once_filtered(
        &self,
        filter: impl Fn(&A) -> bool + 'static,
        callback: impl Fn(&A) -> Result<(), E> + 'static,
    ) -> HandlerId {
        self.add(true, Some(Rc::new(filter)), Rc::new(callback))
    }

    fn add(&self, once: bool, filter: Option<Filter<A>>, callback: Callback<A, E>) -> HandlerId {
        let mut state = self.state.borrow_mut();
        let id = HandlerId(state.next_id);
        state.next_id += 1;
        state.handlers.push(Handler {
            id,
            once,
            filter,
            callback,
        });
        id
    }

    /// Publishes an event to every subscribed handler in subscription order.
    pub fn publish(&self, args: &A) -> Result<(), E> {
        let snapshot: Vec<Handler<A, E>> = self.state.borrow().handlers.clone();

        for handler in snapshot {
            if let Some(filter) = &handler.filter {
                if !filter(args) {
                    continue;
                }
            }

            {
                let mut state = self.state.borrow_mut();
                let Some(position) = state.handlers.iter().position(|h| h.id == handler.id) else {
                    // Unsubscribed by an earlier handler in this publication.
                    continue;
                };
                if handler.once {
                    state.handlers.remove(position);
                }
            }

            (handler.callback)(args)?;
        }

        Ok(())
    }
}

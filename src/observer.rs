//! Observer-style application interface: a multi-subscriber,
//! multi-event bus applications register callbacks on instead of
//! blocking on reads. Dispatch is synchronous, in registration order,
//! over a *snapshot* of the subscriber list, so a handler that
//! (un)subscribes mid-dispatch can't corrupt iteration.

use crate::connection::ConnectionHandle;
use crate::frame::coding::CloseCode;
use crate::message::Message;
use std::rc::Rc;

/// Server-level lifecycle events.
pub trait ServerObserver<S> {
    fn server_opened(&self) {}
    fn server_closed(&self) {}
    fn new_connection(&self, _conn: ConnectionHandle<S>) {}
}

/// Connection-level lifecycle events. Every method has an empty default
/// body so an observer only needs to override the events it cares
/// about.
pub trait ConnectionObserver<S> {
    fn handshake_received(&self, _conn: ConnectionHandle<S>) {}
    fn open(&self, _conn: ConnectionHandle<S>) {}
    fn message(&self, _conn: ConnectionHandle<S>, _message: &Message) {}
    fn ping(&self, _conn: ConnectionHandle<S>) {}
    fn pong(&self, _conn: ConnectionHandle<S>) {}
    fn close(&self, _conn: ConnectionHandle<S>, _code: CloseCode, _reason: &str) {}
}

/// A registration list for one subject (a `Listener` or a `Connection`).
/// Subscription is idempotent (re-subscribing the same `Rc` is a no-op)
/// and unsubscription is by pointer identity.
pub struct ObserverBus<T: ?Sized> {
    subscribers: Vec<Rc<T>>,
}

impl<T: ?Sized> Default for ObserverBus<T> {
    fn default() -> Self {
        ObserverBus { subscribers: Vec::new() }
    }
}

impl<T: ?Sized> ObserverBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer`. A no-op if the same `Rc` is already
    /// subscribed.
    pub fn subscribe(&mut self, observer: Rc<T>) {
        if !self.subscribers.iter().any(|existing| Rc::ptr_eq(existing, &observer)) {
            self.subscribers.push(observer);
        }
    }

    /// Remove `observer` by pointer identity. A no-op if not present.
    pub fn unsubscribe(&mut self, observer: &Rc<T>) {
        self.subscribers.retain(|existing| !Rc::ptr_eq(existing, observer));
    }

    /// Dispatch `f` to every current subscriber, over a snapshot of the
    /// list taken before the first call so re-entrant subscribe/
    /// unsubscribe calls from inside `f` never affect this dispatch.
    pub fn dispatch(&self, mut f: impl FnMut(&T)) {
        let snapshot: Vec<Rc<T>> = self.subscribers.clone();
        for observer in &snapshot {
            f(observer);
        }
    }

    /// Clone the current subscriber list. Used by callers that must drop
    /// every borrow of the dispatching subject before actually invoking
    /// observer methods, so a handler that reaches back into the subject
    /// (e.g. a message handler that calls `send` on the very connection
    /// delivering it) doesn't re-enter a held `RefCell` borrow.
    pub fn snapshot(&self) -> Vec<Rc<T>> {
        self.subscribers.clone()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    trait Counter {
        fn hit(&self);
    }

    struct Recorder(RefCell<u32>);
    impl Counter for Recorder {
        fn hit(&self) {
            *self.0.borrow_mut() += 1;
        }
    }

    #[test]
    fn dispatch_calls_every_subscriber_in_order() {
        let mut bus: ObserverBus<dyn Counter> = ObserverBus::new();
        let a = Rc::new(Recorder(RefCell::new(0)));
        let b = Rc::new(Recorder(RefCell::new(0)));
        bus.subscribe(a.clone());
        bus.subscribe(b.clone());
        bus.dispatch(|o| o.hit());
        assert_eq!(*a.0.borrow(), 1);
        assert_eq!(*b.0.borrow(), 1);
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut bus: ObserverBus<dyn Counter> = ObserverBus::new();
        let a = Rc::new(Recorder(RefCell::new(0)));
        bus.subscribe(a.clone());
        bus.subscribe(a.clone());
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn unsubscribe_by_identity() {
        let mut bus: ObserverBus<dyn Counter> = ObserverBus::new();
        let a = Rc::new(Recorder(RefCell::new(0)));
        let b = Rc::new(Recorder(RefCell::new(0)));
        bus.subscribe(a.clone());
        bus.subscribe(b.clone());
        bus.unsubscribe(&a);
        bus.dispatch(|o| o.hit());
        assert_eq!(*a.0.borrow(), 0);
        assert_eq!(*b.0.borrow(), 1);
    }

    #[test]
    fn reentrant_unsubscribe_does_not_corrupt_iteration() {
        struct SelfRemoving {
            bus: RefCell<Option<Rc<RefCell<ObserverBus<dyn Counter>>>>>,
            hits: RefCell<u32>,
        }
        impl Counter for SelfRemoving {
            fn hit(&self) {
                *self.hits.borrow_mut() += 1;
                // Would corrupt a non-snapshotting iterator; here it's safe.
                if let Some(bus) = self.bus.borrow().as_ref() {
                    bus.borrow_mut().subscribers.clear();
                }
            }
        }
        let bus = Rc::new(RefCell::new(ObserverBus::<dyn Counter>::new()));
        let a = Rc::new(SelfRemoving { bus: RefCell::new(Some(bus.clone())), hits: RefCell::new(0) });
        let b = Rc::new(Recorder(RefCell::new(0)));
        bus.borrow_mut().subscribe(a.clone());
        bus.borrow_mut().subscribe(b.clone());
        bus.borrow().dispatch(|o| o.hit());
        assert_eq!(*a.hits.borrow(), 1);
        assert_eq!(*b.0.borrow(), 1);
        assert!(bus.borrow().is_empty());
    }
}

//! Delivery of exactly one response per request, as a blocking future or a
//! callback run on the worker thread.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use quern_protocol::Response;

struct Slot {
    resolved: Mutex<Option<Arc<Response>>>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            resolved: Mutex::new(None),
            ready: Condvar::new(),
        })
    }

    fn resolve(&self, response: Response) {
        let mut resolved = self.resolved.lock().unwrap();
        debug_assert!(resolved.is_none(), "response slot resolved twice");
        *resolved = Some(Arc::new(response));
        self.ready.notify_all();
    }
}

/// Blocking handle to a pending response.
///
/// `get` may be called from any thread, any number of times; every call
/// yields the same shared `Response`.
#[derive(Clone)]
pub struct ResponseFuture {
    slot: Arc<Slot>,
}

impl ResponseFuture {
    /// Block the calling thread until the worker resolves the request.
    pub fn get(&self) -> Arc<Response> {
        let mut resolved = self.slot.resolved.lock().unwrap();
        while resolved.is_none() {
            resolved = self.slot.ready.wait(resolved).unwrap();
        }
        Arc::clone(resolved.as_ref().unwrap())
    }

    /// Non-blocking poll.
    pub fn try_get(&self) -> Option<Arc<Response>> {
        self.slot.resolved.lock().unwrap().as_ref().map(Arc::clone)
    }

    /// Block for at most `timeout`; `None` if still unresolved.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Arc<Response>> {
        let mut resolved = self.slot.resolved.lock().unwrap();
        loop {
            if let Some(response) = resolved.as_ref() {
                return Some(Arc::clone(response));
            }
            let (guard, wait) = self
                .slot
                .ready
                .wait_timeout(resolved, timeout)
                .unwrap();
            resolved = guard;
            if wait.timed_out() {
                return resolved.as_ref().map(Arc::clone);
            }
        }
    }
}

/// How a finished request hands its response back. Consumed by value, so
/// delivery happens at most once by construction; the worker that finishes
/// the request performs it.
pub(crate) enum Delivery {
    Future(Arc<Slot>),
    Callback(Box<dyn FnOnce(Response) + Send + 'static>),
}

impl Delivery {
    pub(crate) fn future() -> (Self, ResponseFuture) {
        let slot = Slot::new();
        (
            Delivery::Future(Arc::clone(&slot)),
            ResponseFuture { slot },
        )
    }

    pub(crate) fn callback(callback: impl FnOnce(Response) + Send + 'static) -> Self {
        Delivery::Callback(Box::new(callback))
    }

    /// Resolve the future or invoke the callback on the current thread.
    pub(crate) fn deliver(self, response: Response) {
        match self {
            Delivery::Future(slot) => slot.resolve(response),
            Delivery::Callback(callback) => callback(response),
        }
    }
}

//! Event sources and callbacks.
//!
//! This is a light-weight implementation of the observer pattern. Subjects are
//! modelled as the `Source` type and observers as boxed closures. Each
//! callback is stored under a `CallbackId`, so it can be detached explicitly
//! in addition to detaching itself by returning an error. A callback that
//! panics is logged and stays registered; the panic never reaches the sender.

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// An error that can occur with a weakly referenced callback.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum CallbackError {
    Disappeared,
    Poisoned,
}

/// Shorthand for common callback results.
pub type CallbackResult<T = ()> = Result<T, CallbackError>;

/// A boxed callback.
type Callback<A> = Box<dyn FnMut(A) -> CallbackResult + Send + Sync + 'static>;

/// Key of a registered callback within its source.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub struct CallbackId(u64);

/// Perform some callback on a weak reference to a lock and handle errors
/// gracefully.
pub fn with_weak<T, U, F: FnOnce(&mut T) -> U>(weak: &Weak<RwLock<T>>, f: F) -> CallbackResult<U> {
    weak.upgrade()
        .ok_or(CallbackError::Disappeared)
        .and_then(|lock| lock.write()
            .map(|mut t| f(&mut t))
            .map_err(|_| CallbackError::Poisoned)
        )
}

/// Write-lock, recovering the data of a poisoned lock.
pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Read-lock, recovering the data of a poisoned lock.
pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Lock a mutex, recovering the data of a poisoned one.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Text of a panic payload, for logging.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}


/// An event source.
pub struct Source<A> {
    callbacks: Vec<(CallbackId, Callback<A>)>,
    next_id: u64,
}

impl<A> Source<A> {
    /// Create a new source.
    pub fn new() -> Source<A> {
        Source { callbacks: vec![], next_id: 0 }
    }

    /// Register a callback. The callback will be a mutable closure that takes
    /// an event and must return a result. To unsubscribe from further events,
    /// the callback has to return an error or be unregistered by its id.
    pub fn register<F>(&mut self, callback: F) -> CallbackId
        where F: FnMut(A) -> CallbackResult + Send + Sync + 'static
    {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback. Returns whether it was still registered.
    pub fn unregister(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(key, _)| *key != id);
        self.callbacks.len() != before
    }

    /// Number of live callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }
}

impl<A: Send + Sync + Clone + 'static> Source<A> {
    /// Make the source send an event to all its observers.
    pub fn send(&mut self, a: A) {
        let callbacks = mem::take(&mut self.callbacks);
        let n = callbacks.len();
        let mut iter = callbacks.into_iter();
        for _ in 1..n {
            if let Some((id, callback)) = iter.next() {
                self.deliver(id, callback, a.clone());
            }
        }
        // process the last element without cloning
        if let Some((id, callback)) = iter.next() {
            self.deliver(id, callback, a);
        }
    }

    /// Invoke one callback and put it back unless it detached itself.
    fn deliver(&mut self, id: CallbackId, mut callback: Callback<A>, a: A) {
        match panic::catch_unwind(AssertUnwindSafe(|| callback(a))) {
            Ok(Ok(())) => self.callbacks.push((id, callback)),
            Ok(Err(_)) => {}
            Err(payload) => {
                tracing::error!(panic = %panic_message(&*payload), "event callback panicked");
                self.callbacks.push((id, callback));
            }
        }
    }
}

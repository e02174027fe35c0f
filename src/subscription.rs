//! Subscriptions and their teardown.
//!
//! A `Subscription` binds a consumer callback to a stream until it is
//! released. A `Teardown` is a one-shot signal shared by many subscriptions;
//! every dispatch checks it first. A `Scope` owns a teardown together with
//! the subscriptions made under it and releases all of them at once, which is
//! how a hosting component is torn down.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{FormError, Result};
use crate::source::{lock, read, write, CallbackError};
use crate::stream::{self, BoxClone, Stream};
use crate::transaction::{commit, later};


/// One-shot cancellation signal.
///
/// Clones share the same state; firing any clone fires all of them.
#[derive(Clone, Default)]
pub struct Teardown {
    fired: Arc<AtomicBool>,
}

impl Teardown {
    pub fn new() -> Teardown {
        Teardown::default()
    }

    /// Fire the signal. Returns `true` for the call that actually fired it.
    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown").field("fired", &self.is_fired()).finish()
    }
}


/// A live binding between a callback and a stream.
///
/// Released explicitly with `release` or implicitly on drop; either way the
/// callback is never invoked again afterwards, including for events that were
/// already waiting in a debounce window.
pub struct Subscription {
    released: Arc<AtomicBool>,
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Release the subscription. Releasing twice has no further effect.
    pub fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
        if let Some(detach) = self.detach.take() {
            commit(|| later(detach));
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("released", &self.is_released()).finish()
    }
}


pub(crate) fn subscribe<A, F>(stream: &Stream<A>, teardown: Option<Teardown>, callback: F) -> Subscription
    where A: Clone + Send + Sync + 'static,
          F: FnMut(A) + Send + Sync + 'static,
{
    commit(|| {
        let released = Arc::new(AtomicBool::new(false));
        let attachment = stream::attach(stream::source(stream), {
            let released = released.clone();
            let mut callback = callback;
            move |a| {
                if released.load(Ordering::SeqCst) {
                    return Err(CallbackError::Disappeared);
                }
                if teardown.as_ref().map_or(false, Teardown::is_fired) {
                    return Err(CallbackError::Disappeared);
                }
                callback(a);
                Ok(())
            }
        });
        let source = Arc::downgrade(stream::source(stream));
        let keep_alive: Box<dyn BoxClone> = Box::new(stream.clone());
        Subscription {
            released,
            detach: Some(Box::new(move || {
                if let Some(id) = *read(&attachment) {
                    if let Some(source) = source.upgrade() {
                        write(&source).unregister(id);
                    }
                }
                drop(keep_alive);
            })),
        }
    })
}


/// Lifetime of a hosting component.
///
/// Subscriptions made through a scope observe its teardown signal; tearing
/// the scope down fires the signal once and releases every subscription it
/// owns. Dropping the scope tears it down.
#[derive(Default)]
pub struct Scope {
    teardown: Teardown,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope::default()
    }

    /// The signal observed by every subscription of this scope.
    pub fn teardown_signal(&self) -> &Teardown {
        &self.teardown
    }

    /// Subscribe to a stream for the lifetime of this scope.
    pub fn subscribe<A, F>(&self, stream: &Stream<A>, callback: F) -> Result<()>
        where A: Clone + Send + Sync + 'static,
              F: FnMut(A) + Send + Sync + 'static,
    {
        if self.is_torn_down() {
            return Err(FormError::Released { name: "scope".to_string() });
        }
        let subscription = stream.subscribe_until(&self.teardown, callback);
        self.adopt(subscription)
    }

    /// Hand an existing subscription over to this scope.
    pub fn adopt(&self, mut subscription: Subscription) -> Result<()> {
        if self.is_torn_down() {
            subscription.release();
            return Err(FormError::Released { name: "scope".to_string() });
        }
        lock(&self.subscriptions).push(subscription);
        Ok(())
    }

    /// Number of subscriptions owned by this scope.
    pub fn len(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire the teardown signal and release all subscriptions.
    pub fn teardown(&self) {
        if !self.teardown.fire() {
            return;
        }
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        tracing::debug!(subscriptions = subscriptions.len(), "scope torn down");
        commit(|| {
            for mut subscription in subscriptions {
                subscription.release();
            }
        });
    }

    pub fn is_torn_down(&self) -> bool {
        self.teardown.is_fired()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.teardown();
    }
}

//! Values that change discretely over time

use std::sync::{Arc, RwLock};

use crate::pending::Pending;
use crate::source::{read, write, CallbackError};
use crate::stream::{self, BoxClone, Stream};
use crate::transaction::{commit, end};


/// A signal.
///
/// A signal holds a value that is replaced whenever its defining stream
/// fires. Updates become visible at the end of the transaction in which the
/// event was fired, so every callback of one transaction samples the same
/// value.
pub struct Signal<A> {
    current: Arc<RwLock<Pending<A>>>,
    #[allow(dead_code)]
    keep_alive: Box<dyn BoxClone>,
}

impl<A> Clone for Signal<A> {
    fn clone(&self) -> Signal<A> {
        Signal {
            current: self.current.clone(),
            keep_alive: self.keep_alive.box_clone(),
        }
    }
}

impl<A: Clone + Send + Sync + 'static> Signal<A> {
    /// Create a constant signal.
    pub fn new(a: A) -> Signal<A> {
        Signal {
            current: Arc::new(RwLock::new(Pending::new(a))),
            keep_alive: Box::new(()),
        }
    }

    /// Sample the current value of a signal.
    pub fn sample(&self) -> A {
        commit(|| (**read(&self.current)).clone())
    }
}


/// Hold a stream as a signal.
pub fn hold<A>(initial: A, stream: &Stream<A>) -> Signal<A>
    where A: Clone + Send + Sync + 'static,
{
    commit(|| {
        let current = Arc::new(RwLock::new(Pending::new(initial)));
        let weak = Arc::downgrade(&current);
        stream::attach(stream::source(stream), move |a| {
            let current = weak.upgrade().ok_or(CallbackError::Disappeared)?;
            write(&current).queue(a);
            end(move || write(&current).update());
            Ok(())
        });
        Signal {
            current,
            keep_alive: Box::new(stream.clone()),
        }
    })
}

//! A trivial global lock transaction system.
//!
//! At the moment, this is really just a global static mutex, that needs to be
//! locked, to ensure the atomicity of a transaction.
//!
//! A transaction runs in phases: first its body, then every callback queued
//! with `later` (which may queue further callbacks), then the finalizers
//! queued with `end`. Callbacks queued with `settle` run whenever the `later`
//! queue has drained, lowest rank first, one rank at a time. Nested commits join the transaction that is already
//! running on the current thread, so anything they queue runs after the
//! delivery that is currently in progress.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::mem;
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;


lazy_static! {
    /// The global transaction lock.
    static ref TRANSACTION_MUTEX: Mutex<()> = Mutex::new(());
}

thread_local!(
    /// Registry for callbacks to be executed at the end of a transaction.
    static CURRENT_TRANSACTION: RefCell<Option<Transaction>> =
        RefCell::new(None)
);


/// A callback.
type Callback = Box<dyn FnOnce() + 'static>;


/// A transaction.
pub struct Transaction {
    intermediate: Vec<Callback>,
    settling: BTreeMap<usize, Vec<Callback>>,
    finalizers: Vec<Callback>,
}

impl Transaction {
    /// Create a new transaction
    fn new() -> Transaction {
        Transaction {
            intermediate: vec![],
            settling: BTreeMap::new(),
            finalizers: vec![],
        }
    }

    /// Add a callback that will be called, when the transaction is done
    /// except for finalizers.
    pub fn later<F: FnOnce() + 'static>(&mut self, callback: F) {
        self.intermediate.push(Box::new(callback));
    }

    /// Add a callback that runs once everything queued with `later` has
    /// run. Callbacks of a lower rank run first.
    pub fn settle<F: FnOnce() + 'static>(&mut self, rank: usize, callback: F) {
        self.settling.entry(rank).or_default().push(Box::new(callback));
    }

    /// Add a finalizing callback. This should not have far reaching
    /// side-effects, and in particular not commit by itself. Typical operations
    /// for a finalizer are executing queued state updates.
    pub fn end<F: FnOnce() + 'static>(&mut self, callback: F) {
        self.finalizers.push(Box::new(callback));
    }

    /// Advance transactions by moving out intermediate stage callbacks.
    fn advance(&mut self) -> Vec<Callback> {
        mem::take(&mut self.intermediate)
    }

    /// Move out the settling callbacks of the lowest rank.
    fn next_settled(&mut self) -> Vec<Callback> {
        self.settling.pop_first().map(|(_, callbacks)| callbacks).unwrap_or_default()
    }

    /// Finalize the transaction
    fn finalize(self) {
        for finalizer in self.finalizers {
            finalizer();
        }
    }
}


/// Clears the thread's transaction slot, even when a callback unwinds.
struct Active;

impl Drop for Active {
    fn drop(&mut self) {
        let _ = CURRENT_TRANSACTION.try_with(|current| current.borrow_mut().take());
    }
}


/// Whether the current thread is inside a transaction.
pub fn in_transaction() -> bool {
    CURRENT_TRANSACTION.with(|current| current.borrow().is_some())
}

/// Commit a transaction.
///
/// If the thread is not running any transactions currently, the global lock is
/// acquired. Otherwise the body simply becomes part of the running
/// transaction, since given the interface of this module it is safely assumed
/// that the lock is already held.
pub fn commit<A, F: FnOnce() -> A>(body: F) -> A {
    if in_transaction() {
        return body();
    }
    let _lock = TRANSACTION_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
    CURRENT_TRANSACTION.with(|current| *current.borrow_mut() = Some(Transaction::new()));
    let active = Active;
    // Perform the main body of the transaction
    let result = body();
    // Advance the transaction as long as necessary
    loop {
        let mut callbacks = with_current(Transaction::advance);
        if callbacks.is_empty() {
            callbacks = with_current(Transaction::next_settled);
        }
        if callbacks.is_empty() { break }
        for callback in callbacks {
            callback();
        }
    }
    // Call all finalizers and drop the transaction
    let finished = CURRENT_TRANSACTION.with(|current| current.borrow_mut().take());
    drop(active);
    if let Some(transaction) = finished {
        transaction.finalize();
    }
    result
}


/// Register a callback during a transaction.
pub fn with_current<A, F: FnOnce(&mut Transaction) -> A>(action: F) -> A {
    CURRENT_TRANSACTION.with(|current|
        match &mut *current.borrow_mut() {
            Some(trans) => action(trans),
            None => panic!("there is no active transaction to register a callback"),
        }
    )
}

pub fn later<F: FnOnce() + 'static>(action: F) {
    with_current(|c| c.later(action))
}

pub fn settle<F: FnOnce() + 'static>(rank: usize, action: F) {
    with_current(|c| c.settle(rank, action))
}

pub fn end<F: FnOnce() + 'static>(action: F) {
    with_current(|c| c.end(action))
}

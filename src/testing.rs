//! Utilities for the test suite.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use crate::stream::Stream;
use crate::subscription::Subscription;
use crate::transaction::commit;


/// The identity function.
pub fn id<T>(t: T) -> T { t }

/// Every event a stream fired since recording started.
pub struct Recorder<A> {
    events: Arc<Mutex<Vec<A>>>,
    _subscription: Subscription,
}

impl<A: Clone> Recorder<A> {
    pub fn events(&self) -> Vec<A> {
        commit(|| self.events.lock().unwrap().clone())
    }
}

/// Start recording a stream.
pub fn record<A>(stream: &Stream<A>) -> Recorder<A>
    where A: Clone + Send + Sync + 'static
{
    let events = Arc::new(Mutex::new(vec![]));
    let subscription = {
        let events = events.clone();
        stream.subscribe(move |a| events.lock().unwrap().push(a))
    };
    Recorder { events, _subscription: subscription }
}

/// Trace equality of two streams.
pub struct StreamEq<A> {
    left: Recorder<A>,
    right: Recorder<A>,
}

impl<A: Clone + PartialEq + Debug> StreamEq<A> {
    pub fn sample(&self) -> Result<(), String> {
        let (left, right) = (self.left.events(), self.right.events());
        if left == right {
            Ok(())
        } else {
            Err(format!("{:?} != {:?}", left, right))
        }
    }
}

pub fn stream_eq<A>(a: &Stream<A>, b: &Stream<A>) -> StreamEq<A>
    where A: Clone + Send + Sync + 'static
{
    StreamEq { left: record(a), right: record(b) }
}


/// Self-tests.
#[cfg(test)]
mod test {
    use crate::stream::Sink;
    use super::{record, stream_eq};

    #[test]
    fn stream_eq_same_stream() {
        let sink = Sink::new();
        let eq = stream_eq(&sink.stream(), &sink.stream());
        sink.feed(vec![1, 2, 3]);
        assert_eq!(eq.sample(), Ok(()));
    }

    #[test]
    fn stream_eq_detects_difference() {
        let sink = Sink::new();
        let eq = stream_eq(&sink.stream(), &sink.stream().filter(|&x| x > 1));
        sink.feed(vec![1, 2]);
        assert!(eq.sample().is_err());
    }

    #[test]
    fn record_starts_empty() {
        let sink: Sink<i32> = Sink::new();
        assert!(record(&sink.stream()).events().is_empty());
    }
}

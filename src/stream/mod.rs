//! Streams of discrete events

use std::sync::{Arc, Mutex, RwLock};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::signal::{self, Signal};
use crate::source::{lock, with_weak, write, CallbackError, CallbackId, CallbackResult, Source};
use crate::subscription::{self, Subscription, Teardown};
use crate::transaction::{commit, later};


mod debounce;


/// An event sink.
///
/// This primitive is a way of generating streams of events. One can send
/// input values into a sink and generate a stream that fires all these inputs
/// as events:
///
/// ```
/// # use formflow::Sink;
/// // A new sink
/// let sink = Sink::new();
///
/// // Make an iterator over a stream.
/// let mut events = sink.stream().events();
///
/// // Send a value into the sink
/// sink.send(5);
///
/// // The stream
/// assert_eq!(events.next(), Some(5));
/// ```
///
/// You can also feed a sink with an iterator:
///
/// ```
/// # use formflow::Sink;
/// # let sink = Sink::new();
/// # let mut events = sink.stream().events();
/// sink.feed(20..40);
/// assert_eq!(events.take(4).collect::<Vec<_>>(), vec![20, 21, 22, 23]);
/// ```
///
/// A value sent from inside a callback is delivered once the delivery that
/// is currently running has completed, so sinks can be fed re-entrantly.
pub struct Sink<A> {
    source: Arc<RwLock<Source<A>>>,
}

impl<A> Clone for Sink<A> {
    fn clone(&self) -> Sink<A> {
        Sink { source: self.source.clone() }
    }
}

impl<A: Send + Sync> Sink<A> {
    /// Create a new sink.
    pub fn new() -> Sink<A> {
        Sink { source: Arc::new(RwLock::new(Source::new())) }
    }

    /// Generate a stream that fires all events sent into the sink.
    pub fn stream(&self) -> Stream<A> {
        Stream { source: self.source.clone(), keep_alive: Box::new(()) }
    }
}

impl<A: Send + Sync> Default for Sink<A> {
    fn default() -> Sink<A> {
        Sink::new()
    }
}

impl<A: Send + Sync + Clone + 'static> Sink<A> {
    /// Feed values from an iterator into the sink.
    ///
    /// This method feeds events into the sink from an iterator.
    pub fn feed<I: IntoIterator<Item = A>>(&self, iterator: I) {
        for event in iterator {
            self.send(event);
        }
    }

    /// Send a value into the sink.
    ///
    /// When a value is sent into the sink, an event is fired in all dependent
    /// streams.
    pub fn send(&self, a: A) {
        let source = self.source.clone();
        commit(|| later(move || write(&source).send(a)))
    }
}


/// Trait to wrap cloning of boxed values in a object-safe manner
pub trait BoxClone: Sync + Send {
    /// Clone the object as a boxed trait object
    fn box_clone(&self) -> Box<dyn BoxClone>;
}

impl<T: Sync + Send + Clone + 'static> BoxClone for T {
    fn box_clone(&self) -> Box<dyn BoxClone> {
        Box::new(self.clone())
    }
}


/// Access a stream's source.
///
/// This is not defined as a method, so that it can be public to other modules
/// in this crate while being private outside the crate.
pub(crate) fn source<A>(stream: &Stream<A>) -> &Arc<RwLock<Source<A>>> {
    &stream.source
}

/// Slot that receives the id of a callback once it is attached.
pub(crate) type Attachment = Arc<RwLock<Option<CallbackId>>>;

/// Register a callback with a source.
///
/// Registration is queued in the running transaction rather than performed
/// on the spot, so that it is safe to attach to a source from within one of
/// that source's own callbacks. Must be called inside `commit`.
pub(crate) fn attach<A, F>(source: &Arc<RwLock<Source<A>>>, callback: F) -> Attachment
    where A: 'static,
          F: FnMut(A) -> CallbackResult + Send + Sync + 'static,
{
    let slot: Attachment = Arc::new(RwLock::new(None));
    let source = source.clone();
    let filled = slot.clone();
    later(move || {
        let id = write(&source).register(callback);
        *write(&filled) = Some(id);
    });
    slot
}


/// A stream of events.
///
/// Conceptually a stream can be thought of as a series of discrete events that
/// occur at specific times. They are ordered by a transaction system. This
/// means that firings of disjoint events can not interfere with each other. The
/// consequences of one event are atomically reflected in dependent quantities.
///
/// Streams provide a number of primitive operations. These can be used to
/// compose streams and combine them with signals. For instance, streams can be
/// mapped over with a function, merged with another stream of the same type,
/// filtered by some predicate, or throttled with `debounce` and `distinct`.
///
/// # Algebraic laws
///
/// Streams of the same type form a **monoid** under merging with
/// `Stream::never()` as the neutral element, and a **functor** under `map`:
///
/// - `Stream::never().merge(&a) == a` and `a.merge(&Stream::never()) == a`,
/// - `a.merge(&b).merge(&c) == a.merge(&b.merge(&c))`,
/// - `a.map(|x| x) == a`,
/// - `a.map(f).map(g) == a.map(|x| g(f(x)))`.
///
/// *Equality here means that both sides fire the same events in the same
/// order.*
pub struct Stream<A> {
    source: Arc<RwLock<Source<A>>>,
    #[allow(dead_code)]
    keep_alive: Box<dyn BoxClone>,
}

impl<A> Clone for Stream<A> {
    fn clone(&self) -> Stream<A> {
        Stream {
            source: self.source.clone(),
            keep_alive: self.keep_alive.box_clone(),
        }
    }
}


impl<A: Clone + Send + Sync + 'static> Stream<A> {
    /// Create a stream that never fires. This can be useful in certain
    /// situations, where a stream is logically required, but no events are
    /// expected.
    pub fn never() -> Stream<A> {
        Stream {
            source: Arc::new(RwLock::new(Source::new())),
            keep_alive: Box::new(()),
        }
    }

    /// Map the stream to another stream using a function.
    ///
    /// `map` applies a function to every event fired in this stream to create a
    /// new stream of type `B`.
    ///
    /// ```
    /// # use formflow::Sink;
    /// let sink: Sink<i32> = Sink::new();
    /// let mut events = sink.stream().map(|x| x + 4).events();
    /// sink.send(3);
    /// assert_eq!(events.next(), Some(7));
    /// ```
    pub fn map<B, F>(&self, f: F) -> Stream<B>
        where B: Send + Sync + Clone + 'static,
              F: Fn(A) -> B + Send + Sync + 'static,
    {
        commit(|| {
            let src = Arc::new(RwLock::new(Source::new()));
            let weak = Arc::downgrade(&src);
            attach(&self.source, move |a| {
                // user code runs outside the lock
                let b = f(a);
                with_weak(&weak, |src| src.send(b))
            });
            Stream {
                source: src,
                keep_alive: Box::new(self.clone()),
            }
        })
    }

    /// Filter a stream according to a predicate.
    ///
    /// ```
    /// # use formflow::Sink;
    /// let sink: Sink<i32> = Sink::new();
    /// let mut events = sink.stream()
    ///     .filter(|&x| (x >= 4) && (x <= 10))
    ///     .events();
    /// sink.send(2); // won't arrive
    /// sink.send(5); // will arrive
    /// assert_eq!(events.next(), Some(5));
    /// ```
    pub fn filter<F>(&self, f: F) -> Stream<A>
        where F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.filter_map(move |a| if f(&a) { Some(a) } else { None })
    }

    /// Both filter and map a stream.
    ///
    /// This is equivalent to `.map(f).filter_some()`.
    pub fn filter_map<B, F>(&self, f: F) -> Stream<B>
        where B: Send + Sync + Clone + 'static,
              F: Fn(A) -> Option<B> + Send + Sync + 'static,
    {
        self.map(f).filter_some()
    }

    /// Merge with another stream.
    ///
    /// `merge` takes two streams and creates a new stream that fires events
    /// from both input streams.
    pub fn merge(&self, other: &Stream<A>) -> Stream<A> {
        commit(|| {
            let src = Arc::new(RwLock::new(Source::new()));
            for parent in [self, other].iter() {
                let weak = Arc::downgrade(&src);
                attach(&parent.source, move |a| with_weak(&weak, |src| src.send(a)));
            }
            Stream {
                source: src,
                keep_alive: Box::new((self.clone(), other.clone())),
            }
        })
    }

    /// Suppress events that do not differ from the last forwarded event.
    ///
    /// The comparison is against the last event *forwarded* by this stream,
    /// so a value that briefly changed and came back is still dropped when
    /// the intermediate value was never forwarded.
    ///
    /// ```
    /// # use formflow::Sink;
    /// let sink = Sink::new();
    /// let mut events = sink.stream().distinct().events();
    /// sink.feed(vec![1, 1, 2, 2, 1]);
    /// assert_eq!(events.take(3).collect::<Vec<_>>(), vec![1, 2, 1]);
    /// ```
    pub fn distinct(&self) -> Stream<A>
        where A: PartialEq,
    {
        commit(|| {
            let src = Arc::new(RwLock::new(Source::new()));
            let weak = Arc::downgrade(&src);
            let mut last: Option<A> = None;
            attach(&self.source, move |a| {
                if weak.strong_count() == 0 {
                    return Err(CallbackError::Disappeared);
                }
                if last.as_ref() == Some(&a) {
                    return Ok(());
                }
                last = Some(a.clone());
                with_weak(&weak, |src| src.send(a))
            });
            Stream {
                source: src,
                keep_alive: Box::new(self.clone()),
            }
        })
    }

    /// Forward an event only once the stream has been quiet for `window`.
    ///
    /// Every event restarts the quiet window; when it elapses the most recent
    /// event is fired. Timers run on the ambient tokio runtime. Dropping the
    /// last handle to the debounced stream cancels a pending timer.
    pub fn debounce(&self, window: Duration) -> Stream<A> {
        commit(|| debounce::stream(self, window))
    }

    /// Debounce followed by `distinct`, the usual treatment of typed input.
    pub fn debounce_distinct(&self, window: Duration) -> Stream<A>
        where A: PartialEq,
    {
        self.debounce(window).distinct()
    }

    /// Apply the throttling described by a pipeline configuration.
    pub fn pipeline(&self, config: &PipelineConfig) -> Stream<A>
        where A: PartialEq,
    {
        let debounced = match config.debounce() {
            Some(window) => self.debounce(window),
            None => self.clone(),
        };
        if config.distinct { debounced.distinct() } else { debounced }
    }

    /// Hold an event in a signal.
    ///
    /// The resulting signal `hold`s the value of the last event fired by the
    /// stream.
    ///
    /// ```
    /// # use formflow::Sink;
    /// let sink = Sink::new();
    /// let signal = sink.stream().hold(0);
    /// assert_eq!(signal.sample(), 0);
    /// sink.send(2);
    /// assert_eq!(signal.sample(), 2);
    /// ```
    pub fn hold(&self, initial: A) -> Signal<A> {
        signal::hold(initial, self)
    }

    /// A blocking iterator over the stream.
    pub fn events(&self) -> Events<A> { Events::new(self) }

    /// Call `callback` with every event until the subscription is released.
    ///
    /// A panicking callback is logged and stays subscribed; it does not keep
    /// other subscribers from receiving the event.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
        where F: FnMut(A) + Send + Sync + 'static,
    {
        subscription::subscribe(self, None, callback)
    }

    /// Like `subscribe`, but no callback is dispatched once `teardown` has
    /// fired.
    pub fn subscribe_until<F>(&self, teardown: &Teardown, callback: F) -> Subscription
        where F: FnMut(A) + Send + Sync + 'static,
    {
        subscription::subscribe(self, Some(teardown.clone()), callback)
    }
}

impl<A: Clone + Send + Sync + 'static> Stream<Option<A>> {
    /// Filter a stream of options.
    ///
    /// `filter_some` creates a new stream that only fires the unwrapped
    /// `Some(…)` events from the original stream omitting any `None` events.
    ///
    /// ```
    /// # use formflow::Sink;
    /// let sink = Sink::new();
    /// let mut events = sink.stream().filter_some().events();
    /// sink.send(None); // won't arrive
    /// sink.send(Some(5)); // will arrive
    /// assert_eq!(events.next(), Some(5));
    /// ```
    pub fn filter_some(&self) -> Stream<A> {
        commit(|| {
            let src = Arc::new(RwLock::new(Source::new()));
            let weak = Arc::downgrade(&src);
            attach(&self.source, move |a: Option<A>| match a {
                Some(a) => with_weak(&weak, |src| src.send(a)),
                None if weak.strong_count() == 0 => Err(CallbackError::Disappeared),
                None => Ok(()),
            });
            Stream {
                source: src,
                keep_alive: Box::new(self.clone())
            }
        })
    }
}


/// A blocking iterator over events in a stream.
pub struct Events<A> {
    receiver: Receiver<A>,
    #[allow(dead_code)]
    keep_alive: Box<dyn BoxClone>,
}

impl<A: Clone + Send + Sync + 'static> Events<A> {
    /// Create a new events iterator.
    fn new(stream: &Stream<A>) -> Events<A> {
        commit(|| {
            let (tx, rx) = channel();
            let tx = Mutex::new(tx);
            attach(&stream.source, move |a| lock(&tx)
                .send(a)
                .map_err(|_| CallbackError::Disappeared)
            );
            Events {
                receiver: rx,
                keep_alive: Box::new(stream.clone()),
            }
        })
    }
}

impl<A: Send + Sync + 'static> Iterator for Events<A> {
    type Item = A;
    fn next(&mut self) -> Option<A> { self.receiver.recv().ok() }
}


#[cfg(test)]
mod test {
    use std::time::Duration;
    use quickcheck::quickcheck;
    use tokio::time::{sleep, Instant};

    use crate::testing::{id, record, stream_eq};
    use super::*;

    #[test]
    fn sink() {
        let sink = Sink::new();
        let mut events = sink.stream().events();
        sink.send(1);
        sink.send(2);
        assert_eq!(events.next(), Some(1));
        assert_eq!(events.next(), Some(2));
    }

    #[test]
    fn map() {
        let sink = Sink::new();
        let triple = sink.stream().map(|x| 3 * x);
        let mut events = triple.events();
        sink.send(1);
        assert_eq!(events.next(), Some(3));
    }

    #[test]
    fn filter_some() {
        let sink = Sink::new();
        let small = sink.stream().filter_some();
        let mut events = small.events();
        sink.send(None);
        sink.send(Some(9));
        assert_eq!(events.next(), Some(9));
    }

    #[test]
    fn chain_1() {
        let sink: Sink<i32> = Sink::new();
        let chain = sink.stream()
            .map(|x| x / 2)
            .filter(|&x| x < 3);
        let mut events = chain.events();
        sink.send(7);
        sink.send(4);
        assert_eq!(events.next(), Some(2));
    }

    #[test]
    fn merge() {
        let sink1 = Sink::new();
        let sink2 = Sink::new();
        let mut events = sink1.stream().merge(&sink2.stream()).events();
        sink1.send(12);
        sink2.send(9);
        assert_eq!(events.next(), Some(12));
        assert_eq!(events.next(), Some(9));
    }

    #[test]
    fn chain_2() {
        let sink1: Sink<i32> = Sink::new();
        let sink2: Sink<i32> = Sink::new();
        let mut events = sink1.stream().map(|x| x + 4)
            .merge(
                &sink2.stream()
                .filter_map(|x| if x < 4 { Some(x) } else { None })
                .map(|x| x * 5))
            .events();
        sink1.send(12);
        sink2.send(3);
        assert_eq!(events.next(), Some(16));
        assert_eq!(events.next(), Some(15));
    }

    #[test]
    fn move_closure() {
        let sink = Sink::<i32>::new();
        let x = 3;
        sink.stream().map(move |y| y + x);
    }

    #[test]
    fn sink_feed() {
        let sink = Sink::new();
        let events = sink.stream().events();
        sink.feed(0..10);
        for (n, m) in events.take(10).enumerate() {
            assert_eq!(n as i32, m);
        }
    }

    #[test]
    fn dropped_stream_detaches_from_parent() {
        let sink: Sink<i32> = Sink::new();
        let mapped = sink.stream().map(|x| x + 1);
        sink.send(1);
        assert_eq!(write(&sink.source).len(), 1);
        drop(mapped);
        sink.send(2);
        assert_eq!(write(&sink.source).len(), 0);
    }

    #[test]
    fn distinct_compares_with_last_forwarded() {
        let sink = Sink::new();
        let seen = record(&sink.stream().distinct());
        sink.feed(vec![1, 1, 2, 2, 2, 3, 1, 1]);
        assert_eq!(seen.events(), vec![1, 2, 3, 1]);
    }

    #[test]
    fn distinct_collapses_equal_runs() {
        fn check(value: i32, repeats: u8) -> bool {
            let sink = Sink::new();
            let seen = record(&sink.stream().distinct());
            sink.feed(std::iter::repeat(value).take(repeats as usize + 1));
            seen.events() == vec![value]
        }
        quickcheck(check as fn(i32, u8) -> bool);
    }

    #[test]
    fn subscribe_and_release() {
        let sink = Sink::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
        let mut subscription = {
            let seen = seen.clone();
            sink.stream().subscribe(move |x: i32| seen.lock().unwrap().push(x))
        };
        sink.send(1);
        subscription.release();
        assert!(subscription.is_released());
        sink.send(2);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(write(&sink.source).len(), 0);
    }

    #[test]
    fn subscribe_from_inside_callback() {
        let sink: Sink<i32> = Sink::new();
        let inner = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
        let _outer = {
            let stream = sink.stream();
            let inner = inner.clone();
            let held = std::sync::Mutex::new(vec![]);
            sink.stream().subscribe(move |x| {
                if x == 1 {
                    let inner = inner.clone();
                    held.lock().unwrap().push(
                        stream.subscribe(move |y| inner.lock().unwrap().push(y))
                    );
                }
            })
        };
        sink.send(1);
        sink.send(2);
        assert_eq!(*inner.lock().unwrap(), vec![2]);
    }

    #[test]
    fn send_from_inside_callback_is_delivered_afterwards() {
        let sink: Sink<i32> = Sink::new();
        let seen = record(&sink.stream());
        let _echo = {
            let sink = sink.clone();
            sink.stream().subscribe(move |x| if x < 3 { sink.send(x + 1) })
        };
        sink.send(0);
        assert_eq!(seen.events(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn panicking_subscriber_does_not_starve_others() {
        let sink: Sink<i32> = Sink::new();
        let _bad = sink.stream().subscribe(|x| if x == 1 { panic!("subscriber failed") });
        let seen = record(&sink.stream());
        sink.feed(vec![1, 2]);
        assert_eq!(seen.events(), vec![1, 2]);
    }

    #[test]
    fn panicking_operator_does_not_disconnect_siblings() {
        let sink: Sink<i32> = Sink::new();
        let fragile = record(&sink.stream().filter(|&x| if x == 1 { panic!("bad predicate") } else { true }));
        let doubled = record(&sink.stream().map(|x| x * 2));
        sink.feed(vec![1, 2]);
        assert_eq!(fragile.events(), vec![2]);
        assert_eq!(doubled.events(), vec![2, 4]);
        assert_eq!(write(&sink.source).len(), 2);
    }

    #[test]
    fn pipeline_without_debounce_only_dedups() {
        let sink = Sink::new();
        let config = PipelineConfig { debounce_ms: 0, distinct: true };
        let seen = record(&sink.stream().pipeline(&config));
        sink.feed(vec!["a", "a", "b"]);
        assert_eq!(seen.events(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_fires_last_value_after_quiet_window() {
        let sink = Sink::new();
        let start = Instant::now();
        let fired = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
        let _subscription = {
            let fired = fired.clone();
            sink.stream()
                .debounce_distinct(Duration::from_millis(300))
                .subscribe(move |v: &'static str| {
                    fired.lock().unwrap().push((v, start.elapsed()))
                })
        };
        sink.send("a");
        sleep(Duration::from_millis(100)).await;
        sink.send("ab");
        sleep(Duration::from_millis(50)).await;
        sink.send("abc");
        sleep(Duration::from_millis(350)).await;
        sink.send("abc");
        sleep(Duration::from_millis(1000)).await;

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, "abc");
        assert!(fired[0].1 >= Duration::from_millis(450));
        assert!(fired[0].1 < Duration::from_millis(460));
    }

    #[tokio::test(start_paused = true)]
    async fn release_cancels_pending_debounce() {
        let sink = Sink::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
        let mut subscription = {
            let seen = seen.clone();
            sink.stream()
                .debounce(Duration::from_millis(300))
                .subscribe(move |v: i32| seen.lock().unwrap().push(v))
        };
        sink.send(1);
        sleep(Duration::from_millis(100)).await;
        subscription.release();
        sleep(Duration::from_millis(500)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn debounce_outside_runtime_forwards_immediately() {
        let sink = Sink::new();
        let seen = record(&sink.stream().debounce(Duration::from_millis(300)));
        sink.send(7);
        assert_eq!(seen.events(), vec![7]);
    }

    #[test]
    fn monoid_left_identity() {
        fn check(input: Vec<i32>) -> Result<(), String> {
            let sink = Sink::new();
            let a = sink.stream();
            let eq = stream_eq(&Stream::never().merge(&a), &a);
            sink.feed(input.into_iter());
            eq.sample()
        }
        quickcheck(check as fn(Vec<i32>) -> Result<(), String>);
    }

    #[test]
    fn monoid_right_identity() {
        fn check(input: Vec<i32>) -> Result<(), String> {
            let sink = Sink::new();
            let a = sink.stream();
            let eq = stream_eq(&a.merge(&Stream::never()), &a);
            sink.feed(input.into_iter());
            eq.sample()
        }
        quickcheck(check as fn(Vec<i32>) -> Result<(), String>);
    }

    #[test]
    fn monoid_associative() {
        fn check(input_a: Vec<i32>, input_b: Vec<i32>, input_c: Vec<i32>) -> Result<(), String> {
            let sink_a = Sink::new();
            let sink_b = Sink::new();
            let sink_c = Sink::new();
            let a = sink_a.stream();
            let b = sink_b.stream();
            let c = sink_c.stream();
            let eq = stream_eq(&a.merge(&b.merge(&c)), &a.merge(&b).merge(&c));
            sink_a.feed(input_a);
            sink_b.feed(input_b);
            sink_c.feed(input_c);
            eq.sample()
        }
        quickcheck(check as fn(Vec<i32>, Vec<i32>, Vec<i32>) -> Result<(), String>);
    }

    #[test]
    fn functor_identity() {
        fn check(input: Vec<i32>) -> Result<(), String> {
            let sink = Sink::new();
            let a = sink.stream();
            let eq = stream_eq(&a.map(id), &a);
            sink.feed(input.into_iter());
            eq.sample()
        }
        quickcheck(check as fn(Vec<i32>) -> Result<(), String>);
    }

    #[test]
    fn functor_composition() {
        fn check(input: Vec<i32>) -> Result<(), String> {
            fn f(n: i32) -> i64 { (n + 3) as i64 }
            fn g(n: i64) -> i64 { n * 2 - 1 }

            let sink = Sink::new();
            let a = sink.stream();
            let eq = stream_eq(&a.map(f).map(g), &a.map(|n| g(f(n))));
            sink.feed(input.into_iter());
            eq.sample()
        }
        quickcheck(check as fn(Vec<i32>) -> Result<(), String>);
    }
}

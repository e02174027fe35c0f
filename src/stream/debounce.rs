//! Helper module for debounce

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{attach, Stream};
use crate::source::{lock, with_weak, CallbackError, Source};
use crate::transaction::commit;

/// The timer of the most recent event still waiting for its quiet window.
///
/// Dropping the timer aborts it, which happens when the last handle to the
/// debounced stream goes away.
#[derive(Default)]
struct Timer {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    fn replace(&self, task: JoinHandle<()>) {
        let previous = lock(&self.pending).replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = pending.take() {
            task.abort();
        }
    }
}

fn schedule<T>(timer: &Timer, window: Duration, value: T, weak: Weak<RwLock<Source<T>>>)
where
    T: Clone + Send + Sync + 'static,
{
    match Handle::try_current() {
        Ok(handle) => timer.replace(handle.spawn(async move {
            tokio::time::sleep(window).await;
            let _ = commit(|| with_weak(&weak, |src| src.send(value)));
        })),
        Err(_) => {
            tracing::warn!(
                ?window,
                "debounce outside of a tokio runtime, forwarding without delay"
            );
            let _ = with_weak(&weak, |src| src.send(value));
        }
    }
}

pub fn stream<T>(stream: &Stream<T>, window: Duration) -> Stream<T>
where
    T: Clone + Send + Sync + 'static,
{
    let src = Arc::new(RwLock::new(Source::new()));
    let weak = Arc::downgrade(&src);
    let timer = Arc::new(Timer::default());
    attach(&stream.source, {
        let timer = Arc::downgrade(&timer);
        move |value| {
            let timer = timer.upgrade().ok_or(CallbackError::Disappeared)?;
            schedule(&timer, window, value, weak.clone());
            Ok(())
        }
    });
    Stream {
        source: src,
        keep_alive: Box::new((stream.clone(), timer)),
    }
}

#[cfg(test)]
mod tests {
    use super::Timer;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn replacing_aborts_previous_timer() {
        let timer = Timer::default();
        let first = tokio::spawn(tokio::time::sleep(Duration::from_secs(1)));
        let first_abort = first.abort_handle();
        timer.replace(first);
        timer.replace(tokio::spawn(async {}));
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(first_abort.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_timer_aborts_pending_task() {
        let timer = Timer::default();
        let task = tokio::spawn(tokio::time::sleep(Duration::from_secs(1)));
        let abort = task.abort_handle();
        timer.replace(task);
        drop(timer);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }
}

use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::robust_provider::Error;

/// Owns the tasks of every race started through it.
///
/// Losing candidates outlive their race so that their health reports still land, but never the
/// scope: [`RaceScope::shutdown`] cancels whatever is still in flight and waits for it to go.
#[derive(Debug, Clone, Default)]
pub struct RaceScope {
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl RaceScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every candidate concurrently and returns the first success.
    ///
    /// If every candidate fails the collected errors are returned in completion order.
    ///
    /// # Errors
    ///
    /// Returns all candidate errors when none succeeded (an empty list when there were no
    /// candidates or the scope was shut down).
    pub async fn race<T, Fut>(
        &self,
        candidates: impl IntoIterator<Item = Fut>,
    ) -> Result<T, Vec<Error>>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut launched = 0usize;
        for candidate in candidates {
            let tx = tx.clone();
            let cancel = self.cancel.clone();
            self.tasks.spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    result = candidate => {
                        // the receiver is gone once a winner was picked
                        let _ = tx.send(result);
                    }
                }
            });
            launched += 1;
        }
        drop(tx);

        let mut errors = Vec::with_capacity(launched);
        while let Some(result) = rx.recv().await {
            match result {
                Ok(value) => return Ok(value),
                Err(err) => errors.push(err),
            }
        }
        Err(errors)
    }

    /// Cancels candidates that are still running and waits until all of them have finished.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Cancels outstanding candidates without waiting for them.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.tasks.close();
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };
    use tokio::time::sleep;

    async fn after<T>(millis: u64, result: Result<T, Error>) -> Result<T, Error> {
        sleep(Duration::from_millis(millis)).await;
        result
    }

    #[tokio::test(start_paused = true)]
    async fn single_success_wins_regardless_of_order() {
        for winner in 0..3u64 {
            let candidates = (0..3u64).map(|i| {
                let result = if i == winner { Ok(i) } else { Err(Error::Timeout) };
                after(10 * (3 - i), result)
            });
            assert_eq!(RaceScope::new().race(candidates).await.unwrap(), winner);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_success_wins() {
        let candidates = vec![after(30, Ok("slow")), after(10, Ok("fast")), after(5, Err(Error::Timeout))];
        assert_eq!(RaceScope::new().race(candidates).await.unwrap(), "fast");
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_are_collected() {
        let candidates = vec![after::<()>(5, Err(Error::Timeout)), after(1, Err(Error::NoEndpoints))];
        let errors = RaceScope::new().race(candidates).await.unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], Error::NoEndpoints));
        assert!(matches!(errors[1], Error::Timeout));
    }

    #[tokio::test]
    async fn no_candidates_is_an_empty_failure() {
        let candidates: Vec<std::future::Ready<Result<(), Error>>> = vec![];
        assert!(RaceScope::new().race(candidates).await.unwrap_err().is_empty());
    }

    fn counted(
        finished: &Arc<AtomicUsize>,
    ) -> impl Iterator<Item = impl Future<Output = Result<u64, Error>> + Send + 'static> {
        let finished = finished.clone();
        (0..3u64).map(move |i| {
            let finished = finished.clone();
            async move {
                sleep(Duration::from_millis(10 * (i + 1))).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(i)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn losers_keep_running_after_a_winner() {
        let finished = Arc::new(AtomicUsize::new(0));
        let scope = RaceScope::new();

        assert_eq!(scope.race(counted(&finished)).await.unwrap(), 0);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(scope.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_losers_still_in_flight() {
        let finished = Arc::new(AtomicUsize::new(0));
        let scope = RaceScope::new();

        assert_eq!(scope.race(counted(&finished)).await.unwrap(), 0);
        assert_eq!(scope.in_flight(), 2);
        scope.shutdown().await;
        assert_eq!(scope.in_flight(), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shut_down_scope_runs_nothing() {
        let finished = Arc::new(AtomicUsize::new(0));
        let scope = RaceScope::new();
        scope.shutdown().await;

        assert!(scope.race(counted(&finished)).await.unwrap_err().is_empty());
        sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}

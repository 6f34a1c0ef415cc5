//! Drives a [`Sink`] until cancelled.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::sinker::{Sink, Status};
use crate::Result;

/// What a [`SinkRunner`] did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerSummary {
    /// `process` calls that returned [`Status::Ready`].
    pub processed: u64,
    /// `process` calls that returned [`Status::Backoff`].
    pub backoffs: u64,
    /// `process` calls that failed with a delivery error.
    pub failures: u64,
}

/// Calls [`Sink::process`] in a loop.
///
/// After `Ready` the next call is made immediately. After a backoff or a delivery failure the
/// runner pauses, `backoff_increment` longer for every consecutive one, up to `max_backoff`.
/// Failures are never fatal: a sink rolls back before reporting one, so the event is still
/// in the channel for the next call.
pub struct SinkRunner<S> {
    sink: S,
    config: RunnerConfig,
}

impl<S> SinkRunner<S>
where
    S: Sink + 'static,
{
    pub fn new(sink: S, config: RunnerConfig) -> Self {
        Self { sink, config }
    }

    /// Spawns the loop. It exits, returning what it did, once `cln_token` is cancelled.
    pub fn start(self, cln_token: CancellationToken) -> JoinHandle<Result<RunnerSummary>> {
        tokio::spawn(async move { self.run(cln_token).await })
    }

    async fn run(mut self, cln_token: CancellationToken) -> Result<RunnerSummary> {
        let name = self.sink.name().to_string();
        info!(sink = %name, "Starting sink runner");

        let mut summary = RunnerSummary::default();
        let mut consecutive: u32 = 0;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cln_token.cancelled() => break,
                outcome = self.sink.process() => outcome,
            };

            match outcome {
                Ok(Status::Ready) => {
                    summary.processed += 1;
                    consecutive = 0;
                    continue;
                }
                Ok(Status::Backoff) => {
                    summary.backoffs += 1;
                    debug!(sink = %name, "No events available");
                }
                Err(e) => {
                    summary.failures += 1;
                    warn!(sink = %name, error = ?e, "Delivery failed, event will be redelivered");
                }
            }

            consecutive = consecutive.saturating_add(1);
            let pause = self.config.pause_for(consecutive);
            if !pause_or_cancel(pause, &cln_token).await {
                break;
            }
        }

        info!(
            sink = %name,
            processed = summary.processed,
            backoffs = summary.backoffs,
            failures = summary.failures,
            "Sink runner stopped"
        );
        Ok(summary)
    }
}

/// Sleeps for `pause`, returning false if cancelled in the meantime.
async fn pause_or_cancel(pause: Duration, cln_token: &CancellationToken) -> bool {
    tokio::select! {
        _ = cln_token.cancelled() => false,
        _ = tokio::time::sleep(pause) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::Error;

    /// Replays a fixed script of outcomes, then reports backoff forever.
    struct ScriptedSink {
        script: VecDeque<Result<Status>>,
        calls: Arc<Mutex<Vec<tokio::time::Instant>>>,
    }

    impl Sink for ScriptedSink {
        async fn process(&mut self) -> Result<Status> {
            self.calls.lock().push(tokio::time::Instant::now());
            self.script.pop_front().unwrap_or(Ok(Status::Backoff))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn scripted(
        script: Vec<Result<Status>>,
    ) -> (ScriptedSink, Arc<Mutex<Vec<tokio::time::Instant>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = ScriptedSink {
            script: script.into(),
            calls: Arc::clone(&calls),
        };
        (sink, calls)
    }

    fn test_config() -> RunnerConfig {
        RunnerConfig {
            backoff_increment: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_grow_linearly_and_cap() {
        let (sink, calls) = scripted(vec![
            Ok(Status::Ready),
            Ok(Status::Ready),
            Ok(Status::Backoff),
            Err(Error::Delivery("disk full".to_string())),
            Ok(Status::Backoff),
            Ok(Status::Backoff),
            Ok(Status::Ready),
        ]);
        let cln_token = CancellationToken::new();
        let handle = SinkRunner::new(sink, test_config()).start(cln_token.clone());

        tokio::time::sleep(Duration::from_millis(850)).await;
        cln_token.cancel();
        let summary = handle.await.unwrap().unwrap();

        let calls = calls.lock();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            &gaps[..6],
            &[
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250),
                Duration::from_millis(250),
            ]
        );
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failures, 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_runner() {
        let (sink, calls) = scripted(vec![
            Err(Error::Delivery("transient".to_string())),
            Err(Error::Io("disk gone".to_string())),
            Ok(Status::Ready),
        ]);
        let config = RunnerConfig {
            backoff_increment: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let cln_token = CancellationToken::new();
        let handle = SinkRunner::new(sink, config).start(cln_token.clone());

        while calls.lock().len() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cln_token.cancel();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_pause() {
        let (sink, _calls) = scripted(vec![]);
        let config = RunnerConfig {
            backoff_increment: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let cln_token = CancellationToken::new();
        let handle = SinkRunner::new(sink, config).start(cln_token.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        cln_token.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.backoffs, 1);
        assert_eq!(summary.processed, 0);
    }
}

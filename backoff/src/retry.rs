use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use pin_project::pin_project;
use tokio::time::{Sleep, sleep};

use crate::{Condition, Operation};

/// The two things a [`Retry`] can be doing: waiting on an attempt of the [`Operation`], or
/// sleeping off the delay the schedule handed out before starting the next attempt.
///
/// ```no_rust
///  Attempt --Ok--------------------------> Ready(Ok)
///     |
///     +--Err, condition says no----------> Ready(Err)
///     |
///     +--Err, schedule exhausted---------> Ready(Err)
///     |
///     +--Err, next delay d--> Wait(d) --elapsed--> Attempt
/// ```
#[pin_project(project = PhaseProj)]
enum Phase<F> {
    Attempt(#[pin] F),
    Wait(#[pin] Sleep),
}

/// Re-runs an [`Operation`] until it succeeds or there is no reason to keep trying.
///
/// The error of the final attempt is returned unchanged, so callers can tell "gave up" apart
/// from "condition refused" by inspecting it.
#[pin_project]
pub struct Retry<I, O, C>
where
    O: Operation,
{
    #[pin]
    phase: Phase<O::Future>,
    schedule: I,
    operation: O,
    condition: C,
}

impl<I, O, C> Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    pub fn new<S>(schedule: S, mut operation: O, condition: C) -> Self
    where
        S: IntoIterator<IntoIter = I, Item = Duration>,
    {
        Self {
            phase: Phase::Attempt(operation.run()),
            schedule: schedule.into_iter(),
            operation,
            condition,
        }
    }
}

impl<I, O, C> Future for Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    type Output = Result<O::Item, O::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        loop {
            let next = match this.phase.as_mut().project() {
                PhaseProj::Attempt(attempt) => {
                    let error = match ready!(attempt.poll(cx)) {
                        Ok(item) => return Poll::Ready(Ok(item)),
                        Err(error) => error,
                    };
                    if !this.condition.can_retry(&error) {
                        return Poll::Ready(Err(error));
                    }
                    match this.schedule.next() {
                        Some(delay) => Phase::Wait(sleep(delay)),
                        None => return Poll::Ready(Err(error)),
                    }
                }
                PhaseProj::Wait(wait) => {
                    ready!(wait.poll(cx));
                    Phase::Attempt(this.operation.run())
                }
            };
            this.phase.set(next);
        }
    }
}

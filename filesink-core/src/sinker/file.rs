//! Appends events to a local file, one line per event.
//!
//! Each record is `<payload>:<epoch-millis>\r\n`. Writing and committing happen in a task of
//! their own, so dropping a `process` future halfway never leaves a partial record behind: the
//! task still finishes and either commits the record or cuts it back off and rolls back.

use std::borrow::Cow;

use backoff::retry::Retry;
use backoff::strategy::budget::Budget;
use backoff::strategy::exponential::Exponential;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{Sink, Status};
use crate::channel::{Channel, Transaction};
use crate::config::{Context, DecodePolicy, FileSinkConfig};
use crate::message::{Event, EventId};
use crate::metrics::SinkCounter;
use crate::{Error, Result};

mod writer;
use writer::RecordFile;

const SEPARATOR: u8 = b':';
const TERMINATOR: &[u8] = b"\r\n";

/// Why a poll of the channel came back without an event.
#[derive(Debug)]
enum TakeError {
    Empty,
    Failed(Error),
}

/// Sink writing every event of a channel to one file.
pub struct FileSink<C: Channel> {
    name: String,
    channel: C,
    config: FileSinkConfig,
    file: RecordFile,
    counter: SinkCounter,
}

impl<C: Channel> FileSink<C> {
    /// Builds a sink from its `<agent>.sinks.<name>.` properties. Fails with
    /// [`Error::Config`] if `filename` is missing or empty, or any setting does not parse.
    pub fn configure(name: &str, context: &Context, channel: C) -> Result<Self> {
        let config = FileSinkConfig::try_from(context)?;
        info!(
            sink = name,
            channel = channel.name(),
            path = %config.path.display(),
            decode = %config.decode,
            sync = config.sync,
            "Configured file sink"
        );
        Ok(Self::new(name, config, channel))
    }

    pub fn new(name: &str, config: FileSinkConfig, channel: C) -> Self {
        Self {
            name: name.to_string(),
            channel,
            file: RecordFile::new(&config.path, config.sync),
            counter: SinkCounter::new(name),
            config,
        }
    }

    pub fn config(&self) -> &FileSinkConfig {
        &self.config
    }

    pub fn counter(&self) -> SinkCounter {
        self.counter.clone()
    }

    async fn process_event(&mut self) -> Result<Status> {
        let mut txn = self.channel.begin_transaction()?;

        let Some(event) = self.poll_event(&mut txn).await? else {
            self.counter.inc_empty_poll();
            // nothing was taken, so a failed rollback loses nothing
            abort(&mut txn, &self.name);
            txn.close();
            return Ok(Status::Backoff);
        };
        self.counter.inc_drain_attempt();

        let record = match render(&event, self.config.decode, Utc::now().timestamp_millis()) {
            Ok(record) => record,
            Err(e) => {
                abort(&mut txn, &self.name);
                txn.close();
                return Err(e);
            }
        };

        let delivery = tokio::spawn(deliver(
            txn,
            self.file.clone(),
            record,
            event.id,
            self.name.clone(),
        ));
        match delivery.await {
            Ok(result) => result?,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                return Err(Error::Delivery(format!(
                    "delivery of event {} did not finish: {e}",
                    event.id
                )));
            }
        }

        self.counter.inc_drain_success();
        Ok(Status::Ready)
    }

    /// Waits for an event, giving up once `take_timeout` worth of polling delays is spent.
    async fn poll_event(&self, txn: &mut C::Transaction) -> Result<Option<Event>> {
        let schedule = Budget::new(
            Exponential::new(
                self.config.poll_interval,
                self.config.poll_max_interval,
                2.0,
                0.0,
                None,
            ),
            self.config.take_timeout,
        );

        let take = || {
            let polled = match txn.take() {
                Ok(Some(event)) => Ok(event),
                Ok(None) => Err(TakeError::Empty),
                Err(e) => Err(TakeError::Failed(e)),
            };
            async move { polled }
        };

        match Retry::new(schedule, take, |e: &TakeError| {
            matches!(e, TakeError::Empty)
        })
        .await
        {
            Ok(event) => Ok(Some(event)),
            Err(TakeError::Empty) => Ok(None),
            Err(TakeError::Failed(e)) => Err(e),
        }
    }
}

impl<C: Channel> Sink for FileSink<C> {
    async fn process(&mut self) -> Result<Status> {
        let result = self.process_event().await;
        if let Err(e) = &result {
            self.counter.inc_delivery_error();
            warn!(sink = %self.name, error = ?e, "Failed to deliver event, rolled back");
        }
        result.map_err(Error::into_delivery)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Appends the record and commits, or leaves neither the record nor the commit behind.
/// Consumes the transaction and always closes it.
async fn deliver<T: Transaction>(
    mut txn: T,
    file: RecordFile,
    record: Vec<u8>,
    id: EventId,
    sink: String,
) -> Result<()> {
    let result = append_and_commit(&mut txn, &file, record, id, &sink).await;
    if result.is_err() {
        abort(&mut txn, &sink);
    }
    txn.close();
    result
}

async fn append_and_commit<T: Transaction>(
    txn: &mut T,
    file: &RecordFile,
    record: Vec<u8>,
    id: EventId,
    sink: &str,
) -> Result<()> {
    // held until the commit outcome is known, so the record is still the tail if it has to go
    let guard = file.lock().await;
    let appended = guard.append(record).await?;
    debug!(sink, event = %id, bytes = appended.len(), "Appended record");

    if let Err(e) = txn.commit() {
        if let Err(retract_err) = guard.retract(appended).await {
            error!(
                sink,
                event = %id,
                error = ?retract_err,
                "Commit failed and the appended record could not be removed"
            );
        }
        return Err(e);
    }
    Ok(())
}

fn abort<T: Transaction>(txn: &mut T, sink: &str) {
    if let Err(e) = txn.rollback() {
        // the transaction is still open, close() hands the event back
        warn!(sink, error = ?e, "Rollback failed");
    }
}

/// Builds `<payload>:<millis>\r\n`.
fn render(event: &Event, decode: DecodePolicy, timestamp_millis: i64) -> Result<Vec<u8>> {
    let text = match decode {
        DecodePolicy::Strict => Cow::Borrowed(std::str::from_utf8(&event.body).map_err(|e| {
            Error::Delivery(format!("event {} is not valid UTF-8: {e}", event.id))
        })?),
        DecodePolicy::Lossy => String::from_utf8_lossy(&event.body),
    };

    let timestamp = timestamp_millis.to_string();
    let mut record = Vec::with_capacity(text.len() + timestamp.len() + 1 + TERMINATOR.len());
    record.extend_from_slice(text.as_bytes());
    record.push(SEPARATOR);
    record.extend_from_slice(timestamp.as_bytes());
    record.extend_from_slice(TERMINATOR);
    Ok(record)
}

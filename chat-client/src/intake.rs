//! Fan-in of subscription streams into one bounded queue.
//!
//! Every merged subscription gets its own producer task that forwards
//! records into the shared queue; the session consumes the queue in one
//! loop, so records are processed one at a time.
//!
//! Shutdown order matters: producers are cancelled and awaited first, then
//! the queue is dropped. A producer that finds the queue already gone fails
//! with [`IntakeError::QueueClosed`] instead of dropping records silently.

use crate::transport::{RelayRecord, Subscription};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Intake errors.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// A producer tried to forward into a closed queue.
    #[error("intake queue closed while {source_name} was still producing")]
    QueueClosed {
        /// Subscription the producer was forwarding.
        source_name: String,
    },

    /// A producer task panicked or was aborted.
    #[error("producer for {source_name} failed: {reason}")]
    ProducerFailed {
        /// Subscription the producer was forwarding.
        source_name: String,
        /// Join error.
        reason: String,
    },

    /// The intake no longer accepts new sources.
    #[error("intake is closed")]
    Closed,
}

type Producer = (String, JoinHandle<Result<usize, IntakeError>>);

/// Bounded merge of subscription streams.
#[derive(Debug)]
pub struct Intake {
    sender: Option<mpsc::Sender<RelayRecord>>,
    receiver: mpsc::Receiver<RelayRecord>,
    cancel: CancellationToken,
    producers: Vec<Producer>,
}

impl Intake {
    /// Empty intake with a queue bound of `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Some(sender),
            receiver,
            cancel: CancellationToken::new(),
            producers: Vec::new(),
        }
    }

    /// Forward `subscription` into the queue until it ends or the intake
    /// shuts down.
    ///
    /// Merging a name again drops the entries of earlier producers under
    /// that name that already finished.
    pub fn merge(&mut self, mut subscription: Subscription) -> Result<(), IntakeError> {
        let sender = self.sender.clone().ok_or(IntakeError::Closed)?;
        let cancel = self.cancel.child_token();
        let name = subscription.name.clone();
        let source_name = name.clone();

        self.producers
            .retain(|(existing, handle)| *existing != name || !handle.is_finished());

        let handle = tokio::spawn(async move {
            let mut forwarded = 0usize;
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    item = subscription.records.recv() => item,
                };
                let Some(item) = item else { break };

                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = sender.send(item) => sent,
                };
                if sent.is_err() {
                    tracing::error!(source = %source_name, "intake queue closed, producer stopping");
                    return Err(IntakeError::QueueClosed { source_name });
                }
                forwarded += 1;
            }
            tracing::debug!(source = %source_name, forwarded, "producer finished");
            Ok(forwarded)
        });

        self.producers.push((name, handle));
        Ok(())
    }

    /// Next record from any merged source.
    ///
    /// Returns `None` once the intake is sealed and every producer finished.
    pub async fn recv(&mut self) -> Option<RelayRecord> {
        self.receiver.recv().await
    }

    /// Stop accepting new sources. The queue ends after the current
    /// producers finish.
    pub fn seal(&mut self) {
        self.sender = None;
    }

    /// True once [`seal`](Self::seal), [`close`](Self::close) or shutdown
    /// stopped new sources from being merged.
    pub fn is_sealed(&self) -> bool {
        self.sender.is_none()
    }

    /// Close the queue while producers may still be running.
    ///
    /// Records buffered in the queue can still be received; producers that
    /// try to forward more fail with [`IntakeError::QueueClosed`].
    pub fn close(&mut self) {
        self.sender = None;
        self.receiver.close();
    }

    /// Names of merged sources whose entries are still held, in merge order.
    pub fn sources(&self) -> Vec<&str> {
        self.producers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Cancel and await every producer, then drop the queue.
    ///
    /// Returns the errors producers finished with.
    pub async fn shutdown(mut self) -> Vec<IntakeError> {
        self.sender = None;
        self.cancel.cancel();

        let mut errors = Vec::new();
        for (name, handle) in self.producers.drain(..) {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => {
                    tracing::error!(source = %name, "producer task failed: {}", e);
                    errors.push(IntakeError::ProducerFailed {
                        source_name: name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        drop(self.receiver);
        errors
    }
}

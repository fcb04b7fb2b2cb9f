use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// What travels through the pump channel.
///
/// End of stream is a distinct variant rather than a reserved item value, so
/// no item, whatever its contents, can be mistaken for it.
#[derive(Debug)]
pub(crate) enum Envelope<T> {
    Item(T),
    End,
}

/// The consumer went away or the pump was interrupted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("stream consumer is no longer receiving")]
pub struct PumpStopped;

/// Producer-side handle of a bounded pump channel.
#[derive(Debug)]
pub struct Emitter<T> {
    tx: mpsc::Sender<Envelope<T>>,
    stop: CancellationToken,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stop: self.stop.clone(),
        }
    }
}

pub(crate) fn bounded<T>(
    capacity: usize,
    stop: CancellationToken,
) -> (Emitter<T>, mpsc::Receiver<Envelope<T>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Emitter { tx, stop }, rx)
}

impl<T> Emitter<T> {
    /// Waits for channel capacity and enqueues `item`. Returns `PumpStopped`
    /// once the consumer has stopped listening; the producer should then return.
    pub async fn emit(&self, item: T) -> Result<(), PumpStopped> {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => Err(PumpStopped),
            sent = self.tx.send(Envelope::Item(item)) => sent.map_err(|_| PumpStopped),
        }
    }

    /// Resolves when the consumer stops listening.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }

    /// Enqueues the end marker. Called once by the pump after the producer returns.
    pub(crate) async fn close(self) {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => {}
            _ = self.tx.send(Envelope::End) => {}
        }
    }
}

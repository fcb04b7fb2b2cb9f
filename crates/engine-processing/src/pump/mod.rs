//! Producer/consumer streaming pipeline.
//!
//! A producer runs on its own task and pushes values into a bounded channel;
//! the caller pulls them lazily through [`StreamingPump::next`] or as a
//! [`futures::Stream`].

use crate::error::ProcessingError;
use channel::{Envelope, bounded};
use engine_config::settings::validated::ExecutionConfig;
use engine_core::cancel::CancellationGuard;
use futures::Stream;
use model::execution::errors::HostError;
use std::{future::Future, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod channel;

pub use channel::{Emitter, PumpStopped};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpOptions {
    pub capacity: usize,
    pub check_every: usize,
    pub poll_interval: Duration,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            capacity: 100,
            check_every: 100,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl PumpOptions {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            capacity: config.queue_capacity,
            check_every: config.cancel_check_every,
            poll_interval: config.cancel_poll_interval,
        }
    }
}

pub struct StreamingPump<T> {
    rx: mpsc::Receiver<Envelope<T>>,
    stop: CancellationToken,
    guard: CancellationGuard,
    producer: Option<JoinHandle<Result<(), HostError>>>,
    options: PumpOptions,
    since_check: usize,
    delivered: u64,
    interrupted: bool,
    finished: bool,
}

impl<T: Send + 'static> StreamingPump<T> {
    /// Spawns `producer` and returns the consuming end.
    ///
    /// The end marker is enqueued after the producer returns, whether it
    /// succeeded or not; a producer error is re-raised by `next` once every
    /// value emitted before it has been delivered.
    pub fn open<F, Fut>(options: PumpOptions, guard: CancellationGuard, producer: F) -> Self
    where
        F: FnOnce(Emitter<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        let stop = guard.child_token();
        let (emitter, rx) = bounded(options.capacity, stop.clone());

        let handle = tokio::spawn(async move {
            let closer = emitter.clone();
            let result = producer(emitter).await;
            closer.close().await;
            result
        });

        Self {
            rx,
            stop,
            guard,
            producer: Some(handle),
            options,
            since_check: 0,
            delivered: 0,
            interrupted: false,
            finished: false,
        }
    }

    /// Next value, or `None` at end of stream or once cancellation was observed.
    pub async fn next(&mut self) -> Result<Option<T>, ProcessingError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            if self.since_check >= self.options.check_every {
                self.since_check = 0;
                if self.guard.is_cancelled() {
                    self.interrupt();
                    return Ok(None);
                }
            }

            match timeout(self.options.poll_interval, self.rx.recv()).await {
                Ok(Some(Envelope::Item(item))) => {
                    self.since_check += 1;
                    self.delivered += 1;
                    return Ok(Some(item));
                }
                Ok(Some(Envelope::End)) => {
                    self.finished = true;
                    self.join_producer().await?;
                    return Ok(None);
                }
                Ok(None) => {
                    // Producer left without an end marker: it was stopped or it panicked.
                    if self.guard.is_cancelled() {
                        self.interrupt();
                        return Ok(None);
                    }
                    self.finished = true;
                    self.join_producer().await?;
                    return Ok(None);
                }
                Err(_) => {
                    if self.guard.is_cancelled() {
                        self.interrupt();
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// The sequence ended early because of cancellation.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T, ProcessingError>> + Send {
        futures::stream::unfold(self, |mut pump| async move {
            match pump.next().await {
                Ok(Some(item)) => Some((Ok(item), pump)),
                Ok(None) => None,
                Err(err) => Some((Err(err), pump)),
            }
        })
    }

    fn interrupt(&mut self) {
        debug!(delivered = self.delivered, "Streaming pump interrupted");
        self.interrupted = true;
        self.finished = true;
        self.stop.cancel();
        self.rx.close();
        // The producer observes the stop flag on its next emit; it is not awaited.
        self.producer.take();
    }

    async fn join_producer(&mut self) -> Result<(), ProcessingError> {
        let Some(handle) = self.producer.take() else {
            return Ok(());
        };

        match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(error = %err, delivered = self.delivered, "Streaming producer failed");
                Err(ProcessingError::Source(err))
            }
            Err(join) => Err(ProcessingError::ProducerPanicked(join.to_string())),
        }
    }
}

impl<T> Drop for StreamingPump<T> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

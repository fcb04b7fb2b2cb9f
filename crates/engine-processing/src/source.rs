use crate::{
    error::ProcessingError,
    pump::{PumpOptions, StreamingPump},
};
use engine_core::{cancel::CancellationGuard, host::GraphHost};
use futures::StreamExt;
use model::{core::value::Params, records::row::WorkItem};
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;

/// Where the planner pulls work items from.
pub enum WorkSource {
    /// Items already in memory.
    Materialized(VecDeque<WorkItem>),
    /// Items read lazily from the host through a streaming pump.
    Streamed(StreamingPump<WorkItem>),
}

impl WorkSource {
    pub fn materialized(items: Vec<WorkItem>) -> Self {
        WorkSource::Materialized(items.into())
    }

    /// Runs `operation` on a background task, streaming its rows.
    pub fn from_read(
        host: Arc<dyn GraphHost>,
        operation: impl Into<String>,
        params: Params,
        options: PumpOptions,
        guard: CancellationGuard,
    ) -> Self {
        let operation = operation.into();
        let pump = StreamingPump::<WorkItem>::open(options, guard, move |tx| async move {
            let mut rows = host.read(&operation, &params).await?;
            let mut produced = 0u64;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = tx.stopped() => break,
                    next = rows.next() => next,
                };
                let Some(row) = next else { break };
                if tx.emit(row?).await.is_err() {
                    break;
                }
                produced += 1;
            }

            debug!(rows = produced, "Read operation finished producing");
            Ok(())
        });

        WorkSource::Streamed(pump)
    }

    /// Up to `max` items, fewer only at the end of the source or on cancellation.
    pub async fn take(&mut self, max: usize) -> Result<Vec<WorkItem>, ProcessingError> {
        match self {
            WorkSource::Materialized(items) => {
                let n = max.min(items.len());
                Ok(items.drain(..n).collect())
            }
            WorkSource::Streamed(pump) => {
                let mut taken = Vec::with_capacity(max.min(1024));
                while taken.len() < max {
                    match pump.next().await? {
                        Some(item) => taken.push(item),
                        None => break,
                    }
                }
                Ok(taken)
            }
        }
    }

    /// The source stopped early because cancellation was observed.
    pub fn is_interrupted(&self) -> bool {
        match self {
            WorkSource::Materialized(_) => false,
            WorkSource::Streamed(pump) => pump.is_interrupted(),
        }
    }
}

impl From<Vec<WorkItem>> for WorkSource {
    fn from(items: Vec<WorkItem>) -> Self {
        WorkSource::materialized(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::testing::MemoryHost;
    use model::execution::errors::HostError;
    use serde_json::json;

    fn items(n: i64) -> Vec<WorkItem> {
        (0..n).map(|i| WorkItem::from_pairs([("x", json!(i))])).collect()
    }

    #[tokio::test]
    async fn materialized_source_is_taken_in_chunks() {
        let mut source = WorkSource::materialized(items(5));
        assert_eq!(source.take(2).await.unwrap().len(), 2);
        assert_eq!(source.take(2).await.unwrap().len(), 2);
        assert_eq!(source.take(2).await.unwrap().len(), 1);
        assert!(source.take(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_source_streams_host_rows() {
        let host = MemoryHost::new();
        host.register_rows("MATCH (n) RETURN n", items(7));

        let mut source = WorkSource::from_read(
            Arc::new(host),
            "MATCH (n) RETURN n",
            Params::new(),
            PumpOptions::default(),
            CancellationGuard::new(),
        );

        let first = source.take(5).await.unwrap();
        assert_eq!(first[4].get_value("x"), json!(4));
        assert_eq!(source.take(5).await.unwrap().len(), 2);
        assert!(source.take(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_failure_surfaces_as_source_error() {
        let host = MemoryHost::new();
        host.register_read("RETURN 1/0", |_| Err(HostError::operation("/ by zero")));

        let mut source = WorkSource::from_read(
            Arc::new(host),
            "RETURN 1/0",
            Params::new(),
            PumpOptions::default(),
            CancellationGuard::new(),
        );

        assert!(matches!(
            source.take(10).await,
            Err(ProcessingError::Source(_))
        ));
    }
}

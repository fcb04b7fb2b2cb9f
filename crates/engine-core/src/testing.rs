//! In-memory `GraphHost` used by unit and integration tests.
//!
//! Operations are registered by their text. Writes run eagerly when executed
//! but are only recorded as applied once their transaction commits.

use crate::host::{GraphHost, HostTransaction, QueryResult, RowStream};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream;
use model::{core::value::Params, execution::errors::HostError, records::row::WorkItem};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

pub type ReadFn = Arc<dyn Fn(&Params) -> Result<Vec<WorkItem>, HostError> + Send + Sync>;
pub type StreamFn = Arc<dyn Fn(&Params) -> RowStream + Send + Sync>;
pub type WriteFn = Arc<dyn Fn(&Params) -> Result<QueryResult, HostError> + Send + Sync>;

#[derive(Clone)]
enum Operation {
    Read(ReadFn),
    Stream(StreamFn),
    Write(WriteFn),
    Invalid(String),
}

#[derive(Default)]
struct HostState {
    operations: DashMap<String, Operation>,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    failing_begins: AtomicU64,
    failing_commits: AtomicU64,
    applied: Mutex<Vec<Params>>,
}

#[derive(Clone, Default)]
pub struct MemoryHost {
    state: Arc<HostState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_read<F>(&self, operation: &str, f: F) -> &Self
    where
        F: Fn(&Params) -> Result<Vec<WorkItem>, HostError> + Send + Sync + 'static,
    {
        self.insert(operation, Operation::Read(Arc::new(f)))
    }

    /// Convenience for a read that always yields the same rows.
    pub fn register_rows(&self, operation: &str, rows: Vec<WorkItem>) -> &Self {
        self.register_read(operation, move |_| Ok(rows.clone()))
    }

    pub fn register_stream<F>(&self, operation: &str, f: F) -> &Self
    where
        F: Fn(&Params) -> RowStream + Send + Sync + 'static,
    {
        self.insert(operation, Operation::Stream(Arc::new(f)))
    }

    pub fn register_write<F>(&self, operation: &str, f: F) -> &Self
    where
        F: Fn(&Params) -> Result<QueryResult, HostError> + Send + Sync + 'static,
    {
        self.insert(operation, Operation::Write(Arc::new(f)))
    }

    /// Operation that fails validation with `message`.
    pub fn register_invalid(&self, operation: &str, message: &str) -> &Self {
        self.insert(operation, Operation::Invalid(message.to_string()))
    }

    /// Makes the next `count` calls to `begin` fail with `Unavailable`.
    pub fn fail_next_begins(&self, count: u64) {
        self.state.failing_begins.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` commits fail; their writes are discarded.
    pub fn fail_next_commits(&self, count: u64) {
        self.state.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn begins(&self) -> u64 {
        self.state.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.state.rollbacks.load(Ordering::SeqCst)
    }

    /// Parameters of every write that ended up committed, in commit order.
    pub fn applied(&self) -> Vec<Params> {
        self.state
            .applied
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn insert(&self, operation: &str, op: Operation) -> &Self {
        self.state.operations.insert(operation.to_string(), op);
        self
    }

    fn lookup(&self, operation: &str) -> Result<Operation, HostError> {
        self.state
            .operations
            .get(operation)
            .map(|op| op.value().clone())
            .ok_or_else(|| HostError::invalid(format!("Unknown operation: {operation}")))
    }
}

#[async_trait]
impl GraphHost for MemoryHost {
    async fn validate(&self, operation: &str) -> Result<(), HostError> {
        match self.lookup(operation)? {
            Operation::Invalid(msg) => Err(HostError::invalid(msg)),
            _ => Ok(()),
        }
    }

    async fn read(&self, operation: &str, params: &Params) -> Result<RowStream, HostError> {
        match self.lookup(operation)? {
            Operation::Read(f) => {
                let rows = f(params)?;
                Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
            }
            Operation::Stream(f) => Ok(f(params)),
            Operation::Write(f) => {
                let result = f(params)?;
                Ok(Box::pin(stream::iter(result.rows.into_iter().map(Ok))))
            }
            Operation::Invalid(msg) => Err(HostError::invalid(msg)),
        }
    }

    async fn begin(&self) -> Result<Box<dyn HostTransaction>, HostError> {
        let failing = self.state.failing_begins.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_begins.fetch_sub(1, Ordering::SeqCst);
            return Err(HostError::unavailable("no transaction could be started"));
        }

        self.state.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransaction {
            host: self.clone(),
            staged: Vec::new(),
        }))
    }
}

pub struct MemoryTransaction {
    host: MemoryHost,
    staged: Vec<Params>,
}

#[async_trait]
impl HostTransaction for MemoryTransaction {
    async fn execute(
        &mut self,
        operation: &str,
        params: &Params,
    ) -> Result<QueryResult, HostError> {
        match self.host.lookup(operation)? {
            Operation::Write(f) => {
                let result = f(params)?;
                self.staged.push(params.clone());
                Ok(result)
            }
            Operation::Read(f) => Ok(QueryResult::from_rows(f(params)?)),
            Operation::Stream(_) => Err(HostError::invalid(format!(
                "Streaming operation cannot run inside a transaction: {operation}"
            ))),
            Operation::Invalid(msg) => Err(HostError::invalid(msg)),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), HostError> {
        let MemoryTransaction { host, staged } = *self;
        let state = &host.state;
        if state.failing_commits.load(Ordering::SeqCst) > 0 {
            state.failing_commits.fetch_sub(1, Ordering::SeqCst);
            state.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(HostError::operation("Transaction commit failed"));
        }

        state.commits.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = state.applied.lock() {
            log.extend(staged);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), HostError> {
        self.host.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_operation_is_invalid() {
        let host = MemoryHost::new();
        let err = host.validate("RETURN nope()").await.unwrap_err();
        assert!(matches!(err, HostError::Invalid(_)));
    }

    #[tokio::test]
    async fn writes_apply_only_on_commit() {
        let host = MemoryHost::new();
        host.register_write("CREATE (n)", |_| Ok(QueryResult::default()));

        let mut params = Params::new();
        params.insert("x".into(), json!(1));

        let mut tx = host.begin().await.unwrap();
        tx.execute("CREATE (n)", &params).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(host.applied().is_empty());

        let mut tx = host.begin().await.unwrap();
        tx.execute("CREATE (n)", &params).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(host.applied(), vec![params]);
        assert_eq!((host.commits(), host.rollbacks()), (1, 1));
    }

    #[tokio::test]
    async fn read_streams_registered_rows() {
        let host = MemoryHost::new();
        host.register_rows(
            "UNWIND range(1,2) AS x RETURN x",
            vec![
                WorkItem::from_pairs([("x", json!(1))]),
                WorkItem::from_pairs([("x", json!(2))]),
            ],
        );

        let rows: Vec<_> = host
            .read("UNWIND range(1,2) AS x RETURN x", &Params::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn failing_begins_report_unavailable() {
        let host = MemoryHost::new();
        host.fail_next_begins(1);
        let err = host.begin().await.err().expect("begin should fail");
        assert!(err.is_fatal());
        assert!(host.begin().await.is_ok());
    }
}

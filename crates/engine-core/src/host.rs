use async_trait::async_trait;
use futures::stream::BoxStream;
use model::{
    core::value::Params,
    execution::{errors::HostError, stats::QueryStats},
    records::row::WorkItem,
};

/// Rows produced lazily by a read operation.
pub type RowStream = BoxStream<'static, Result<WorkItem, HostError>>;

/// Rows and update counters returned by an operation executed in a transaction.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<WorkItem>,
    pub stats: QueryStats,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<WorkItem>) -> Self {
        QueryResult {
            rows,
            stats: QueryStats::default(),
        }
    }

    pub fn from_stats(stats: QueryStats) -> Self {
        QueryResult {
            rows: Vec::new(),
            stats,
        }
    }
}

/// The database the engine runs operations against.
#[async_trait]
pub trait GraphHost: Send + Sync + 'static {
    /// Checks that an operation is well formed without running it.
    async fn validate(&self, operation: &str) -> Result<(), HostError>;

    /// Starts a read; rows are pulled from the returned stream.
    async fn read(&self, operation: &str, params: &Params) -> Result<RowStream, HostError>;

    async fn begin(&self) -> Result<Box<dyn HostTransaction>, HostError>;
}

/// A unit of work. Exactly one of `commit` or `rollback` ends it.
#[async_trait]
pub trait HostTransaction: Send {
    async fn execute(&mut self, operation: &str, params: &Params) -> Result<QueryResult, HostError>;

    async fn commit(self: Box<Self>) -> Result<(), HostError>;

    async fn rollback(self: Box<Self>) -> Result<(), HostError>;
}

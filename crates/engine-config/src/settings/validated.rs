use crate::settings::mode::ExecutionUnitMode;
use engine_core::retry::RetryPolicy;
use model::core::value::Params;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_CONCURRENCY: usize = 50;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_CANCEL_CHECK_EVERY: usize = 100;
pub const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Immutable, validated configuration resolved once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Maximum items per batch, always > 0
    pub batch_size: usize,
    /// Maximum batches in flight when `parallel` is set, always > 0
    pub concurrency: usize,
    /// Additional attempts for a failed batch
    pub retries: u64,
    /// Whether batches may run concurrently
    pub parallel: bool,
    pub mode: ExecutionUnitMode,
    /// Extra parameters bound to every operation
    pub params: Params,
    /// Items of each failed batch to keep in the summary; `None` disables
    pub failed_params: Option<usize>,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Capacity of the streaming channel between reader and planner
    pub queue_capacity: usize,
    /// Items consumed between cancellation polls
    pub cancel_check_every: usize,
    /// Longest a consumer waits on the channel before polling again
    pub cancel_poll_interval: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfigBuilder::new().build()
    }
}

impl ExecutionConfig {
    pub fn from_builder(builder: ExecutionConfigBuilder) -> Self {
        Self {
            batch_size: builder.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
            concurrency: builder.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
            retries: builder.retries.unwrap_or(0),
            parallel: builder.parallel.unwrap_or(false),
            mode: builder.mode.unwrap_or_default(),
            params: builder.params.unwrap_or_default(),
            failed_params: builder.failed_params,
            retry_delay: builder.retry_delay.unwrap_or(Duration::ZERO),
            max_retry_delay: builder.max_retry_delay.unwrap_or(Duration::ZERO),
            queue_capacity: builder
                .queue_capacity
                .unwrap_or(DEFAULT_QUEUE_CAPACITY)
                .max(1),
            cancel_check_every: builder
                .cancel_check_every
                .unwrap_or(DEFAULT_CANCEL_CHECK_EVERY)
                .max(1),
            cancel_poll_interval: builder
                .cancel_poll_interval
                .unwrap_or(DEFAULT_CANCEL_POLL_INTERVAL),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn mode(&self) -> ExecutionUnitMode {
        self.mode
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn is_single_transaction(&self) -> bool {
        self.mode == ExecutionUnitMode::SingleTransaction
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.retry_delay, self.max_retry_delay)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExecutionConfigBuilder {
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub retries: Option<u64>,
    pub parallel: Option<bool>,
    pub mode: Option<ExecutionUnitMode>,
    pub params: Option<Params>,
    pub failed_params: Option<usize>,
    pub retry_delay: Option<Duration>,
    pub max_retry_delay: Option<Duration>,
    pub queue_capacity: Option<usize>,
    pub cancel_check_every: Option<usize>,
    pub cancel_poll_interval: Option<Duration>,
}

impl ExecutionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn retries(mut self, retries: u64) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn mode(mut self, mode: ExecutionUnitMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn failed_params(mut self, limit: usize) -> Self {
        self.failed_params = Some(limit);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn cancel_check_every(mut self, every: usize) -> Self {
        self.cancel_check_every = Some(every);
        self
    }

    pub fn cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = Some(interval);
        self
    }

    pub fn build(self) -> ExecutionConfig {
        ExecutionConfig::from_builder(self)
    }
}

//! Worker configuration.

/// Requeues a message may go through before it is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Deliveries handled concurrently per queue.
pub const DEFAULT_PREFETCH: usize = 16;

/// Upper bound on `prefetch`; one semaphore permit per in-flight delivery.
pub const MAX_PREFETCH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Retry budget shared by every request type
    pub max_retries: u32,
    /// Concurrent deliveries per queue, `1..=MAX_PREFETCH`
    pub prefetch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

impl WorkerConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }
}

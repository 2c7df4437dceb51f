//! Configuration for the sync engine, scheduler and cleanup workers.

use fluxsync_protocol::DEFAULT_PAGE_SIZE;
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for sync cycles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum entries requested per change-feed page.
    pub page_size: u32,
    /// Retry configuration for `sync_with_retry`.
    pub retry: RetryConfig,
    /// Root directory for blob files, when blobs are kept on disk.
    pub blob_root: Option<PathBuf>,
    /// Wait applied when a provider rate limits without saying for how long.
    pub default_rate_limit: Duration,
}

impl SyncConfig {
    /// Creates a configuration with the default page size.
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryConfig::default(),
            blob_root: None,
            default_rate_limit: Duration::from_secs(60),
        }
    }

    /// Sets the page size. Zero is raised to one.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the blob root directory.
    pub fn with_blob_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.blob_root = Some(root.into());
        self
    }

    /// Sets the fallback rate-limit wait.
    pub fn with_default_rate_limit(mut self, wait: Duration) -> Self {
        self.default_rate_limit = wait;
        self
    }

    /// Directory holding the blobs of one provider: `<blob_root>/<provider>`.
    pub fn blob_dir_for(&self, provider: &str) -> Option<PathBuf> {
        self.blob_root.as_ref().map(|root| root.join(provider))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% on top.
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Configuration for the connection scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of cycles running at once.
    pub max_concurrent: usize,
    /// How often due connections are polled by [`crate::Scheduler::run`].
    pub poll_interval: Duration,
    /// Wait imposed on a connection after a generic failure.
    pub failure_backoff: Duration,
}

impl SchedulerConfig {
    /// Creates a scheduler configuration.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            poll_interval: Duration::from_secs(60),
            failure_backoff: Duration::from_secs(300),
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the backoff after a generic failure.
    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Configuration for the cleanup worker pool.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Number of workers draining the queue.
    pub workers: usize,
    /// Capacity of the job queue.
    pub queue_depth: usize,
    /// Attempts per job before it is reported as failed.
    pub max_attempts: u32,
    /// Wait between attempts of the same job.
    pub retry_delay: Duration,
}

impl CleanupConfig {
    /// Creates a cleanup configuration.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_depth: 64,
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }

    /// Sets the queue capacity. Zero is raised to one.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Sets the attempts per job. Zero is raised to one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the wait between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

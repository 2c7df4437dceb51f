//! Database configuration.

/// Configuration for opening a [`crate::Database`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to sync the journal after every write (safer but slower).
    pub sync_on_write: bool,

    /// Compact automatically once the journal holds this many records
    /// (0 = never).
    pub compact_min_records: u64,

    /// Only compact automatically when at most this fraction of journal
    /// records is still live.
    pub compact_live_ratio: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_min_records: 10_000,
            compact_live_ratio: 0.5,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the journal after every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the record count that triggers automatic compaction.
    #[must_use]
    pub const fn compact_min_records(mut self, records: u64) -> Self {
        self.compact_min_records = records;
        self
    }

    /// Sets the live-record ratio below which automatic compaction runs.
    #[must_use]
    pub fn compact_live_ratio(mut self, ratio: f64) -> Self {
        self.compact_live_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Returns true if a journal of `records` records with `live` live
    /// records should be compacted.
    #[must_use]
    pub fn should_compact(&self, records: u64, live: u64) -> bool {
        if self.compact_min_records == 0 || records < self.compact_min_records {
            return false;
        }
        (live as f64) <= (records as f64) * self.compact_live_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.sync_on_write);
        assert_eq!(config.compact_min_records, 10_000);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .sync_on_write(false)
            .compact_min_records(8)
            .compact_live_ratio(2.0);

        assert!(!config.sync_on_write);
        assert_eq!(config.compact_min_records, 8);
        assert!((config.compact_live_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn compaction_threshold() {
        let config = StoreConfig::new().compact_min_records(10);
        assert!(!config.should_compact(9, 0));
        assert!(config.should_compact(10, 5));
        assert!(!config.should_compact(10, 6));
        assert!(!StoreConfig::new().compact_min_records(0).should_compact(1_000_000, 0));
    }
}

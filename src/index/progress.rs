/// Receives progress of a full index build and can cancel it.
pub trait Progress {
    /// Called once before the scan with the number of rows to visit.
    fn set_max(&mut self, _max: u64) {}

    /// Called periodically with the number of rows visited since the last call.
    fn add_progress(&mut self, rows: u64);

    /// Returning `false` cancels the build at the next check.
    fn is_active(&self) -> bool {
        true
    }

    /// Whether the entries written before a cancellation should be removed.
    fn cleanup_on_cancel(&self) -> bool {
        false
    }
}

/// Progress sink that ignores everything and never cancels.
pub(crate) struct NoProgress;

impl Progress for NoProgress {
    fn add_progress(&mut self, _rows: u64) {}
}

/// Tuning knobs for index builds and queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexOptions {
    /// Number of index entries fetched per page by lazy queries.
    pub chunk_limit: u32,
    /// Number of rows between two progress callbacks during a build.
    pub progress_interval: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            chunk_limit: 1000,
            progress_interval: 1000,
        }
    }
}

impl IndexOptions {
    pub fn chunk_limit(mut self, chunk_limit: u32) -> Self {
        self.chunk_limit = chunk_limit.max(1);
        self
    }

    pub fn progress_interval(mut self, progress_interval: u64) -> Self {
        self.progress_interval = progress_interval.max(1);
        self
    }
}

use crate::metrics_defs::{SCAN_DURATION, SCAN_FAILURES, SCAN_ROWS, counter, histogram};
use crate::source::{PAGE_SIZE, RuleRecordSource, SourceError};
use crate::store::RuleCacheStore;
use crate::types::RuleId;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, watch};

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("another scan is in progress")]
    InProgress,
    #[error("scan cancelled by shutdown")]
    Cancelled,
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub epoch: u64,
    pub pages: usize,
    pub rows: usize,
}

/// Walks every rule row in the source and merges it into the store.
pub struct Scanner {
    store: Arc<RuleCacheStore>,
    source: Arc<dyn RuleRecordSource>,
    // Held for the whole pass. Passes that cannot take it are skipped, never queued.
    pass_lock: Semaphore,
    page_size: usize,
}

impl Scanner {
    pub fn new(store: Arc<RuleCacheStore>, source: Arc<dyn RuleRecordSource>) -> Self {
        Scanner {
            store,
            source,
            pass_lock: Semaphore::new(1),
            page_size: PAGE_SIZE,
        }
    }

    /// Runs one full pass: starts a new epoch, then pages through the source by id.
    ///
    /// Every pass rescans from the first row. A failed or cancelled pass leaves whatever
    /// it merged in place; the next pass corrects the rest.
    pub async fn scan(&self, shutdown: &watch::Receiver<bool>) -> Result<ScanStats, ScanError> {
        let Ok(_permit) = self.pass_lock.try_acquire() else {
            return Err(ScanError::InProgress);
        };

        let start = Instant::now();
        let result = self.scan_pages(shutdown).await;

        match &result {
            Ok(stats) => {
                histogram!(SCAN_DURATION).record(start.elapsed().as_secs_f64());
                histogram!(SCAN_ROWS).record(stats.rows as f64);
                tracing::info!(
                    epoch = stats.epoch,
                    pages = stats.pages,
                    rows = stats.rows,
                    targets = self.store.target_count(),
                    "gray release rule scan completed"
                );
            }
            Err(ScanError::Cancelled) => {
                tracing::info!("gray release rule scan cancelled");
            }
            Err(err) => {
                counter!(SCAN_FAILURES).increment(1);
                tracing::error!(error = %err, "gray release rule scan failed");
            }
        }

        result
    }

    async fn scan_pages(&self, shutdown: &watch::Receiver<bool>) -> Result<ScanStats, ScanError> {
        let mut stats = ScanStats {
            epoch: self.store.advance_epoch(),
            ..Default::default()
        };
        let mut max_id_scanned: RuleId = 0;

        loop {
            let stopped = *shutdown.borrow();
            if stopped {
                return Err(ScanError::Cancelled);
            }

            let mut stop = shutdown.clone();
            let page = tokio::select! {
                page = self.source.find_page(max_id_scanned, self.page_size) => page?,
                _ = stop.wait_for(|stopped| *stopped) => return Err(ScanError::Cancelled),
            };
            stats.pages += 1;

            let Some(last) = page.last() else {
                break;
            };
            max_id_scanned = last.id;
            stats.rows += page.len();
            self.store.merge(&page);

            if page.len() < self.page_size {
                break;
            }
        }

        Ok(stats)
    }
}

use tracing::{error, info, warn};

use crate::catalog::sync::MetadataSyncService;
use crate::catalog::youtube::{VideoIndex, MAX_IDS_PER_STATS_REQUEST};
use crate::database::repo::VideoCatalog;
use crate::error::Result;
use crate::utils::config::SeedQuery;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub bootstrapped: bool,
    pub batches: usize,
    pub failed_batches: usize,
    pub updated: usize,
    /// Ids the statistics endpoint did not return; their counters keep the
    /// last known values.
    pub missing: usize,
    /// Counter writes the store rejected.
    pub failed: usize,
}

/// Refreshes engagement counters for every video in the catalog.
pub struct StatisticsRefresher<I> {
    sync: MetadataSyncService<I>,
    bootstrap: Option<SeedQuery>,
    batch_size: usize,
}

impl<I: VideoIndex> StatisticsRefresher<I> {
    pub fn new(sync: MetadataSyncService<I>, bootstrap: Option<SeedQuery>) -> Self {
        Self {
            sync,
            bootstrap,
            batch_size: MAX_IDS_PER_STATS_REQUEST,
        }
    }

    /// Smaller batches are allowed; anything above the API ceiling is clamped.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_IDS_PER_STATS_REQUEST);
        self
    }

    pub fn sync_service(&self) -> &MetadataSyncService<I> {
        &self.sync
    }

    pub fn refresh(&self, catalog: &VideoCatalog) -> Result<RefreshReport> {
        let mut report = RefreshReport::default();
        let mut ids = catalog.all_ids()?;
        info!("{} videos in catalog", ids.len());

        if ids.is_empty() {
            let Some(seed) = &self.bootstrap else {
                warn!("Catalog is empty and no seed query is configured, nothing to refresh");
                return Ok(report);
            };
            info!("Catalog is empty, bootstrapping with seed query {:?}", seed.query);
            self.sync.sync(catalog, &seed.query, seed.max_results)?;
            report.bootstrapped = true;
            ids = catalog.all_ids()?;
        }

        for batch in ids.chunks(self.batch_size) {
            report.batches += 1;
            info!("Requesting statistics for {} videos", batch.len());

            let stats = match self.sync.index().statistics(batch) {
                Ok(stats) => stats,
                Err(e) => {
                    error!("Statistics batch {} failed, skipping: {}", report.batches, e);
                    report.failed_batches += 1;
                    continue;
                }
            };

            for id in batch {
                let Some(counters) = stats.get(id) else {
                    warn!("No statistics returned for {}, keeping previous counters", id);
                    report.missing += 1;
                    continue;
                };
                match catalog.update_counters(id, *counters) {
                    Ok(true) => {
                        info!(
                            "Updated {} (views: {}, likes: {}, comments: {})",
                            id, counters.views, counters.likes, counters.comments
                        );
                        report.updated += 1;
                    }
                    Ok(false) => {
                        warn!("{} is no longer in the catalog, counters not stored", id);
                        report.missing += 1;
                    }
                    Err(e) => {
                        error!("Failed to update counters for {}: {}", id, e);
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}

use tracing::{error, info};

use crate::catalog::youtube::VideoIndex;
use crate::database::repo::{UpsertOutcome, VideoCandidate, VideoCatalog};
use crate::error::Result;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Pulls candidate videos from the search index into the catalog.
pub struct MetadataSyncService<I> {
    index: I,
}

impl<I: VideoIndex> MetadataSyncService<I> {
    pub fn new(index: I) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn search_videos(&self, query: &str, max_results: u32) -> Result<Vec<VideoCandidate>> {
        let candidates = self.index.search(query, max_results)?;
        info!("Search {:?} returned {} videos", query, candidates.len());
        Ok(candidates)
    }

    /// Applies each candidate on its own; one failing row never blocks the rest.
    pub fn upsert(&self, catalog: &VideoCatalog, candidates: &[VideoCandidate]) -> UpsertReport {
        let mut report = UpsertReport::default();
        for candidate in candidates {
            match catalog.upsert(candidate) {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Err(e) => {
                    error!("Failed to store video {}: {}", candidate.video_id, e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "Stored {} videos ({} new, {} updated, {} failed)",
            report.inserted + report.updated,
            report.inserted,
            report.updated,
            report.failed
        );
        report
    }

    /// Search followed by upsert.
    pub fn sync(&self, catalog: &VideoCatalog, query: &str, max_results: u32) -> Result<UpsertReport> {
        let candidates = self.search_videos(query, max_results)?;
        Ok(self.upsert(catalog, &candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fake::{candidate, FakeIndex};
    use crate::error::PipelineError;

    #[test]
    fn sync_inserts_then_updates() -> Result<()> {
        let catalog = VideoCatalog::open_in_memory()?;
        let index = FakeIndex::with_search(vec![candidate("v1"), candidate("v2")]);
        let service = MetadataSyncService::new(index);

        let first = service.sync(&catalog, "X", 30)?;
        assert_eq!(first, UpsertReport { inserted: 2, updated: 0, failed: 0 });

        let second = service.sync(&catalog, "X", 30)?;
        assert_eq!(second, UpsertReport { inserted: 0, updated: 2, failed: 0 });
        assert_eq!(catalog.count()?, 2);
        assert_eq!(service.index().search_calls(), vec![("X".to_string(), 30), ("X".to_string(), 30)]);
        Ok(())
    }

    #[test]
    fn search_failure_surfaces_as_external_api_error() -> Result<()> {
        let catalog = VideoCatalog::open_in_memory()?;
        let service = MetadataSyncService::new(FakeIndex::failing_search());

        let err = service.sync(&catalog, "X", 5).unwrap_err();
        assert!(matches!(err, PipelineError::ExternalApi { .. }));
        assert!(!err.is_fatal());
        assert_eq!(catalog.count()?, 0);
        Ok(())
    }

    #[test]
    fn duplicate_ids_in_one_response_collapse_into_one_record() -> Result<()> {
        let catalog = VideoCatalog::open_in_memory()?;
        let service = MetadataSyncService::new(FakeIndex::default());
        let mut renamed = candidate("v1");
        renamed.title = "second title".into();

        let report = service.upsert(&catalog, &[candidate("v1"), renamed]);
        assert_eq!(report, UpsertReport { inserted: 1, updated: 1, failed: 0 });
        assert_eq!(catalog.get("v1")?.map(|r| r.title), Some("second title".to_string()));
        Ok(())
    }

    #[test]
    fn failing_candidate_does_not_block_the_others() -> Result<()> {
        let catalog = VideoCatalog::open_in_memory()?;
        catalog.execute_batch(
            "CREATE TRIGGER reject_v2 BEFORE INSERT ON youtube_video
             WHEN NEW.video_id = 'v2'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )?;
        let service = MetadataSyncService::new(FakeIndex::with_search(vec![
            candidate("v1"),
            candidate("v2"),
            candidate("v3"),
        ]));

        let report = service.sync(&catalog, "X", 30)?;
        assert_eq!(report, UpsertReport { inserted: 2, updated: 0, failed: 1 });
        assert_eq!(catalog.all_ids()?, vec!["v1", "v3"]);
        Ok(())
    }
}

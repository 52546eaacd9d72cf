pub mod statistics;
pub mod sync;
pub mod youtube;

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};

    use super::youtube::VideoIndex;
    use crate::database::repo::{Counters, VideoCandidate};
    use crate::error::{PipelineError, Result};

    pub fn candidate(id: &str) -> VideoCandidate {
        VideoCandidate {
            video_id: id.to_string(),
            title: format!("title {}", id),
            channel_name: "channel".to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            description: Some("description".to_string()),
            thumbnail_url: None,
        }
    }

    /// Scripted index that records every call.
    #[derive(Default)]
    pub struct FakeIndex {
        results: Vec<VideoCandidate>,
        search_fails: bool,
        stats: HashMap<String, Counters>,
        failing_stats_call: Option<usize>,
        searches: RefCell<Vec<(String, u32)>>,
        stats_requests: RefCell<Vec<Vec<String>>>,
    }

    impl FakeIndex {
        pub fn with_search(results: Vec<VideoCandidate>) -> Self {
            Self { results, ..Self::default() }
        }

        pub fn failing_search() -> Self {
            Self { search_fails: true, ..Self::default() }
        }

        pub fn with_stats(mut self, id: &str, counters: Counters) -> Self {
            self.stats.insert(id.to_string(), counters);
            self
        }

        /// Makes the n-th (0-based) statistics request fail.
        pub fn failing_stats_call(mut self, n: usize) -> Self {
            self.failing_stats_call = Some(n);
            self
        }

        pub fn search_calls(&self) -> Vec<(String, u32)> {
            self.searches.borrow().clone()
        }

        pub fn stats_calls(&self) -> Vec<Vec<String>> {
            self.stats_requests.borrow().clone()
        }
    }

    impl VideoIndex for FakeIndex {
        fn search(&self, query: &str, max_results: u32) -> Result<Vec<VideoCandidate>> {
            self.searches.borrow_mut().push((query.to_string(), max_results));
            if self.search_fails {
                return Err(PipelineError::external("search", "quota exceeded"));
            }
            Ok(self.results.iter().take(max_results as usize).cloned().collect())
        }

        fn statistics(&self, video_ids: &[String]) -> Result<HashMap<String, Counters>> {
            let call = self.stats_requests.borrow().len();
            self.stats_requests.borrow_mut().push(video_ids.to_vec());
            if self.failing_stats_call == Some(call) {
                return Err(PipelineError::external("videos", "503 backend error"));
            }
            Ok(video_ids
                .iter()
                .filter_map(|id| self.stats.get(id).map(|c| (id.clone(), *c)))
                .collect())
        }
    }
}

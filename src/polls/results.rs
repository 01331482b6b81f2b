//! Cached result aggregation

use std::sync::Arc;

use crate::cache::{ResponseCache, Scope, keys};
use crate::storage::PollStore;
use crate::types::{OptionResult, PollId, PollResults};
use crate::{Error, Result};

/// Per-option vote counts of a poll, read through the cache
pub struct ResultAggregator {
    store: Arc<dyn PollStore>,
    cache: Arc<ResponseCache>,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn PollStore>, cache: Arc<ResponseCache>) -> Self {
        Self { store, cache }
    }

    /// Results of a poll: every option in id order, zero when unvoted
    pub fn results(&self, poll_id: PollId) -> Result<PollResults> {
        self.cache.get_or_compute(
            &keys::poll_results(poll_id),
            Scope::Poll(poll_id),
            self.cache.result_ttl(),
            || self.compute(poll_id),
        )
    }

    /// Aggregate straight from the store, bypassing the cache
    pub fn compute(&self, poll_id: PollId) -> Result<PollResults> {
        let poll = self
            .store
            .get_poll(poll_id)?
            .ok_or_else(|| Error::not_found("Poll", poll_id))?;

        let options = self.store.options_for_poll(poll_id)?;
        let counts = self.store.count_votes_by_option(poll_id)?;

        let results: Vec<OptionResult> = options
            .into_iter()
            .map(|option| OptionResult {
                option_id: option.id,
                votes: counts.get(&option.id).copied().unwrap_or(0),
                option: option.text,
            })
            .collect();
        let total_votes = results.iter().map(|result| result.votes).sum();

        tracing::debug!(poll_id = %poll_id, total_votes, "poll results aggregated");

        Ok(PollResults {
            poll_id,
            poll: poll.title,
            total_votes,
            results,
        })
    }
}

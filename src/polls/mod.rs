//! Poll aggregate, vote ledger and result aggregation
//!
//! Reads go through the [`ResponseCache`]; every write invalidates the
//! entries it can have made stale before returning.

pub mod ledger;
pub mod results;

use chrono::Utc;
use std::sync::Arc;

use crate::cache::{ResponseCache, Scope, keys};
use crate::storage::PollStore;
use crate::types::{NewPoll, Page, Poll, PollDetail, PollId, PollOption, User};
use crate::{Error, Result};

pub use ledger::VoteLedger;
pub use results::ResultAggregator;

/// Poll creation, listing and administration
pub struct PollService {
    store: Arc<dyn PollStore>,
    cache: Arc<ResponseCache>,
    page_size: usize,
}

impl PollService {
    pub fn new(store: Arc<dyn PollStore>, cache: Arc<ResponseCache>, page_size: usize) -> Self {
        Self {
            store,
            cache,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Create a poll together with its options (admins only)
    pub fn create_poll(&self, author: &User, draft: NewPoll) -> Result<PollDetail> {
        if !author.is_admin {
            tracing::warn!(user_id = %author.id, "non-admin attempted to create a poll");
            return Err(Error::forbidden("Only administrators can create polls"));
        }

        let now = Utc::now();
        draft.validate(now)?;

        let (poll, options) = self.store.create_poll(author, &draft, now)?;
        self.cache.invalidate_listings();

        tracing::info!(
            poll_id = %poll.id,
            user_id = %author.id,
            options = options.len(),
            "poll created"
        );

        Ok(PollDetail::assemble(&poll, &options, |_| 0, now))
    }

    /// One page of active polls, newest first
    ///
    /// Pages start at 1. Page 1 always exists, even when empty; any other page
    /// past the end is `NotFound`.
    pub fn list_active(&self, page: usize) -> Result<Page<PollDetail>> {
        if page == 0 {
            return Err(Error::not_found("Page", page));
        }

        let mut listing = self
            .cache
            .get_or_compute(&keys::listing(page), Scope::Listings, self.cache.listing_ttl(), || {
                let offset = (page - 1).saturating_mul(self.page_size);
                let (polls, count) = self.store.list_active_polls(offset, self.page_size)?;

                if page > 1 && offset >= count {
                    return Err(Error::not_found("Page", page));
                }

                let now = Utc::now();
                let results = polls
                    .iter()
                    .map(|poll| self.assemble_detail(poll, now))
                    .collect::<Result<Vec<_>>>()?;

                Ok(Page {
                    count,
                    page,
                    page_size: self.page_size,
                    results,
                })
            })?;

        let now = Utc::now();
        listing
            .results
            .iter_mut()
            .for_each(|detail| detail.refresh_status(now));
        Ok(listing)
    }

    /// Full view of one poll with live vote counts
    pub fn detail(&self, poll_id: PollId) -> Result<PollDetail> {
        let key = keys::poll_detail(poll_id);
        let mut detail =
            self.cache
                .get_or_compute(&key, Scope::Poll(poll_id), self.cache.listing_ttl(), || {
                    let poll = self.require_poll(poll_id)?;
                    self.assemble_detail(&poll, Utc::now())
                })?;

        detail.refresh_status(Utc::now());
        Ok(detail)
    }

    /// Options of a poll in id order
    pub fn options(&self, poll_id: PollId) -> Result<Vec<PollOption>> {
        self.require_poll(poll_id)?;
        self.store.options_for_poll(poll_id)
    }

    /// Open or close a poll for voting (admins only)
    pub fn set_active(&self, user: &User, poll_id: PollId, active: bool) -> Result<Poll> {
        if !user.is_admin {
            return Err(Error::forbidden("Only administrators can change poll status"));
        }

        let poll = self
            .store
            .set_poll_active(poll_id, active)?
            .ok_or_else(|| Error::not_found("Poll", poll_id))?;

        self.cache.invalidate_poll(poll_id);
        self.cache.invalidate_listings();

        tracing::info!(poll_id = %poll_id, user_id = %user.id, active, "poll status changed");
        Ok(poll)
    }

    fn require_poll(&self, poll_id: PollId) -> Result<Poll> {
        self.store
            .get_poll(poll_id)?
            .ok_or_else(|| Error::not_found("Poll", poll_id))
    }

    fn assemble_detail(&self, poll: &Poll, now: chrono::DateTime<Utc>) -> Result<PollDetail> {
        let options = self.store.options_for_poll(poll.id)?;
        let counts = self.store.count_votes_by_option(poll.id)?;
        Ok(PollDetail::assemble(
            poll,
            &options,
            |option_id| counts.get(&option_id).copied().unwrap_or(0),
            now,
        ))
    }
}

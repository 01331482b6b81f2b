//! Relational storage seam for polls, options and votes
//!
//! The poll system never serializes votes in application code. Duplicate
//! detection is delegated to the store: every implementation of [`PollStore`]
//! must reject a second vote for the same `(poll, user)` pair atomically with
//! the insert (a unique index), and must refuse a vote whose option belongs to
//! a different poll.

pub mod memory;

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::Result;
use crate::types::{NewPoll, OptionId, Poll, PollId, PollOption, User, UserId, Vote};

pub use memory::MemoryStore;

/// A vote row about to be inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewVote {
    pub poll_id: PollId,
    pub option_id: OptionId,
    pub user_id: UserId,
}

/// Storage operations required by the poll services
pub trait PollStore: Send + Sync {
    /// Insert a poll and all of its options in one atomic step
    ///
    /// The draft is stored as given; validation is the caller's job.
    fn create_poll(
        &self,
        author: &User,
        draft: &NewPoll,
        created_at: DateTime<Utc>,
    ) -> Result<(Poll, Vec<PollOption>)>;

    /// Fetch a poll by id
    fn get_poll(&self, poll_id: PollId) -> Result<Option<Poll>>;

    /// Active polls, newest first, with the total number of active polls
    fn list_active_polls(&self, offset: usize, limit: usize) -> Result<(Vec<Poll>, usize)>;

    /// Toggle the active flag; `None` when the poll does not exist
    fn set_poll_active(&self, poll_id: PollId, active: bool) -> Result<Option<Poll>>;

    /// Options of a poll in id order
    fn options_for_poll(&self, poll_id: PollId) -> Result<Vec<PollOption>>;

    /// Fetch an option by id
    fn get_option(&self, option_id: OptionId) -> Result<Option<PollOption>>;

    /// Insert a vote under the `(poll, user)` unique index
    ///
    /// Fails with `DuplicateVote` when the pair already exists and with
    /// `InvalidOption` when the option does not belong to the poll.
    fn insert_vote(&self, vote: NewVote, voted_at: DateTime<Utc>) -> Result<Vote>;

    /// Grouped vote count per option of a poll; options without votes are absent
    fn count_votes_by_option(&self, poll_id: PollId) -> Result<HashMap<OptionId, u64>>;

    /// The vote a user cast on a poll, if any
    fn find_vote(&self, poll_id: PollId, user_id: UserId) -> Result<Option<Vote>>;
}

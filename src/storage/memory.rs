//! In-memory storage engine
//!
//! Tables live behind `RwLock`s. The vote table keeps a unique index on
//! `(poll, user)` that is checked and written under the same write guard as
//! the row itself, so concurrent inserts for one pair cannot both succeed.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{NewVote, PollStore};
use crate::types::{NewPoll, OptionId, Poll, PollId, PollOption, User, UserId, Vote, VoteId};
use crate::{Error, Result, storage_error};

#[derive(Default)]
struct PollTable {
    polls: BTreeMap<PollId, Poll>,
    options: BTreeMap<OptionId, PollOption>,
    /// poll -> option ids in insertion order
    options_by_poll: HashMap<PollId, Vec<OptionId>>,
}

#[derive(Default)]
struct VoteTable {
    rows: BTreeMap<VoteId, Vote>,
    /// Unique index on (poll, user)
    by_poll_user: HashMap<(PollId, UserId), VoteId>,
}

/// Relational store held entirely in memory
pub struct MemoryStore {
    polls: RwLock<PollTable>,
    votes: RwLock<VoteTable>,
    poll_seq: AtomicU64,
    option_seq: AtomicU64,
    vote_seq: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            polls: RwLock::new(PollTable::default()),
            votes: RwLock::new(VoteTable::default()),
            poll_seq: AtomicU64::new(1),
            option_seq: AtomicU64::new(1),
            vote_seq: AtomicU64::new(1),
        }
    }

    /// Total number of vote rows across all polls
    pub fn vote_count(&self) -> Result<usize> {
        let votes = self
            .votes
            .read()
            .map_err(|_| storage_error!("Vote table read error"))?;
        Ok(votes.rows.len())
    }

    /// All votes of a poll in insertion order (for auditing)
    pub fn votes_for_poll(&self, poll_id: PollId) -> Result<Vec<Vote>> {
        let votes = self
            .votes
            .read()
            .map_err(|_| storage_error!("Vote table read error"))?;
        Ok(votes
            .rows
            .values()
            .filter(|vote| vote.poll_id == poll_id)
            .cloned()
            .collect())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PollStore for MemoryStore {
    fn create_poll(
        &self,
        author: &User,
        draft: &NewPoll,
        created_at: DateTime<Utc>,
    ) -> Result<(Poll, Vec<PollOption>)> {
        let mut table = self
            .polls
            .write()
            .map_err(|_| storage_error!("Poll table write error"))?;

        let poll = Poll {
            id: PollId(self.poll_seq.fetch_add(1, Ordering::SeqCst)),
            title: draft.title.clone(),
            description: draft.description.clone(),
            created_at,
            expires_at: draft.expires_at,
            created_by: author.id,
            created_by_username: author.username.clone(),
            is_active: true,
        };

        let options: Vec<PollOption> = draft
            .options
            .iter()
            .map(|text| PollOption {
                id: OptionId(self.option_seq.fetch_add(1, Ordering::SeqCst)),
                poll_id: poll.id,
                text: text.clone(),
                created_at,
            })
            .collect();

        table
            .options_by_poll
            .insert(poll.id, options.iter().map(|option| option.id).collect());
        for option in &options {
            table.options.insert(option.id, option.clone());
        }
        table.polls.insert(poll.id, poll.clone());

        Ok((poll, options))
    }

    fn get_poll(&self, poll_id: PollId) -> Result<Option<Poll>> {
        let table = self
            .polls
            .read()
            .map_err(|_| storage_error!("Poll table read error"))?;
        Ok(table.polls.get(&poll_id).cloned())
    }

    fn list_active_polls(&self, offset: usize, limit: usize) -> Result<(Vec<Poll>, usize)> {
        let table = self
            .polls
            .read()
            .map_err(|_| storage_error!("Poll table read error"))?;

        let mut active: Vec<&Poll> = table.polls.values().filter(|poll| poll.is_active).collect();
        // Newest first; ids break ties between polls created in the same instant
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = active.len();
        let page = active
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        Ok((page, total))
    }

    fn set_poll_active(&self, poll_id: PollId, active: bool) -> Result<Option<Poll>> {
        let mut table = self
            .polls
            .write()
            .map_err(|_| storage_error!("Poll table write error"))?;

        Ok(table.polls.get_mut(&poll_id).map(|poll| {
            poll.is_active = active;
            poll.clone()
        }))
    }

    fn options_for_poll(&self, poll_id: PollId) -> Result<Vec<PollOption>> {
        let table = self
            .polls
            .read()
            .map_err(|_| storage_error!("Poll table read error"))?;

        Ok(table
            .options_by_poll
            .get(&poll_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| table.options.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_option(&self, option_id: OptionId) -> Result<Option<PollOption>> {
        let table = self
            .polls
            .read()
            .map_err(|_| storage_error!("Poll table read error"))?;
        Ok(table.options.get(&option_id).cloned())
    }

    fn insert_vote(&self, vote: NewVote, voted_at: DateTime<Utc>) -> Result<Vote> {
        // Foreign keys: the option must exist and belong to the voted poll
        {
            let table = self
                .polls
                .read()
                .map_err(|_| storage_error!("Poll table read error"))?;

            if !table.polls.contains_key(&vote.poll_id) {
                return Err(Error::not_found("Poll", vote.poll_id));
            }
            match table.options.get(&vote.option_id) {
                None => return Err(Error::not_found("Option", vote.option_id)),
                Some(option) if option.poll_id != vote.poll_id => {
                    return Err(Error::InvalidOption {
                        poll_id: vote.poll_id,
                        option_id: vote.option_id,
                    });
                }
                Some(_) => {}
            }
        }

        let mut table = self
            .votes
            .write()
            .map_err(|_| storage_error!("Vote table write error"))?;

        let key = (vote.poll_id, vote.user_id);
        if table.by_poll_user.contains_key(&key) {
            return Err(Error::DuplicateVote {
                poll_id: vote.poll_id,
                user_id: vote.user_id,
            });
        }

        let row = Vote {
            id: VoteId(self.vote_seq.fetch_add(1, Ordering::SeqCst)),
            poll_id: vote.poll_id,
            option_id: vote.option_id,
            user_id: vote.user_id,
            voted_at,
        };
        table.by_poll_user.insert(key, row.id);
        table.rows.insert(row.id, row.clone());

        Ok(row)
    }

    fn count_votes_by_option(&self, poll_id: PollId) -> Result<HashMap<OptionId, u64>> {
        let table = self
            .votes
            .read()
            .map_err(|_| storage_error!("Vote table read error"))?;

        let mut counts = HashMap::new();
        for vote in table.rows.values().filter(|vote| vote.poll_id == poll_id) {
            *counts.entry(vote.option_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn find_vote(&self, poll_id: PollId, user_id: UserId) -> Result<Option<Vote>> {
        let table = self
            .votes
            .read()
            .map_err(|_| storage_error!("Vote table read error"))?;

        Ok(table
            .by_poll_user
            .get(&(poll_id, user_id))
            .and_then(|vote_id| table.rows.get(vote_id))
            .cloned())
    }
}

//! Vote ledger
//!
//! Duplicate votes are rejected by the store's `(poll, user)` unique index.
//! The ledger checks poll state and option ownership first so that callers
//! get the precise rejection, but it never serializes votes itself.

use chrono::Utc;
use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::storage::{NewVote, PollStore};
use crate::types::{OptionId, PollId, User, Vote};
use crate::{Error, Result};

/// Records votes and answers "did this user vote?"
pub struct VoteLedger {
    store: Arc<dyn PollStore>,
    cache: Arc<ResponseCache>,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn PollStore>, cache: Arc<ResponseCache>) -> Self {
        Self { store, cache }
    }

    /// Cast `user`'s vote for `option_id` in `poll_id`
    ///
    /// Rejections, in order: unknown poll (`NotFound`), inactive or expired
    /// poll (`PollClosed`), unknown option (`NotFound`), option of another
    /// poll (`InvalidOption`), existing vote (`DuplicateVote`).
    pub fn cast_vote(&self, user: &User, poll_id: PollId, option_id: OptionId) -> Result<Vote> {
        let result = self.try_cast(user, poll_id, option_id);

        match &result {
            Ok(vote) => {
                self.cache.invalidate_poll(poll_id);
                self.cache.invalidate_listings();

                tracing::info!(
                    vote_id = %vote.id,
                    poll_id = %poll_id,
                    option_id = %option_id,
                    user_id = %user.id,
                    "vote recorded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    poll_id = %poll_id,
                    option_id = %option_id,
                    user_id = %user.id,
                    error = %e,
                    "vote rejected"
                );
            }
        }

        result
    }

    fn try_cast(&self, user: &User, poll_id: PollId, option_id: OptionId) -> Result<Vote> {
        let now = Utc::now();

        let poll = self
            .store
            .get_poll(poll_id)?
            .ok_or_else(|| Error::not_found("Poll", poll_id))?;

        if !poll.is_votable_at(now) {
            return Err(Error::PollClosed { poll_id });
        }

        let option = self
            .store
            .get_option(option_id)?
            .ok_or_else(|| Error::not_found("Option", option_id))?;

        if option.poll_id != poll_id {
            return Err(Error::InvalidOption { poll_id, option_id });
        }

        self.store.insert_vote(
            NewVote {
                poll_id,
                option_id,
                user_id: user.id,
            },
            now,
        )
    }

    /// The vote `user` cast on a poll, if any
    pub fn user_vote(&self, user: &User, poll_id: PollId) -> Result<Option<Vote>> {
        if self.store.get_poll(poll_id)?.is_none() {
            return Err(Error::not_found("Poll", poll_id));
        }
        self.store.find_vote(poll_id, user.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, Scope, keys};
    use crate::config::CacheConfig;
    use crate::storage::MemoryStore;
    use crate::types::{NewPoll, Poll, PollOption, UserId};
    use chrono::Duration;

    fn user(id: u64) -> User {
        User {
            id: UserId(id),
            username: format!("voter{id}"),
            email: format!("voter{id}@example.com"),
            first_name: String::new(),
            last_name: String::new(),
            is_admin: false,
            date_joined: Utc::now(),
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ResponseCache>, VoteLedger) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ResponseCache::new(
            Arc::new(MemoryCache::new(64)),
            &CacheConfig::default(),
        ));
        let ledger = VoteLedger::new(store.clone(), cache.clone());
        (store, cache, ledger)
    }

    fn poll(store: &MemoryStore, draft: NewPoll) -> (Poll, Vec<PollOption>) {
        let mut author = user(100);
        author.is_admin = true;
        store.create_poll(&author, &draft, Utc::now()).unwrap()
    }

    #[test]
    fn test_cast_and_lookup() {
        let (store, _, ledger) = setup();
        let (poll, options) = poll(&store, NewPoll::new("Lunch?", ["Pizza", "Sushi"]));
        let voter = user(1);

        assert!(ledger.user_vote(&voter, poll.id).unwrap().is_none());

        let vote = ledger.cast_vote(&voter, poll.id, options[0].id).unwrap();
        assert_eq!(vote.option_id, options[0].id);
        assert_eq!(ledger.user_vote(&voter, poll.id).unwrap(), Some(vote));
    }

    #[test]
    fn test_second_vote_is_duplicate() {
        let (store, _, ledger) = setup();
        let (poll, options) = poll(&store, NewPoll::new("Lunch?", ["Pizza", "Sushi"]));
        let voter = user(1);

        ledger.cast_vote(&voter, poll.id, options[0].id).unwrap();
        let second = ledger.cast_vote(&voter, poll.id, options[1].id);

        assert!(matches!(second, Err(Error::DuplicateVote { .. })));
        assert_eq!(store.vote_count().unwrap(), 1);
    }

    #[test]
    fn test_closed_and_expired_polls_reject_votes() {
        let (store, _, ledger) = setup();

        let (inactive, inactive_options) = poll(&store, NewPoll::new("Closed", ["A", "B"]));
        store.set_poll_active(inactive.id, false).unwrap();
        assert!(matches!(
            ledger.cast_vote(&user(1), inactive.id, inactive_options[0].id),
            Err(Error::PollClosed { .. })
        ));

        let draft = NewPoll::new("Expired", ["A", "B"]).expiring_at(Utc::now() - Duration::minutes(5));
        let (expired, expired_options) = poll(&store, draft);
        assert!(matches!(
            ledger.cast_vote(&user(1), expired.id, expired_options[0].id),
            Err(Error::PollClosed { .. })
        ));

        assert_eq!(store.vote_count().unwrap(), 0);
    }

    #[test]
    fn test_option_checks() {
        let (store, _, ledger) = setup();
        let (first, _) = poll(&store, NewPoll::new("First", ["A", "B"]));
        let (_, other_options) = poll(&store, NewPoll::new("Second", ["C", "D"]));

        assert!(matches!(
            ledger.cast_vote(&user(1), first.id, other_options[0].id),
            Err(Error::InvalidOption { .. })
        ));
        assert!(matches!(
            ledger.cast_vote(&user(1), first.id, OptionId(999)),
            Err(Error::NotFound { entity: "Option", .. })
        ));
        assert!(matches!(
            ledger.cast_vote(&user(1), PollId(999), other_options[0].id),
            Err(Error::NotFound { entity: "Poll", .. })
        ));
        assert!(matches!(
            ledger.user_vote(&user(1), PollId(999)),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_vote_invalidates_cached_entries() {
        let (store, cache, ledger) = setup();
        let (poll, options) = poll(&store, NewPoll::new("Lunch?", ["Pizza", "Sushi"]));
        let ttl = std::time::Duration::from_secs(60);

        cache.put(&keys::poll_results(poll.id), Scope::Poll(poll.id), &"stale", ttl);
        cache.put(&keys::poll_detail(poll.id), Scope::Poll(poll.id), &"stale", ttl);
        cache.put(&keys::listing(1), Scope::Listings, &"stale", ttl);

        ledger.cast_vote(&user(1), poll.id, options[0].id).unwrap();

        assert!(cache.get::<String>(&keys::poll_results(poll.id), Scope::Poll(poll.id)).is_none());
        assert!(cache.get::<String>(&keys::poll_detail(poll.id), Scope::Poll(poll.id)).is_none());
        assert!(cache.get::<String>(&keys::listing(1), Scope::Listings).is_none());
    }
}

//! Poll system facade
//!
//! Wires the identity, poll, ledger and result services over one store and
//! one cache, and resolves bearer tokens to users for every operation that
//! needs a caller.

use std::sync::Arc;

use crate::cache::{CacheStats, CacheStore, MemoryCache, ResponseCache};
use crate::config::Config;
use crate::identity::{
    AccessToken, Argon2Hasher, ProfileUpdate, Registration, SessionCleanupService, SessionService,
    UserDirectory,
};
use crate::polls::{PollService, ResultAggregator, VoteLedger};
use crate::rate_limit::RateLimiter;
use crate::storage::{MemoryStore, PollStore};
use crate::types::{
    NewPoll, OptionId, Page, Poll, PollDetail, PollId, PollOption, PollResults, User, Vote,
};
use crate::Result;

/// Entry point bundling every component of the poll system
pub struct PollSystem {
    users: UserDirectory,
    sessions: Arc<SessionService>,
    registration_limiter: RateLimiter,
    cache: Arc<ResponseCache>,
    polls: PollService,
    ledger: VoteLedger,
    results: ResultAggregator,
}

impl PollSystem {
    /// Build the system over the given store and cache backends
    pub fn new(config: &Config, store: Arc<dyn PollStore>, cache_store: Arc<dyn CacheStore>) -> Result<Self> {
        let hasher = Argon2Hasher::from_config(&config.security)?;
        let sessions = Arc::new(SessionService::from_config(&config.security)?);
        let cache = Arc::new(ResponseCache::new(cache_store, &config.cache));

        tracing::info!(
            cache_enabled = cache.is_enabled(),
            page_size = config.polls.page_size,
            "poll system initialized"
        );

        Ok(Self {
            users: UserDirectory::new(hasher),
            sessions,
            registration_limiter: RateLimiter::registrations(&config.rate_limit),
            polls: PollService::new(store.clone(), cache.clone(), config.polls.page_size),
            ledger: VoteLedger::new(store.clone(), cache.clone()),
            results: ResultAggregator::new(store, cache.clone()),
            cache,
        })
    }

    /// Build the system over in-memory storage and cache
    pub fn in_memory(config: &Config) -> Result<Self> {
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCache::new(config.cache.max_entries)),
        )
    }

    /// Register an account; `client_key` identifies the caller for rate limiting
    pub fn register(&self, client_key: &str, registration: Registration) -> Result<User> {
        self.registration_limiter.check(client_key)?;
        self.users.register(registration)
    }

    /// Register an administrator account (provisioning, not rate limited)
    pub fn register_admin(&self, registration: Registration) -> Result<User> {
        self.users.register_admin(registration)
    }

    /// Exchange credentials for an access token
    pub fn login(&self, username: &str, password: &str) -> Result<AccessToken> {
        let user = self.users.authenticate(username, password)?;
        self.sessions.issue(&user)
    }

    /// Revoke an access token
    pub fn logout(&self, token: &str) -> Result<bool> {
        self.sessions.revoke(token)
    }

    /// Resolve a bearer token to its user
    pub fn current_user(&self, token: &str) -> Result<User> {
        let session = self.sessions.authenticate(token)?;
        self.users.get(session.user_id)
    }

    /// Change the caller's password and revoke every session they hold
    pub fn change_password(&self, token: &str, old_password: &str, new_password: &str) -> Result<()> {
        let user = self.current_user(token)?;
        self.users.change_password(user.id, old_password, new_password)?;
        self.sessions.revoke_user(user.id)?;
        Ok(())
    }

    pub fn update_profile(&self, token: &str, update: ProfileUpdate) -> Result<User> {
        let user = self.current_user(token)?;
        self.users.update_profile(user.id, update)
    }

    /// All users for admins, empty for everyone else
    pub fn list_users(&self, token: &str) -> Result<Vec<User>> {
        let user = self.current_user(token)?;
        self.users.list_users(&user)
    }

    pub fn create_poll(&self, token: &str, draft: NewPoll) -> Result<PollDetail> {
        let user = self.current_user(token)?;
        self.polls.create_poll(&user, draft)
    }

    pub fn set_poll_active(&self, token: &str, poll_id: PollId, active: bool) -> Result<Poll> {
        let user = self.current_user(token)?;
        self.polls.set_active(&user, poll_id, active)
    }

    pub fn list_polls(&self, page: usize) -> Result<Page<PollDetail>> {
        self.polls.list_active(page)
    }

    pub fn poll_detail(&self, poll_id: PollId) -> Result<PollDetail> {
        self.polls.detail(poll_id)
    }

    pub fn poll_options(&self, poll_id: PollId) -> Result<Vec<PollOption>> {
        self.polls.options(poll_id)
    }

    pub fn cast_vote(&self, token: &str, poll_id: PollId, option_id: OptionId) -> Result<Vote> {
        let user = self.current_user(token)?;
        self.ledger.cast_vote(&user, poll_id, option_id)
    }

    /// The caller's vote on a poll, if any
    pub fn my_vote(&self, token: &str, poll_id: PollId) -> Result<Option<Vote>> {
        let user = self.current_user(token)?;
        self.ledger.user_vote(&user, poll_id)
    }

    pub fn poll_results(&self, poll_id: PollId) -> Result<PollResults> {
        self.results.results(poll_id)
    }

    /// Background session cleanup plus the sender that stops it
    pub fn session_cleanup(&self) -> (SessionCleanupService, tokio::sync::mpsc::Sender<()>) {
        let (stop_tx, stop_rx) = tokio::sync::mpsc::channel(1);
        (SessionCleanupService::new(self.sessions.clone(), stop_rx), stop_tx)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn sessions(&self) -> &Arc<SessionService> {
        &self.sessions
    }

    pub fn polls(&self) -> &PollService {
        &self.polls
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    pub fn results(&self) -> &ResultAggregator {
        &self.results
    }
}

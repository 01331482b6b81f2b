//! End-to-end tests for poll creation, vote integrity and cached results

use std::sync::Arc;

use chrono::{Duration, Utc};
use polls::{
    Error, PollSystem, Result,
    cache::MemoryCache,
    config::Config,
    identity::{AccessToken, Registration},
    storage::{MemoryStore, PollStore},
    types::{NewPoll, PollStatus},
};
use tokio::sync::Barrier;
use tokio_test::{assert_err, assert_ok};

struct Fixture {
    system: Arc<PollSystem>,
    store: Arc<MemoryStore>,
    admin: AccessToken,
}

fn fixture() -> Result<Fixture> {
    let store = Arc::new(MemoryStore::new());
    let system = PollSystem::new(
        &Config::for_testing(),
        store.clone(),
        Arc::new(MemoryCache::new(1024)),
    )?;

    system.register_admin(Registration::new(
        "root",
        "root@example.com",
        "Sup3r-Secret-Key",
        "Site",
        "Admin",
    ))?;
    let admin = system.login("root", "Sup3r-Secret-Key")?;

    Ok(Fixture {
        system: Arc::new(system),
        store,
        admin,
    })
}

/// Register and log in `count` voters, each from its own client address
fn voters(system: &PollSystem, count: usize) -> Result<Vec<AccessToken>> {
    (0..count)
        .map(|i| {
            let username = format!("voter{i}");
            system.register(
                &format!("10.0.0.{i}"),
                Registration::new(
                    username.clone(),
                    format!("{username}@example.com"),
                    "Maple-Syrup-2024",
                    "Voter",
                    format!("Number {i}"),
                ),
            )?;
            system.login(&username, "Maple-Syrup-2024")
        })
        .collect()
}

// =============================================================================
// END-TO-END FLOW
// =============================================================================

#[tokio::test]
async fn test_end_to_end_vote_tally() -> Result<()> {
    println!("🗳️  Testing end-to-end vote tally...");

    let Fixture { system, admin, .. } = fixture()?;
    let poll = system.create_poll(&admin.token, NewPoll::new("Best letter", ["A", "B"]))?;
    let (a, b) = (poll.options[0].id, poll.options[1].id);

    let voters = voters(&system, 4)?;
    for (voter, option) in voters.iter().zip([a, a, a, b]) {
        assert_ok!(system.cast_vote(&voter.token, poll.id, option));
    }

    let results = system.poll_results(poll.id)?;
    println!("✅ Results: {results:?}");

    assert_eq!(results.poll, "Best letter");
    assert_eq!(results.votes_for("A"), Some(3));
    assert_eq!(results.votes_for("B"), Some(1));
    assert_eq!(results.total_votes, 4);
    assert_eq!(results.percentage(a), 75.0);

    let detail = system.poll_detail(poll.id)?;
    assert_eq!(detail.total_votes, 4);
    assert_eq!(detail.status, PollStatus::Open);

    Ok(())
}

#[tokio::test]
async fn test_sum_of_counts_equals_total() -> Result<()> {
    let Fixture { system, admin, .. } = fixture()?;
    let poll = system.create_poll(
        &admin.token,
        NewPoll::new("Weekday", ["Mon", "Tue", "Wed", "Thu", "Fri"]),
    )?;

    let voters = voters(&system, 12)?;
    for (i, voter) in voters.iter().enumerate() {
        // Skewed distribution: options 0 and 2 get most votes, 4 gets none
        let pick = [0, 2, 0, 1, 2, 0, 3, 0][i % 8];
        system.cast_vote(&voter.token, poll.id, poll.options[pick].id)?;
    }

    let results = system.poll_results(poll.id)?;
    let sum: u64 = results.results.iter().map(|r| r.votes).sum();

    assert_eq!(results.results.len(), 5);
    assert_eq!(sum, results.total_votes);
    assert_eq!(results.total_votes, 12);
    assert_eq!(results.votes_for("Fri"), Some(0));

    Ok(())
}

// =============================================================================
// VOTE INTEGRITY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_duplicate_votes_single_winner() -> Result<()> {
    println!("🏁 Testing concurrent duplicate votes...");

    let Fixture { system, store, admin } = fixture()?;
    let poll = system.create_poll(&admin.token, NewPoll::new("Race", ["Left", "Right"]))?;
    let voter = voters(&system, 1)?.remove(0);

    let poll_id = poll.id;
    let attempts = 16;
    let barrier = Arc::new(Barrier::new(attempts));
    let mut handles = Vec::new();

    for i in 0..attempts {
        let system = system.clone();
        let barrier = barrier.clone();
        let token = voter.token.clone();
        let option = poll.options[i % 2].id;

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            system.cast_vote(&token, poll_id, option)
        }));
    }

    let mut accepted = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.expect("vote task panicked") {
            Ok(_) => accepted += 1,
            Err(Error::DuplicateVote { .. }) => duplicates += 1,
            Err(e) => panic!("unexpected vote error: {e}"),
        }
    }

    println!("✅ Accepted: {accepted}, duplicates: {duplicates}");
    assert_eq!(accepted, 1);
    assert_eq!(duplicates, attempts - 1);
    assert_eq!(store.votes_for_poll(poll.id)?.len(), 1);
    assert_eq!(system.poll_results(poll.id)?.total_votes, 1);

    Ok(())
}

#[tokio::test]
async fn test_votes_on_closed_polls_are_rejected() -> Result<()> {
    let Fixture { system, store, admin } = fixture()?;
    let voter = voters(&system, 1)?.remove(0);

    let inactive = system.create_poll(&admin.token, NewPoll::new("Closing", ["Yes", "No"]))?;
    system.set_poll_active(&admin.token, inactive.id, false)?;
    let result = system.cast_vote(&voter.token, inactive.id, inactive.options[0].id);
    assert!(matches!(result, Err(Error::PollClosed { .. })));

    // Creation refuses past expiry dates, so seed the expired poll directly
    let author = system.current_user(&admin.token)?;
    let draft = NewPoll::new("Yesterday", ["Yes", "No"]).expiring_at(Utc::now() - Duration::days(1));
    let (expired, options) = store.create_poll(&author, &draft, Utc::now() - Duration::days(2))?;

    let result = system.cast_vote(&voter.token, expired.id, options[0].id);
    assert!(matches!(result, Err(Error::PollClosed { .. })));
    assert_eq!(system.poll_detail(expired.id)?.status, PollStatus::Expired);

    assert_eq!(store.vote_count()?, 0);
    Ok(())
}

#[tokio::test]
async fn test_option_from_another_poll_is_invalid() -> Result<()> {
    let Fixture { system, admin, .. } = fixture()?;
    let voter = voters(&system, 1)?.remove(0);

    let first = system.create_poll(&admin.token, NewPoll::new("First", ["A", "B"]))?;
    let second = system.create_poll(&admin.token, NewPoll::new("Second", ["C", "D"]))?;

    let result = system.cast_vote(&voter.token, first.id, second.options[0].id);
    assert!(matches!(result, Err(Error::InvalidOption { .. })));

    // The rejected attempt did not consume the voter's one vote
    assert_ok!(system.cast_vote(&voter.token, first.id, first.options[0].id));
    assert_err!(system.cast_vote(&voter.token, first.id, first.options[1].id));

    Ok(())
}

// =============================================================================
// CACHE CONSISTENCY
// =============================================================================

#[tokio::test]
async fn test_results_reflect_vote_after_cached_read() -> Result<()> {
    println!("🔄 Testing cache invalidation on vote...");

    let Fixture { system, admin, .. } = fixture()?;
    let poll = system.create_poll(&admin.token, NewPoll::new("Cached", ["Up", "Down"]))?;
    let voters = voters(&system, 2)?;

    system.cast_vote(&voters[0].token, poll.id, poll.options[0].id)?;

    // Populate and hit the cache
    assert_eq!(system.poll_results(poll.id)?.total_votes, 1);
    assert_eq!(system.poll_results(poll.id)?.total_votes, 1);
    assert_eq!(system.poll_detail(poll.id)?.total_votes, 1);
    assert_eq!(system.list_polls(1)?.results[0].total_votes, 1);
    let hits_before = system.cache_stats().hits;
    assert!(hits_before >= 1);

    system.cast_vote(&voters[1].token, poll.id, poll.options[1].id)?;

    let results = system.poll_results(poll.id)?;
    assert_eq!(results.total_votes, 2);
    assert_eq!(results.votes_for("Down"), Some(1));
    assert_eq!(system.poll_detail(poll.id)?.total_votes, 2);
    assert_eq!(system.list_polls(1)?.results[0].total_votes, 2);

    println!("✅ Cache stats: {:?}", system.cache_stats());
    Ok(())
}

#[tokio::test]
async fn test_new_poll_appears_in_cached_listing() -> Result<()> {
    let Fixture { system, admin, .. } = fixture()?;

    system.create_poll(&admin.token, NewPoll::new("First", ["A", "B"]))?;
    assert_eq!(system.list_polls(1)?.count, 1);

    system.create_poll(&admin.token, NewPoll::new("Second", ["A", "B"]))?;
    let page = system.list_polls(1)?;
    assert_eq!(page.count, 2);
    assert_eq!(page.results[0].title, "Second");

    Ok(())
}

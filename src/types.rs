//! # Core Types for the Poll System
//!
//! This module defines the records and response shapes shared by every
//! component: identifiers, users, polls with their options, votes, and the
//! aggregated views returned to callers.
//!
//! ## Type Categories
//!
//! ### Identifiers
//! - [`UserId`], [`PollId`], [`OptionId`], [`VoteId`]: storage-assigned keys
//!
//! ### Core Entities
//! - [`User`]: an account known to the identity directory
//! - [`Poll`]: a question with optional expiry and an active flag
//! - [`PollOption`]: one selectable choice of exactly one poll
//! - [`Vote`]: an immutable record of one user's choice on one poll
//!
//! ### Views
//! - [`PollDetail`]: poll with options and live vote counts
//! - [`PollResults`]: aggregated counts per option
//! - [`Page`]: one page of a listing
//!
//! ## Usage Examples
//!
//! ```rust
//! use polls::types::*;
//! use chrono::{Duration, Utc};
//!
//! let poll = Poll {
//!     id: PollId(1),
//!     title: "Favourite fruit?".to_string(),
//!     description: None,
//!     created_at: Utc::now(),
//!     expires_at: Some(Utc::now() + Duration::hours(1)),
//!     created_by: UserId(1),
//!     created_by_username: "admin".to_string(),
//!     is_active: true,
//! };
//!
//! assert_eq!(poll.status(), PollStatus::Open);
//! assert!(poll.is_votable());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::{Error, Result};

/// Maximum length of a poll title
pub const MAX_TITLE_LENGTH: usize = 255;

/// Maximum length of an option text
pub const MAX_OPTION_LENGTH: usize = 255;

/// Minimum number of options a poll is created with
pub const MIN_OPTIONS: usize = 2;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Identifier of a user account
    UserId
);
define_id!(
    /// Identifier of a poll
    PollId
);
define_id!(
    /// Identifier of a poll option
    OptionId
);
define_id!(
    /// Identifier of a vote record
    VoteId
);

/// A user account as seen by the rest of the system
///
/// The password hash never leaves the identity directory, so this type is
/// safe to serialize into responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Staff/superuser flag; required for poll authoring
    pub is_admin: bool,
    pub date_joined: DateTime<Utc>,
}

/// Derived voting status of a poll
///
/// There are no internal transitions: a poll moves between states only when
/// time passes its expiry or an admin toggles `is_active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    /// Active and not expired
    Open,
    /// Active but past `expires_at`
    Expired,
    /// Administratively deactivated
    Closed,
}

/// A poll authored by an admin
///
/// # Examples
///
/// ```rust
/// use polls::types::{Poll, PollId, PollStatus, UserId};
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let poll = Poll {
///     id: PollId(3),
///     title: "Lunch?".to_string(),
///     description: None,
///     created_at: now - Duration::hours(2),
///     expires_at: Some(now - Duration::hours(1)),
///     created_by: UserId(1),
///     created_by_username: "admin".to_string(),
///     is_active: true,
/// };
///
/// assert_eq!(poll.status_at(now), PollStatus::Expired);
/// assert!(!poll.is_votable_at(now));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Optional expiry; `None` means the poll never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: UserId,
    /// Username of the author at creation time
    pub created_by_username: String,
    /// Manual active/inactive toggle
    pub is_active: bool,
}

impl Poll {
    /// Check whether the poll is past its expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Check whether the poll is past its expiry right now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Derived status at `now`; an inactive poll is `Closed` even if expired
    pub fn status_at(&self, now: DateTime<Utc>) -> PollStatus {
        if !self.is_active {
            PollStatus::Closed
        } else if self.is_expired_at(now) {
            PollStatus::Expired
        } else {
            PollStatus::Open
        }
    }

    /// Derived status right now
    pub fn status(&self) -> PollStatus {
        self.status_at(Utc::now())
    }

    /// A poll accepts votes only while it is active and not expired
    pub fn is_votable_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == PollStatus::Open
    }

    /// Whether the poll accepts votes right now
    pub fn is_votable(&self) -> bool {
        self.is_votable_at(Utc::now())
    }
}

/// One selectable choice belonging to exactly one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: OptionId,
    pub poll_id: PollId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// An immutable record of one user's choice on one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub poll_id: PollId,
    pub option_id: OptionId,
    pub user_id: UserId,
    pub voted_at: DateTime<Utc>,
}

/// Input for creating a poll together with its options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPoll {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub options: Vec<String>,
}

impl NewPoll {
    /// Build a poll draft from a title and option texts
    pub fn new<I, S>(title: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            title: title.into(),
            description: None,
            expires_at: None,
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the expiry
    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Validate the draft against the creation rules at `now`
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(Error::validation("title", "This field may not be blank."));
        }
        if self.title.chars().count() > MAX_TITLE_LENGTH {
            return Err(Error::validation(
                "title",
                format!("Ensure this field has no more than {MAX_TITLE_LENGTH} characters."),
            ));
        }

        if self.options.len() < MIN_OPTIONS {
            return Err(Error::validation(
                "options",
                format!("A poll must have at least {MIN_OPTIONS} options."),
            ));
        }

        let mut seen = HashSet::with_capacity(self.options.len());
        for text in &self.options {
            if text.trim().is_empty() {
                return Err(Error::validation("options", "Option text may not be blank."));
            }
            if text.chars().count() > MAX_OPTION_LENGTH {
                return Err(Error::validation(
                    "options",
                    format!("Ensure each option has no more than {MAX_OPTION_LENGTH} characters."),
                ));
            }
            if !seen.insert(text.as_str()) {
                return Err(Error::validation("options", "Options must be unique."));
            }
        }

        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(Error::validation(
                    "expires_at",
                    "Expiry date must be in the future.",
                ));
            }
        }

        Ok(())
    }
}

/// An option together with its current vote count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSummary {
    pub id: OptionId,
    pub text: String,
    pub vote_count: u64,
}

/// Full poll view: fields, derived status, author and live counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollDetail {
    pub id: PollId,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_expired: bool,
    pub status: PollStatus,
    /// Author username
    pub created_by: String,
    pub total_votes: u64,
    pub options: Vec<OptionSummary>,
}

impl PollDetail {
    /// Assemble a detail view from a poll, its options and per-option counts
    pub fn assemble(
        poll: &Poll,
        options: &[PollOption],
        count_for: impl Fn(OptionId) -> u64,
        now: DateTime<Utc>,
    ) -> Self {
        let options: Vec<OptionSummary> = options
            .iter()
            .map(|option| OptionSummary {
                id: option.id,
                text: option.text.clone(),
                vote_count: count_for(option.id),
            })
            .collect();
        let total_votes = options.iter().map(|option| option.vote_count).sum();

        Self {
            id: poll.id,
            title: poll.title.clone(),
            description: poll.description.clone(),
            created_at: poll.created_at,
            expires_at: poll.expires_at,
            is_active: poll.is_active,
            is_expired: poll.is_expired_at(now),
            status: poll.status_at(now),
            created_by: poll.created_by_username.clone(),
            total_votes,
            options,
        }
    }

    /// Recompute the time-dependent fields for `now`
    ///
    /// A cached view keeps its counts but must not keep reporting `Open`
    /// after the poll's expiry has passed.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) {
        self.is_expired = self.expires_at.is_some_and(|expires_at| now > expires_at);
        self.status = if !self.is_active {
            PollStatus::Closed
        } else if self.is_expired {
            PollStatus::Expired
        } else {
            PollStatus::Open
        };
    }
}

/// Vote count of one option in a results view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub option_id: OptionId,
    /// Option text
    pub option: String,
    pub votes: u64,
}

/// Aggregated results of a poll
///
/// `total_votes` is always the sum of the per-option `votes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResults {
    pub poll_id: PollId,
    /// Poll title
    pub poll: String,
    pub total_votes: u64,
    pub results: Vec<OptionResult>,
}

impl PollResults {
    /// Votes received by the option with the given text
    pub fn votes_for(&self, option_text: &str) -> Option<u64> {
        self.results
            .iter()
            .find(|result| result.option == option_text)
            .map(|result| result.votes)
    }

    /// Share of the total held by an option, in percent
    pub fn percentage(&self, option_id: OptionId) -> f64 {
        if self.total_votes == 0 {
            return 0.0;
        }
        self.results
            .iter()
            .find(|result| result.option_id == option_id)
            .map(|result| result.votes as f64 * 100.0 / self.total_votes as f64)
            .unwrap_or(0.0)
    }
}

/// One page of a page-number paginated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Total number of items across all pages
    pub count: usize,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// Whether another page follows this one
    pub fn has_next(&self) -> bool {
        self.page * self.page_size < self.count
    }

    /// Whether a page precedes this one
    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

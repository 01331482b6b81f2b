//! Bearer access tokens
//!
//! A token is `<session id>.<secret>` where the secret is 32 random bytes in
//! hex. Only a keyed BLAKE3 digest of the secret is kept, and presented
//! secrets are compared against it in constant time.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::config::{MAX_ACCESS_TOKEN_LIFETIME_SECONDS, SecurityConfig};
use crate::types::{User, UserId};
use crate::{Error, Result};

/// How long revoked sessions are retained before cleanup removes them
const REVOKED_RETENTION_SECONDS: i64 = 3600;

/// Token handed to a client at login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Opaque bearer string
    pub token: String,
    pub session_id: Uuid,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// State of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    /// Logged out or invalidated by a password change
    Revoked { revoked_at: DateTime<Utc> },
}

/// Server-side record of an issued token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SessionState,
    secret_digest: [u8; 32],
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Active and not expired
    pub fn is_usable(&self) -> bool {
        self.state == SessionState::Active && !self.is_expired()
    }
}

/// Session cleanup statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCleanupStats {
    pub expired_removed: usize,
    pub revoked_removed: usize,
    pub remaining: usize,
}

/// Session service statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub revoked_sessions: usize,
    pub expired_sessions: usize,
}

/// Issues and resolves access tokens
pub struct SessionService {
    key: [u8; 32],
    lifetime: Duration,
    cleanup_interval: std::time::Duration,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionService {
    pub fn new(key: [u8; 32], lifetime_seconds: u64, cleanup_interval_seconds: u64) -> Self {
        Self {
            key,
            lifetime: Duration::try_seconds(lifetime_seconds.min(MAX_ACCESS_TOKEN_LIFETIME_SECONDS) as i64)
                .unwrap_or_else(Duration::zero),
            cleanup_interval: std::time::Duration::from_secs(cleanup_interval_seconds.max(1)),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create from the security configuration
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.token_key()?,
            config.access_token_lifetime_seconds,
            config.session_cleanup_interval_seconds,
        ))
    }

    /// Create with a random key and test timeouts
    pub fn for_testing() -> Self {
        Self::new(rand::random(), 300, 30)
    }

    fn digest(&self, secret: &[u8]) -> [u8; 32] {
        blake3::keyed_hash(&self.key, secret).into()
    }

    /// Issue a new access token for a user (login)
    pub fn issue(&self, user: &User) -> Result<AccessToken> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);

        let session_id = Uuid::new_v4();
        let issued_at = Utc::now();
        let expires_at = issued_at
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| Error::internal("Access token expiry is out of range"))?;
        let session = Session {
            session_id,
            user_id: user.id,
            issued_at,
            expires_at,
            state: SessionState::Active,
            secret_digest: self.digest(&secret),
        };

        let token = format!("{}.{}", session_id.simple(), hex::encode(secret));
        secret.zeroize();

        {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| Error::internal("Session store write error"))?;
            sessions.insert(session_id, session);
        }

        tracing::info!(user_id = %user.id, %session_id, "access token issued");

        Ok(AccessToken {
            token,
            session_id,
            user_id: user.id,
            issued_at,
            expires_at,
        })
    }

    /// Resolve a bearer token to its session
    pub fn authenticate(&self, token: &str) -> Result<Session> {
        let (session_id, mut secret) = parse_token(token)?;
        let presented = self.digest(&secret);
        secret.zeroize();

        let sessions = self
            .sessions
            .read()
            .map_err(|_| Error::internal("Session store read error"))?;

        let session = sessions
            .get(&session_id)
            .ok_or_else(|| Error::unauthorized("Token not found"))?;

        if !bool::from(session.secret_digest[..].ct_eq(&presented[..])) {
            return Err(Error::unauthorized("Token not found"));
        }

        match session.state {
            SessionState::Revoked { .. } => Err(Error::unauthorized("Token revoked")),
            SessionState::Active if session.is_expired() => Err(Error::unauthorized("Token expired")),
            SessionState::Active => Ok(session.clone()),
        }
    }

    /// Revoke the session behind a token (logout)
    pub fn revoke(&self, token: &str) -> Result<bool> {
        let session = self.authenticate(token)?;

        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| Error::internal("Session store write error"))?;

        let revoked = match sessions.get_mut(&session.session_id) {
            Some(stored) if stored.state == SessionState::Active => {
                stored.state = SessionState::Revoked {
                    revoked_at: Utc::now(),
                };
                true
            }
            _ => false,
        };

        if revoked {
            tracing::info!(user_id = %session.user_id, session_id = %session.session_id, "access token revoked");
        }
        Ok(revoked)
    }

    /// Revoke every active session of a user
    pub fn revoke_user(&self, user_id: UserId) -> Result<u32> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| Error::internal("Session store write error"))?;

        let now = Utc::now();
        let mut revoked = 0;
        for session in sessions
            .values_mut()
            .filter(|session| session.user_id == user_id && session.state == SessionState::Active)
        {
            session.state = SessionState::Revoked { revoked_at: now };
            revoked += 1;
        }

        tracing::info!(user_id = %user_id, revoked, "user sessions revoked");
        Ok(revoked)
    }

    /// Remove expired sessions and revoked ones past their retention
    pub fn cleanup_expired(&self) -> Result<SessionCleanupStats> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| Error::internal("Session store write error"))?;

        let now = Utc::now();
        let retention = Duration::seconds(REVOKED_RETENTION_SECONDS);
        let mut expired_removed = 0;
        let mut revoked_removed = 0;

        sessions.retain(|_, session| match &session.state {
            SessionState::Revoked { revoked_at } => {
                let keep = now - *revoked_at <= retention;
                if !keep {
                    revoked_removed += 1;
                }
                keep
            }
            SessionState::Active => {
                let keep = now <= session.expires_at;
                if !keep {
                    expired_removed += 1;
                }
                keep
            }
        });

        if expired_removed + revoked_removed > 0 {
            tracing::info!(expired_removed, revoked_removed, "session cleanup");
        }

        Ok(SessionCleanupStats {
            expired_removed,
            revoked_removed,
            remaining: sessions.len(),
        })
    }

    pub fn stats(&self) -> Result<SessionStats> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| Error::internal("Session store read error"))?;

        let mut stats = SessionStats {
            total_sessions: sessions.len(),
            active_sessions: 0,
            revoked_sessions: 0,
            expired_sessions: 0,
        };
        for session in sessions.values() {
            match session.state {
                SessionState::Revoked { .. } => stats.revoked_sessions += 1,
                SessionState::Active if session.is_expired() => stats.expired_sessions += 1,
                SessionState::Active => stats.active_sessions += 1,
            }
        }
        Ok(stats)
    }
}

fn parse_token(token: &str) -> Result<(Uuid, [u8; 32])> {
    let malformed = || Error::unauthorized("Malformed token");

    let (session_part, secret_part) = token.trim().split_once('.').ok_or_else(malformed)?;
    let session_id = Uuid::parse_str(session_part).map_err(|_| malformed())?;

    let mut secret = [0u8; 32];
    hex::decode_to_slice(secret_part, &mut secret).map_err(|_| malformed())?;

    Ok((session_id, secret))
}

/// Background task that periodically purges stale sessions
pub struct SessionCleanupService {
    sessions: Arc<SessionService>,
    stop_signal: tokio::sync::mpsc::Receiver<()>,
    cleanup_interval: std::time::Duration,
}

impl SessionCleanupService {
    pub fn new(sessions: Arc<SessionService>, stop_signal: tokio::sync::mpsc::Receiver<()>) -> Self {
        let cleanup_interval = sessions.cleanup_interval;
        Self {
            sessions,
            stop_signal,
            cleanup_interval,
        }
    }

    /// Run until the stop signal fires or its sender is dropped
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.cleanup_interval);

        tracing::info!(interval = ?self.cleanup_interval, "session cleanup service started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sessions.cleanup_expired() {
                        tracing::error!(error = %e, "session cleanup failed");
                    }
                }
                _ = self.stop_signal.recv() => {
                    tracing::info!("session cleanup service stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64) -> User {
        User {
            id: UserId(id),
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            is_admin: false,
            date_joined: Utc::now(),
        }
    }

    #[test]
    fn test_issue_and_authenticate() {
        let sessions = SessionService::for_testing();
        let token = sessions.issue(&user(1)).unwrap();

        let session = sessions.authenticate(&token.token).unwrap();
        assert_eq!(session.user_id, UserId(1));
        assert_eq!(session.session_id, token.session_id);
        assert!(session.is_usable());
        assert!(token.expires_at > token.issued_at);
    }

    #[test]
    fn test_rejects_tampered_and_malformed_tokens() {
        let sessions = SessionService::for_testing();
        let token = sessions.issue(&user(1)).unwrap();

        let (id, _) = token.token.split_once('.').unwrap();
        let forged = format!("{id}.{}", hex::encode([9u8; 32]));
        assert!(matches!(sessions.authenticate(&forged), Err(Error::Unauthorized { .. })));

        let bad_hex = format!("{id}.zz");
        for bad in ["", "no-dot", "not-a-uuid.00", bad_hex.as_str()] {
            assert!(matches!(sessions.authenticate(bad), Err(Error::Unauthorized { .. })));
        }

        // A token from another service (different key) is unknown here
        let other = SessionService::for_testing();
        let foreign = other.issue(&user(1)).unwrap();
        assert!(sessions.authenticate(&foreign.token).is_err());
    }

    #[test]
    fn test_revoke_and_revoke_user() {
        let sessions = SessionService::for_testing();
        let first = sessions.issue(&user(1)).unwrap();
        let second = sessions.issue(&user(1)).unwrap();
        let other = sessions.issue(&user(2)).unwrap();

        assert!(sessions.revoke(&first.token).unwrap());
        assert!(matches!(
            sessions.authenticate(&first.token),
            Err(Error::Unauthorized { ref reason }) if reason == "Token revoked"
        ));

        assert_eq!(sessions.revoke_user(UserId(1)).unwrap(), 1);
        assert!(sessions.authenticate(&second.token).is_err());
        assert!(sessions.authenticate(&other.token).is_ok());

        let stats = sessions.stats().unwrap();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.revoked_sessions, 2);
        assert_eq!(stats.active_sessions, 1);
    }

    #[test]
    fn test_expired_tokens_are_rejected_and_cleaned() {
        let sessions = SessionService::new(rand::random(), 0, 1);
        let token = sessions.issue(&user(1)).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        assert!(matches!(
            sessions.authenticate(&token.token),
            Err(Error::Unauthorized { ref reason }) if reason == "Token expired"
        ));

        let stats = sessions.cleanup_expired().unwrap();
        assert_eq!(stats.expired_removed, 1);
        assert_eq!(stats.remaining, 0);
    }

    #[test]
    fn test_oversized_lifetime_is_capped() {
        let sessions = SessionService::new(rand::random(), u64::MAX, 1);
        let token = sessions.issue(&user(1)).unwrap();

        let lifetime = token.expires_at - token.issued_at;
        assert_eq!(lifetime.num_seconds(), MAX_ACCESS_TOKEN_LIFETIME_SECONDS as i64);
        assert!(sessions.authenticate(&token.token).is_ok());

        let config = SecurityConfig {
            access_token_lifetime_seconds: u64::MAX,
            ..SecurityConfig::for_testing()
        };
        assert!(matches!(
            SessionService::from_config(&config),
            Err(Error::Internal { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_service_stops_on_signal() {
        let sessions = Arc::new(SessionService::new(rand::random(), 0, 1));
        sessions.issue(&user(1)).unwrap();

        let (stop_tx, stop_rx) = tokio::sync::mpsc::channel(1);
        let handle = tokio::spawn(SessionCleanupService::new(sessions.clone(), stop_rx).run());

        // The first interval tick fires immediately
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop_tx.send(()).await.unwrap();
        handle.await.unwrap();

        assert_eq!(sessions.stats().unwrap().total_sessions, 0);
    }
}

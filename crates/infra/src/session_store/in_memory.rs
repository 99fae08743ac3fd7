use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_auth::Session;
use warden_core::IdentityId;

use super::r#trait::SessionStore;
use crate::StoreError;

/// In-memory session store keyed by token.
///
/// Intended for tests/dev. Compound operations run under a single write lock.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(sessions: &mut HashMap<String, Session>, session: Session) -> Result<(), StoreError> {
        if sessions.contains_key(&session.token) {
            return Err(StoreError::conflict("session token already exists"));
        }
        sessions.insert(session.token.clone(), session);
        Ok(())
    }

    fn revoke_owned(
        sessions: &mut HashMap<String, Session>,
        identity_id: IdentityId,
        now: DateTime<Utc>,
    ) -> u64 {
        let mut revoked = 0;
        for session in sessions.values_mut() {
            if session.identity_id == identity_id && session.is_active(now) {
                session.revoke(now);
                revoked += 1;
            }
        }
        revoked
    }

    fn claim_locked(sessions: &mut HashMap<String, Session>, token: &str, now: DateTime<Utc>) -> bool {
        match sessions.get(token) {
            Some(session) if session.is_active(now) => sessions.remove(token).is_some(),
            _ => false,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::poisoned())?;
        Self::insert(&mut sessions, session)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| StoreError::poisoned())?;
        Ok(sessions.get(token).cloned())
    }

    async fn find_by_identity(&self, identity_id: IdentityId) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| StoreError::poisoned())?;
        let mut owned: Vec<Session> = sessions
            .values()
            .filter(|s| s.identity_id == identity_id)
            .cloned()
            .collect();
        owned.sort_by_key(|s| (s.created_at, s.id));
        Ok(owned)
    }

    async fn delete_by_token(&self, token: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::poisoned())?;
        sessions.remove(token);
        Ok(())
    }

    async fn revoke_all_for_identity(
        &self,
        identity_id: IdentityId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::poisoned())?;
        Ok(Self::revoke_owned(&mut sessions, identity_id, now))
    }

    async fn is_active(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let sessions = self.sessions.read().map_err(|_| StoreError::poisoned())?;
        Ok(sessions.get(token).is_some_and(|s| s.is_active(now)))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::poisoned())?;
        let before = sessions.len();
        sessions.retain(|_, s| s.is_active(now));
        Ok((before - sessions.len()) as u64)
    }

    async fn claim(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::poisoned())?;
        Ok(Self::claim_locked(&mut sessions, token, now))
    }

    async fn rotate(
        &self,
        old_token: &str,
        replacement: Session,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::poisoned())?;
        if sessions.contains_key(&replacement.token) {
            return Err(StoreError::conflict("session token already exists"));
        }
        if !Self::claim_locked(&mut sessions, old_token, now) {
            return Ok(false);
        }
        Self::insert(&mut sessions, replacement)?;
        Ok(true)
    }

    async fn start_exclusive(&self, session: Session, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::poisoned())?;
        if sessions.contains_key(&session.token) {
            return Err(StoreError::conflict("session token already exists"));
        }
        Self::revoke_owned(&mut sessions, session.identity_id, now);
        Self::insert(&mut sessions, session)
    }
}

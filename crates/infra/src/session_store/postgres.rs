//! Postgres-backed session store.
//!
//! Rotation and claiming are single `DELETE ... WHERE token = $1 AND expires_at > $2`
//! statements: Postgres row locking guarantees only one concurrent statement
//! deletes the row, so only one claimant sees `rows_affected() == 1`.
//!
//! `start_exclusive` and `rotate` both lock the owning identity row
//! (`SELECT ... FOR UPDATE`) before touching its sessions, so every multi-row
//! write for one identity takes its locks in the same order. Concurrent logins
//! of the same identity serialise on that row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use warden_auth::{REVOCATION_BACKDATE, Session};
use warden_core::{IdentityId, SessionId};

use super::r#trait::SessionStore;
use crate::StoreError;
use crate::postgres::map_sqlx_error;

const SESSION_COLUMNS: &str = "id, identity_id, token, expires_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(tx: &mut Transaction<'_, Postgres>, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, identity_id, token, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.identity_id.as_uuid())
        .bind(&session.token)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(
        skip(self, session),
        fields(session_id = %session.id, identity_id = %session.identity_id),
        err
    )]
    async fn create(&self, session: Session) -> Result<(), StoreError> {
        let mut tx = self.begin("create_session").await?;
        Self::insert(&mut tx, &session).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_session", e))
    }

    #[instrument(skip(self, token), err)]
    async fn find_by_token(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_session_by_token", e))?;

        row.map(|r| session_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(identity_id = %identity_id), err)]
    async fn find_by_identity(&self, identity_id: IdentityId) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE identity_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(identity_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_sessions_by_identity", e))?;

        rows.iter().map(session_from_row).collect()
    }

    #[instrument(skip(self, token), err)]
    async fn delete_by_token(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_session", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(identity_id = %identity_id, revoked = tracing::field::Empty), err)]
    async fn revoke_all_for_identity(
        &self,
        identity_id: IdentityId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let revoked = revoke_owned(&self.pool, identity_id, now).await?;
        Span::current().record("revoked", revoked);
        Ok(revoked)
    }

    #[instrument(skip(self, token), err)]
    async fn is_active(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM sessions WHERE token = $1 AND expires_at > $2) AS active",
        )
        .bind(token)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("is_session_active", e))?;

        row.try_get("active")
            .map_err(|e| map_sqlx_error("is_session_active", e))
    }

    #[instrument(skip(self), fields(purged = tracing::field::Empty), err)]
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let purged = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired_sessions", e))?
            .rows_affected();
        Span::current().record("purged", purged);
        Ok(purged)
    }

    #[instrument(skip(self, token), err)]
    async fn claim(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let claimed = sqlx::query("DELETE FROM sessions WHERE token = $1 AND expires_at > $2")
            .bind(token)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_session", e))?
            .rows_affected();
        Ok(claimed == 1)
    }

    #[instrument(
        skip(self, old_token, replacement),
        fields(session_id = %replacement.id, identity_id = %replacement.identity_id),
        err
    )]
    async fn rotate(
        &self,
        old_token: &str,
        replacement: Session,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin("rotate_session").await?;

        if !lock_owner(&mut tx, replacement.identity_id, "rotate_session").await? {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rotate_session", e))?;
            return Ok(false);
        }

        let claimed = sqlx::query("DELETE FROM sessions WHERE token = $1 AND expires_at > $2")
            .bind(old_token)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("rotate_session", e))?
            .rows_affected();

        if claimed != 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rotate_session", e))?;
            return Ok(false);
        }

        Self::insert(&mut tx, &replacement).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("rotate_session", e))?;
        Ok(true)
    }

    #[instrument(
        skip(self, session),
        fields(session_id = %session.id, identity_id = %session.identity_id),
        err
    )]
    async fn start_exclusive(&self, session: Session, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tx = self.begin("start_exclusive_session").await?;

        if !lock_owner(&mut tx, session.identity_id, "start_exclusive_session").await? {
            return Err(StoreError::NotFound);
        }

        revoke_owned(&mut *tx, session.identity_id, now).await?;
        Self::insert(&mut tx, &session).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("start_exclusive_session", e))
    }
}

/// Row-lock the identity for the rest of `tx`; `false` when it does not exist.
async fn lock_owner(
    tx: &mut Transaction<'_, Postgres>,
    identity_id: IdentityId,
    operation: &'static str,
) -> Result<bool, StoreError> {
    let owner = sqlx::query("SELECT id FROM identities WHERE id = $1 FOR UPDATE")
        .bind(identity_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(owner.is_some())
}

async fn revoke_owned<'e, E>(
    executor: E,
    identity_id: IdentityId,
    now: DateTime<Utc>,
) -> Result<u64, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET expires_at = $2, updated_at = $3
        WHERE identity_id = $1 AND expires_at > $3
        "#,
    )
    .bind(identity_id.as_uuid())
    .bind(now - REVOCATION_BACKDATE)
    .bind(now)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("revoke_sessions", e))?;
    Ok(result.rows_affected())
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Result<Session, StoreError> {
    let decode = |e| map_sqlx_error("decode_session_row", e);
    Ok(Session {
        id: SessionId::from_uuid(row.try_get("id").map_err(decode)?),
        identity_id: IdentityId::from_uuid(row.try_get("identity_id").map_err(decode)?),
        token: row.try_get("token").map_err(decode)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

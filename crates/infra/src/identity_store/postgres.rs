//! Postgres-backed identity repository.
//!
//! Uniqueness (lowercased email, `(provider, external_id)`) is enforced by
//! indexes; violations arrive as SQLSTATE `23505` and map to `Conflict`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use warden_auth::{Identity, Provider, Role, normalize_email};
use warden_core::IdentityId;

use super::r#trait::IdentityRepository;
use crate::StoreError;
use crate::postgres::map_sqlx_error;

const IDENTITY_COLUMNS: &str = "id, email, password_hash, name, role, provider, external_id, \
                                avatar, email_verified, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresIdentityRepository {
    pool: PgPool,
}

impl PostgresIdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        operation: &str,
        predicate: &str,
        binds: &[&str],
    ) -> Result<Option<Identity>, StoreError> {
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE {predicate}");
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.map(|r| identity_from_row(&r)).transpose()
    }
}

#[async_trait]
impl IdentityRepository for PostgresIdentityRepository {
    #[instrument(skip(self), fields(identity_id = %id), err)]
    async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_identity_by_id", e))?;
        row.map(|r| identity_from_row(&r)).transpose()
    }

    #[instrument(skip(self, email), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let email = normalize_email(email);
        self.fetch_one_where("find_identity_by_email", "lower(email) = $1", &[email.as_str()])
            .await
    }

    #[instrument(skip(self, external_id), fields(provider = %provider), err)]
    async fn find_by_provider_id(
        &self,
        provider: &Provider,
        external_id: &str,
    ) -> Result<Option<Identity>, StoreError> {
        self.fetch_one_where(
            "find_identity_by_provider_id",
            "provider = $1 AND external_id = $2",
            &[provider.as_str(), external_id],
        )
        .await
    }

    #[instrument(skip(self, identity), fields(identity_id = %identity.id), err)]
    async fn create(&self, identity: Identity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO identities (
                id, email, password_hash, name, role, provider, external_id,
                avatar, email_verified, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(&identity.name)
        .bind(identity.role.as_str())
        .bind(identity.provider.as_str())
        .bind(&identity.external_id)
        .bind(&identity.avatar)
        .bind(identity.email_verified)
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_identity", e))?;
        Ok(())
    }

    #[instrument(skip(self, identity), fields(identity_id = %identity.id), err)]
    async fn update(&self, identity: Identity) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE identities
            SET email = $2, password_hash = $3, name = $4, role = $5, provider = $6,
                external_id = $7, avatar = $8, email_verified = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(&identity.name)
        .bind(identity.role.as_str())
        .bind(identity.provider.as_str())
        .bind(&identity.external_id)
        .bind(&identity.avatar)
        .bind(identity.email_verified)
        .bind(identity.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_identity", e))?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(identity_id = %id), err)]
    async fn delete(&self, id: IdentityId) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_identity", e))?
            .rows_affected();

        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Identity>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_identities", e))?;

        rows.iter().map(identity_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM identities")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_identities", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_identities", e))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}

fn identity_from_row(row: &sqlx::postgres::PgRow) -> Result<Identity, StoreError> {
    let decode = |e| map_sqlx_error("decode_identity_row", e);
    let role: String = row.try_get("role").map_err(decode)?;
    let provider: String = row.try_get("provider").map_err(decode)?;

    Ok(Identity {
        id: IdentityId::from_uuid(row.try_get("id").map_err(decode)?),
        email: row.try_get("email").map_err(decode)?,
        password_hash: row.try_get("password_hash").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        role: role
            .parse::<Role>()
            .map_err(|e| StoreError::backend(format!("bad role column: {e}")))?,
        provider: provider
            .parse::<Provider>()
            .map_err(|e| StoreError::backend(format!("bad provider column: {e}")))?,
        external_id: row.try_get("external_id").map_err(decode)?,
        avatar: row.try_get("avatar").map_err(decode)?,
        email_verified: row.try_get("email_verified").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

//! Postgres wiring shared by the `sqlx` adapters.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any other | `Backend` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | PoolClosed / Io / other | N/A | `Backend` |

use sqlx::PgPool;
use tracing::info;

use crate::StoreError;

const SCHEMA: &str = include_str!("../migrations/0001_identities_sessions.sql");

/// Create the `identities` and `sessions` tables and their indexes.
///
/// Idempotent: every statement is `IF NOT EXISTS`.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    info!("identity and session schema is up to date");
    Ok(())
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => {
                    let constraint = db_err.constraint().unwrap_or("unique key");
                    StoreError::Conflict(format!("{operation}: {constraint} already exists"))
                }
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Test pool from `WARDEN_TEST_DATABASE_URL`; `None` skips database tests.
#[cfg(test)]
pub(crate) async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("WARDEN_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    migrate(&pool).await.ok()?;
    Some(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_timeout_and_backend() {
        assert_eq!(
            map_sqlx_error("find", sqlx::Error::PoolTimedOut),
            StoreError::Timeout
        );
        assert!(matches!(
            map_sqlx_error("find", sqlx::Error::PoolClosed),
            StoreError::Backend(_)
        ));
        assert!(matches!(
            map_sqlx_error("find", sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
    }

    #[test]
    fn schema_declares_unique_indexes() {
        assert!(SCHEMA.contains("identities_email_key"));
        assert!(SCHEMA.contains("sessions_token_key"));
        assert!(SCHEMA.contains("identities_provider_external_id_key"));
    }

    #[test]
    fn sessions_outlive_their_identity_row() {
        assert!(!SCHEMA.contains("REFERENCES"));
        assert!(!SCHEMA.contains("ON DELETE CASCADE"));
        assert!(SCHEMA.contains("sessions_identity_id_idx"));
    }
}

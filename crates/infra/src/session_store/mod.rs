//! Refresh-token session persistence.
//!
//! The store is the authority for refresh-token liveness: a token is usable
//! only while a record exists for it with an expiry in the future.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemorySessionStore;
pub use postgres::PostgresSessionStore;
pub use r#trait::SessionStore;

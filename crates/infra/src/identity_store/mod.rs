//! Identity persistence.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryIdentityRepository;
pub use postgres::PostgresIdentityRepository;
pub use r#trait::IdentityRepository;

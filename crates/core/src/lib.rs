//! `warden-core`: identity and session foundation types.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{IdentityId, SessionId, TokenId};

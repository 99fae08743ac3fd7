//! Infrastructure layer: storage ports and adapters, identity resolution,
//! session orchestration, configuration and background maintenance.

pub mod config;
mod deadline;
pub mod error;
pub mod federated;
pub mod identity_resolver;
pub mod identity_store;
pub mod orchestrator;
pub mod postgres;
pub mod session_store;
pub mod sweeper;

#[cfg(test)]
mod integration_tests;

pub use config::{AuthConfig, ConfigError};
pub use error::StoreError;
pub use federated::{
    FederatedIdentityProvider, FederatedProfile, ProviderError, StaticFederatedProvider,
};
pub use identity_resolver::{FederatedResolution, IdentityResolver};
pub use identity_store::{
    IdentityRepository, InMemoryIdentityRepository, PostgresIdentityRepository,
};
pub use orchestrator::{
    AuthError, AuthSession, ErrorBody, IdentityPage, ProfileUpdate, SessionOrchestrator,
};
pub use session_store::{InMemorySessionStore, PostgresSessionStore, SessionStore};
pub use sweeper::{MIN_SWEEP_INTERVAL, SessionSweeper, SweeperHandle};

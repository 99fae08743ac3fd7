//! Session orchestration (application-level use cases).
//!
//! ```text
//! register        validate -> email free? -> hash -> create LOCAL identity -> issue pair -> persist session
//! login           find by email -> verify password -> revoke all + persist (one step) -> pair
//! federated login resolve (link | merge | create) -> revoke all + persist (one step) -> pair
//! refresh         validate refresh token -> is_active -> identity -> rotate (claim + insert)
//! logout          delete session by token (idempotent)
//! logout all      revoke every session of the identity (idempotent)
//! ```
//!
//! Every store and provider call runs under the configured store timeout.
//! Secrets (passwords, tokens, provider codes) are never recorded in spans.
//! Rejected requests are expected traffic: flow spans report them at INFO.
//!
//! A login for an unknown email, or for an account without a password, still
//! pays for one password verification against a throwaway hash.

pub mod error;
pub mod response;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use warden_auth::{
    Argon2Hasher, CredentialHasher, Identity, Principal, Provider, Role, Session, TokenIssuer,
    TokenKind, check_password_policy, normalize_email, require_role, require_self_or_admin,
    validate_email, validate_name,
};
use warden_core::IdentityId;

use crate::config::{AuthConfig, ConfigError};
use crate::deadline::within;
use crate::identity_resolver::IdentityResolver;
use crate::{FederatedIdentityProvider, FederatedProfile, IdentityRepository, SessionStore};

pub use error::{AuthError, ErrorBody};
pub use response::{AuthSession, IdentityPage, ProfileUpdate, TOKEN_TYPE};

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_PAGE_LIMIT: usize = 100;

const DUMMY_PASSWORD: &str = "warden-timing-equaliser";

/// Coordinates hasher, token issuer, identity resolver and session store.
///
/// Holds no mutable state of its own; all state lives in the injected stores,
/// so one instance can serve concurrent requests.
#[derive(Clone)]
pub struct SessionOrchestrator {
    sessions: Arc<dyn SessionStore>,
    resolver: IdentityResolver,
    hasher: Arc<dyn CredentialHasher>,
    tokens: TokenIssuer,
    store_timeout: Duration,
    dummy_hash: Arc<OnceLock<Option<String>>>,
}

impl SessionOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        identities: Arc<dyn IdentityRepository>,
        hasher: Arc<dyn CredentialHasher>,
        tokens: TokenIssuer,
        store_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            resolver: IdentityResolver::new(identities, store_timeout),
            hasher,
            tokens,
            store_timeout,
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    pub fn from_config(
        config: &AuthConfig,
        sessions: Arc<dyn SessionStore>,
        identities: Arc<dyn IdentityRepository>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let hasher = Argon2Hasher::new(config.hash_cost).map_err(|e| ConfigError::Invalid {
            key: "PASSWORD_HASH_MEMORY_KIB",
            reason: e.to_string(),
        })?;
        Ok(Self::new(
            sessions,
            identities,
            Arc::new(hasher),
            config.token_issuer()?,
            config.store_timeout,
        ))
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session flows
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(identity_id = tracing::field::Empty), err(level = "info", Display))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<AuthSession, AuthError> {
        let now = Utc::now();
        let email = normalize_email(email);
        validate_email(&email)?;
        validate_name(name)?;
        check_password_policy(password)?;
        // Cheap rejection before the hash; create_local re-checks under the unique index.
        if self.resolver.find_by_email(&email).await?.is_some() {
            return Err(auth_failure(AuthError::DuplicateEmail));
        }
        let hash = self.hash_password(password).await?;
        let identity = self.resolver.create_local(&email, name, hash, now).await?;
        tracing::Span::current().record("identity_id", tracing::field::display(identity.id));

        match self.open_first_session(&identity, now).await {
            Ok(session) => {
                info!(identity_id = %identity.id, "identity registered");
                Ok(session)
            }
            Err(err) => {
                // Compensate once so the email is not left registered without a session.
                if let Err(cleanup) = self.resolver.delete(identity.id).await {
                    warn!(
                        identity_id = %identity.id,
                        error = %cleanup,
                        "failed to remove identity after registration failure"
                    );
                }
                Err(err)
            }
        }
    }

    #[instrument(skip_all, fields(identity_id = tracing::field::Empty), err(level = "info", Display))]
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let now = Utc::now();
        let Some(identity) = self.resolver.find_by_email(email).await? else {
            self.burn_verification(password).await;
            return Err(auth_failure(AuthError::InvalidCredentials));
        };
        tracing::Span::current().record("identity_id", tracing::field::display(identity.id));

        let Some(hash) = identity.password_hash.clone().filter(|h| !h.is_empty()) else {
            self.burn_verification(password).await;
            return Err(auth_failure(AuthError::FederatedLoginRequired));
        };
        self.verify_password(password, hash)
            .await
            .map_err(auth_failure)?;

        let session = self.open_exclusive_session(&identity, now).await?;
        info!(identity_id = %identity.id, "login succeeded");
        Ok(session)
    }

    /// Log in with a profile already verified by `provider`.
    #[instrument(skip_all, fields(provider = %provider), err(level = "info", Display))]
    pub async fn federated_login(
        &self,
        provider: Provider,
        profile: FederatedProfile,
    ) -> Result<AuthSession, AuthError> {
        let now = Utc::now();
        let (identity, _) = self
            .resolver
            .resolve_federated(provider, &profile, now)
            .await
            .map_err(auth_failure)?;
        self.open_exclusive_session(&identity, now).await
    }

    /// Exchange an authorization code with `provider`, then log in.
    #[instrument(skip_all, fields(provider = %provider.provider()), err(level = "info", Display))]
    pub async fn federated_login_with_code(
        &self,
        provider: &dyn FederatedIdentityProvider,
        code: &str,
    ) -> Result<AuthSession, AuthError> {
        let profile = tokio::time::timeout(self.store_timeout, provider.exchange(code))
            .await
            .map_err(|_| AuthError::Provider(crate::ProviderError::Unavailable("exchange timed out".into())))?
            .map_err(|e| auth_failure(AuthError::Provider(e)))?;
        self.federated_login(provider.provider(), profile).await
    }

    /// Redeem a refresh token for a new pair. Refresh tokens are single-use.
    #[instrument(skip_all, fields(identity_id = tracing::field::Empty), err(level = "info", Display))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        let now = Utc::now();
        let claims = self
            .tokens
            .validate_at(refresh_token, TokenKind::Refresh, now)
            .map_err(|e| auth_failure(AuthError::InvalidRefreshToken(e)))?;
        tracing::Span::current().record("identity_id", tracing::field::display(claims.sub));

        let active = within(
            self.store_timeout,
            "is_session_active",
            self.sessions.is_active(refresh_token, now),
        )
        .await?;
        if !active {
            return Err(auth_failure(AuthError::RevokedOrExpired));
        }

        let Some(identity) = self.resolver.find_by_id(claims.sub).await? else {
            return Err(auth_failure(AuthError::IdentityNotFound));
        };

        let pair = self.issue_pair(&identity, now)?;
        let replacement = Session::new(identity.id, pair.refresh.token.clone(), pair.refresh.expires_at(), now);
        let rotated = within(
            self.store_timeout,
            "rotate_session",
            self.sessions.rotate(refresh_token, replacement, now),
        )
        .await?;
        if !rotated {
            // Lost the race against another redemption of the same token.
            return Err(auth_failure(AuthError::RevokedOrExpired));
        }

        Ok(AuthSession::new(&identity, pair))
    }

    /// Forget one session. Unknown or already-revoked tokens succeed.
    #[instrument(skip_all, err(level = "info", Display))]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let now = Utc::now();
        let was_active = within(
            self.store_timeout,
            "is_session_active",
            self.sessions.is_active(refresh_token, now),
        )
        .await?;
        within(
            self.store_timeout,
            "delete_session",
            self.sessions.delete_by_token(refresh_token),
        )
        .await?;
        info!(was_active, "logout");
        Ok(())
    }

    #[instrument(skip(self), fields(identity_id = %identity_id), err(level = "info", Display))]
    pub async fn logout_all(&self, identity_id: IdentityId) -> Result<(), AuthError> {
        let revoked = within(
            self.store_timeout,
            "revoke_sessions",
            self.sessions.revoke_all_for_identity(identity_id, Utc::now()),
        )
        .await?;
        info!(revoked, "all sessions revoked");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Access tokens
    // ─────────────────────────────────────────────────────────────────────

    /// Stateless: access tokens are not checked against the session store.
    pub fn authenticate(&self, access_token: &str) -> Result<Principal, AuthError> {
        self.tokens
            .validate_at(access_token, TokenKind::Access, Utc::now())
            .map(Principal::from)
            .map_err(|e| auth_failure(AuthError::InvalidAccessToken(e)))
    }

    /// Like [`Self::authenticate`], but absent or bad tokens yield `None`.
    pub fn authenticate_optional(&self, access_token: Option<&str>) -> Option<Principal> {
        let token = access_token?.trim();
        if token.is_empty() {
            return None;
        }
        self.tokens
            .validate_at(token, TokenKind::Access, Utc::now())
            .ok()
            .map(Principal::from)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Identity administration
    // ─────────────────────────────────────────────────────────────────────

    pub async fn get_profile(
        &self,
        principal: &Principal,
        id: IdentityId,
    ) -> Result<Identity, AuthError> {
        require_self_or_admin(principal, id)?;
        self.load(id).await
    }

    #[instrument(skip(self, principal, update), fields(identity_id = %id), err(level = "info", Display))]
    pub async fn update_profile(
        &self,
        principal: &Principal,
        id: IdentityId,
        update: ProfileUpdate,
    ) -> Result<Identity, AuthError> {
        require_self_or_admin(principal, id)?;
        let mut identity = self.load(id).await?;
        let name = update.name.unwrap_or_else(|| identity.name.clone());
        identity.update_profile(&name, update.avatar, Utc::now())?;
        self.resolver.save(identity).await
    }

    /// Replace the password and revoke every session of the identity.
    #[instrument(skip(self, principal, new_password), fields(identity_id = %id), err(level = "info", Display))]
    pub async fn set_password(
        &self,
        principal: &Principal,
        id: IdentityId,
        new_password: &str,
    ) -> Result<(), AuthError> {
        require_self_or_admin(principal, id)?;
        check_password_policy(new_password)?;
        let mut identity = self.load(id).await?;
        let hash = self.hash_password(new_password).await?;
        let now = Utc::now();
        identity.set_password(hash, now)?;
        self.resolver.save(identity).await?;
        self.logout_all(id).await
    }

    /// Admin-only. `limit` outside `1..=100` falls back to 10; negative offsets clamp to 0.
    pub async fn list_identities(
        &self,
        principal: &Principal,
        limit: i64,
        offset: i64,
    ) -> Result<IdentityPage, AuthError> {
        require_role(principal, Role::Admin)?;
        let (limit, offset) = page_bounds(limit, offset);
        let (items, total) = self.resolver.list(limit, offset).await?;
        Ok(IdentityPage {
            items: items.iter().map(Identity::summary).collect(),
            total,
            limit,
            offset,
        })
    }

    #[instrument(skip(self, principal), fields(identity_id = %id), err(level = "info", Display))]
    pub async fn promote(&self, principal: &Principal, id: IdentityId) -> Result<Identity, AuthError> {
        require_role(principal, Role::Admin)?;
        let identity = self.load(id).await?;
        self.resolver.promote(identity, Utc::now()).await
    }

    #[instrument(skip(self, principal), fields(identity_id = %id), err(level = "info", Display))]
    pub async fn demote(&self, principal: &Principal, id: IdentityId) -> Result<Identity, AuthError> {
        require_role(principal, Role::Admin)?;
        let identity = self.load(id).await?;
        self.resolver.demote(identity, Utc::now()).await
    }

    /// Admin-only. Sessions are revoked before the record goes away.
    #[instrument(skip(self, principal), fields(identity_id = %id), err(level = "info", Display))]
    pub async fn delete_identity(&self, principal: &Principal, id: IdentityId) -> Result<(), AuthError> {
        require_role(principal, Role::Admin)?;
        self.load(id).await?;
        self.logout_all(id).await?;
        self.resolver.delete(id).await?;
        info!("identity deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    async fn load(&self, id: IdentityId) -> Result<Identity, AuthError> {
        self.resolver
            .find_by_id(id)
            .await?
            .ok_or(AuthError::IdentityNotFound)
    }

    fn issue_pair(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<warden_auth::TokenPair, AuthError> {
        self.tokens
            .issue_pair_at(identity.id, &identity.email, identity.role, now)
            .map_err(|e| AuthError::internal(e.to_string()))
    }

    async fn open_first_session(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<AuthSession, AuthError> {
        let pair = self.issue_pair(identity, now)?;
        let session = Session::new(identity.id, pair.refresh.token.clone(), pair.refresh.expires_at(), now);
        within(self.store_timeout, "create_session", self.sessions.create(session)).await?;
        Ok(AuthSession::new(identity, pair))
    }

    /// Revoke-then-create as a single store step; a failure aborts the login.
    async fn open_exclusive_session(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<AuthSession, AuthError> {
        let pair = self.issue_pair(identity, now)?;
        let session = Session::new(identity.id, pair.refresh.token.clone(), pair.refresh.expires_at(), now);
        within(
            self.store_timeout,
            "start_exclusive_session",
            self.sessions.start_exclusive(session, now),
        )
        .await?;
        Ok(AuthSession::new(identity, pair))
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::internal(format!("hashing task failed: {e}")))?
            .map_err(AuthError::from)
    }

    async fn verify_password(&self, password: &str, hash: String) -> Result<(), AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::internal(format!("verification task failed: {e}")))?
            .map_err(AuthError::from)
    }

    /// Verify `password` against a throwaway hash and discard the outcome.
    async fn burn_verification(&self, password: &str) {
        let hasher = Arc::clone(&self.hasher);
        let dummy = Arc::clone(&self.dummy_hash);
        let password = password.to_string();
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(hash) = dummy.get_or_init(|| hasher.hash(DUMMY_PASSWORD).ok()) {
                let _ = hasher.verify(&password, hash);
            }
        })
        .await;
    }
}

fn page_bounds(limit: i64, offset: i64) -> (usize, usize) {
    let limit = usize::try_from(limit)
        .ok()
        .filter(|l| (1..=MAX_PAGE_LIMIT).contains(l))
        .unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = usize::try_from(offset.max(0)).unwrap_or(0);
    (limit, offset)
}

/// Log an authentication failure with its internal kind, then return it.
fn auth_failure(err: AuthError) -> AuthError {
    if matches!(err, AuthError::Storage(_) | AuthError::Internal(_)) {
        return err;
    }
    info!(kind = err.kind(), "authentication rejected");
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_fall_back_and_clamp() {
        assert_eq!(page_bounds(0, 0), (DEFAULT_PAGE_LIMIT, 0));
        assert_eq!(page_bounds(101, 5), (DEFAULT_PAGE_LIMIT, 5));
        assert_eq!(page_bounds(-3, -7), (DEFAULT_PAGE_LIMIT, 0));
        assert_eq!(page_bounds(100, 20), (100, 20));
        assert_eq!(page_bounds(1, 0), (1, 0));
    }
}

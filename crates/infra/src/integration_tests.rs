//! Integration tests for the session lifecycle.
//!
//! Tests: Orchestrator -> IdentityResolver -> IdentityRepository / SessionStore
//!
//! Verifies:
//! - Every login leaves exactly one active session for the identity
//! - Refresh tokens are single-use, including under concurrent redemption
//! - Federated logins merge into existing local accounts without losing the password
//! - Rejected requests do no password hashing and are not logged as errors
//! - Storage failures abort flows instead of being ignored

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use warden_auth::{
        Argon2Hasher, CredentialError, CredentialHasher, HashCost, Principal, Provider, Role,
        Session, TokenIssuer, TokenSettings,
    };
    use warden_core::IdentityId;

    use crate::orchestrator::{AuthError, AuthSession, ProfileUpdate, SessionOrchestrator};
    use crate::{
        FederatedProfile, FederatedResolution, IdentityRepository, InMemoryIdentityRepository,
        InMemorySessionStore, SessionStore, StaticFederatedProvider, StoreError,
    };

    const SECRET: &[u8] = b"integration-test-secret-32-bytes!!";

    struct Harness {
        sessions: Arc<InMemorySessionStore>,
        identities: Arc<InMemoryIdentityRepository>,
        orchestrator: SessionOrchestrator,
    }

    fn cheap_hasher() -> Argon2Hasher {
        Argon2Hasher::new(HashCost {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    fn orchestrator_with(
        sessions: Arc<dyn SessionStore>,
        identities: Arc<dyn IdentityRepository>,
        store_timeout: Duration,
    ) -> SessionOrchestrator {
        let tokens = TokenIssuer::new(SECRET, TokenSettings::default()).unwrap();
        SessionOrchestrator::new(sessions, identities, Arc::new(cheap_hasher()), tokens, store_timeout)
    }

    fn harness() -> Harness {
        warden_observability::init_with(&warden_observability::LogConfig {
            default_filter: "warn".to_string(),
            ..Default::default()
        });
        let sessions = Arc::new(InMemorySessionStore::new());
        let identities = Arc::new(InMemoryIdentityRepository::new());
        let orchestrator =
            orchestrator_with(sessions.clone(), identities.clone(), Duration::from_secs(2));
        Harness {
            sessions,
            identities,
            orchestrator,
        }
    }

    async fn active_sessions(store: &InMemorySessionStore, id: IdentityId) -> Vec<Session> {
        let now = Utc::now();
        store
            .find_by_identity(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.is_active(now))
            .collect()
    }

    fn google_profile(external_id: &str, email: &str) -> FederatedProfile {
        FederatedProfile {
            external_id: external_id.into(),
            email: email.into(),
            name: "Google User".into(),
            avatar: Some("https://img/g".into()),
            email_verified: true,
        }
    }

    async fn register_admin(h: &Harness) -> Principal {
        let session = h
            .orchestrator
            .register("admin@x.com", "admin-password", "Admin")
            .await
            .unwrap();
        let mut identity = h.identities.find_by_id(session.identity.id).await.unwrap().unwrap();
        identity.promote(Utc::now()).unwrap();
        h.identities.update(identity.clone()).await.unwrap();
        Principal {
            identity_id: identity.id,
            email: identity.email,
            role: Role::Admin,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn login_supersedes_registration_session() {
        let h = harness();
        let registered = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();
        assert_eq!(registered.token_type, "Bearer");
        assert_eq!(registered.expires_in, 15 * 60);
        assert_eq!(registered.identity.role, Role::User);
        assert_eq!(registered.identity.provider, Provider::Local);

        let logged_in = h.orchestrator.login("u@x.com", "password1").await.unwrap();
        assert_ne!(logged_in.refresh_token, registered.refresh_token);

        let err = h
            .orchestrator
            .refresh(&registered.refresh_token)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::RevokedOrExpired);
    }

    #[tokio::test]
    async fn wrong_password_touches_no_session() {
        let h = harness();
        let registered = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();
        let before = h.sessions.find_by_identity(registered.identity.id).await.unwrap();

        let err = h.orchestrator.login("u@x.com", "wrongpass").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(err.public().code, "INVALID_CREDENTIALS");

        let after = h.sessions.find_by_identity(registered.identity.id).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_identical() {
        let h = harness();
        h.orchestrator.register("u@x.com", "password1", "User").await.unwrap();

        let unknown = h.orchestrator.login("ghost@x.com", "password1").await.unwrap_err();
        let wrong = h.orchestrator.login("u@x.com", "password2").await.unwrap_err();
        assert_eq!(unknown.public(), wrong.public());
    }

    #[tokio::test]
    async fn federated_login_merges_local_account() {
        let h = harness();
        let local = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();

        let federated = h
            .orchestrator
            .federated_login(Provider::google(), google_profile("g1", "u@x.com"))
            .await
            .unwrap();

        assert_eq!(federated.identity.id, local.identity.id);
        assert_eq!(h.identities.count().await.unwrap(), 1);

        let stored = h.identities.find_by_id(local.identity.id).await.unwrap().unwrap();
        assert_eq!(stored.provider, Provider::google());
        assert_eq!(stored.external_id.as_deref(), Some("g1"));
        assert!(stored.has_password());
        assert!(stored.email_verified);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refresh_has_one_winner() {
        let h = harness();
        let registered = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();

        let attempts: Vec<_> = (0..2)
            .map(|_| {
                let orchestrator = h.orchestrator.clone();
                let token = registered.refresh_token.clone();
                tokio::spawn(async move { orchestrator.refresh(&token).await })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert_eq!(err, AuthError::RevokedOrExpired),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(active_sessions(&h.sessions, registered.identity.id).await.len(), 1);
    }

    #[tokio::test]
    async fn logout_all_clears_every_session() {
        let h = harness();
        let registered = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();
        let id = registered.identity.id;

        // Simulate the duplicate-session race by inserting a second live session directly.
        h.orchestrator.login("u@x.com", "password1").await.unwrap();
        let now = Utc::now();
        h.sessions
            .create(Session::new(id, "racing-login", now + chrono::Duration::days(7), now))
            .await
            .unwrap();
        assert_eq!(active_sessions(&h.sessions, id).await.len(), 2);

        h.orchestrator.logout_all(id).await.unwrap();
        assert!(active_sessions(&h.sessions, id).await.is_empty());
        h.orchestrator.logout_all(id).await.unwrap();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session invariants
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn each_login_leaves_exactly_one_active_session() {
        let h = harness();
        let registered = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();

        for _ in 0..3 {
            let session = h.orchestrator.login("u@x.com", "password1").await.unwrap();
            let active = active_sessions(&h.sessions, registered.identity.id).await;
            assert_eq!(active.len(), 1);
            assert_eq!(active[0].token, session.refresh_token);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_logins_still_leave_one_active_session() {
        let h = harness();
        let registered = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();

        let logins: Vec<_> = (0..6)
            .map(|_| {
                let orchestrator = h.orchestrator.clone();
                tokio::spawn(async move { orchestrator.login("u@x.com", "password1").await })
            })
            .collect();
        for login in logins {
            login.await.unwrap().unwrap();
        }

        assert_eq!(active_sessions(&h.sessions, registered.identity.id).await.len(), 1);
    }

    #[tokio::test]
    async fn refresh_tokens_are_single_use() {
        let h = harness();
        let registered = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();

        let rotated = h.orchestrator.refresh(&registered.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, registered.refresh_token);
        assert_eq!(rotated.identity.id, registered.identity.id);

        let replay = h.orchestrator.refresh(&registered.refresh_token).await.unwrap_err();
        assert_eq!(replay, AuthError::RevokedOrExpired);

        h.orchestrator.refresh(&rotated.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn email_uniqueness_ignores_case() {
        let h = harness();
        h.orchestrator.register("A@B.com", "password1", "Ab").await.unwrap();
        let err = h
            .orchestrator
            .register("a@b.com", "password2", "Ab")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::DuplicateEmail);
        assert_eq!(err.public().code, "EMAIL_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn merged_account_can_use_either_login_path() {
        let h = harness();
        h.orchestrator.register("u@x.com", "password1", "User").await.unwrap();
        h.orchestrator
            .federated_login(Provider::google(), google_profile("g1", "u@x.com"))
            .await
            .unwrap();

        let local = h.orchestrator.login("u@x.com", "password1").await.unwrap();
        let federated = h
            .orchestrator
            .federated_login(Provider::google(), google_profile("g1", "u@x.com"))
            .await
            .unwrap();
        assert_eq!(local.identity.id, federated.identity.id);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Edge cases
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pure_federated_account_cannot_use_password_login() {
        let h = harness();
        h.orchestrator
            .federated_login(Provider::google(), google_profile("g1", "fed@x.com"))
            .await
            .unwrap();

        let err = h.orchestrator.login("fed@x.com", "password1").await.unwrap_err();
        assert_eq!(err, AuthError::FederatedLoginRequired);
        assert_eq!(err.public().code, "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn unverified_federated_email_is_rejected() {
        let h = harness();
        let mut profile = google_profile("g1", "u@x.com");
        profile.email_verified = false;
        let err = h
            .orchestrator
            .federated_login(Provider::google(), profile)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::UnverifiedEmail);
        assert_eq!(h.identities.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn federated_code_exchange_feeds_login() {
        let h = harness();
        let provider = StaticFederatedProvider::new(Provider::google())
            .with_profile("code-1", google_profile("g1", "u@x.com"));

        let session = h
            .orchestrator
            .federated_login_with_code(&provider, "code-1")
            .await
            .unwrap();
        assert_eq!(session.identity.provider, Provider::google());

        let err = h
            .orchestrator
            .federated_login_with_code(&provider, "code-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Provider(_)));
    }

    #[tokio::test]
    async fn weak_password_is_rejected_before_any_write() {
        let h = harness();
        let err = h.orchestrator.register("u@x.com", "short", "User").await.unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword(_)));
        assert_eq!(h.identities.count().await.unwrap(), 0);
        assert!(h.sessions.is_empty());
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() {
        let h = harness();
        let session = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();

        let err = h.orchestrator.refresh(&session.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken(_)));
        assert!(h.orchestrator.authenticate(&session.refresh_token).is_err());

        let principal = h.orchestrator.authenticate(&session.access_token).unwrap();
        assert_eq!(principal.identity_id, session.identity.id);
        assert_eq!(principal.role, Role::User);
        assert_eq!(
            h.orchestrator.authenticate_optional(Some(&session.access_token)),
            Some(principal)
        );
        assert_eq!(h.orchestrator.authenticate_optional(None), None);
        assert_eq!(h.orchestrator.authenticate_optional(Some("junk")), None);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let h = harness();
        let session = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();

        h.orchestrator.logout(&session.refresh_token).await.unwrap();
        h.orchestrator.logout(&session.refresh_token).await.unwrap();
        h.orchestrator.logout("never-issued").await.unwrap();

        let err = h.orchestrator.refresh(&session.refresh_token).await.unwrap_err();
        assert_eq!(err, AuthError::RevokedOrExpired);
    }

    #[tokio::test]
    async fn refresh_after_identity_deletion_fails() {
        let h = harness();
        let session = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();
        // Deleted out from under the session, bypassing revocation.
        h.identities.delete(session.identity.id).await.unwrap();

        let err = h.orchestrator.refresh(&session.refresh_token).await.unwrap_err();
        assert_eq!(err, AuthError::IdentityNotFound);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn admin_can_promote_demote_and_delete() {
        let h = harness();
        let admin = register_admin(&h).await;
        let user = h
            .orchestrator
            .register("u@x.com", "password1", "User")
            .await
            .unwrap();
        let user_principal = h.orchestrator.authenticate(&user.access_token).unwrap();
        let id = user.identity.id;

        let err = h.orchestrator.promote(&user_principal, id).await.unwrap_err();
        assert_eq!(err.public().code, "FORBIDDEN");

        assert_eq!(h.orchestrator.promote(&admin, id).await.unwrap().role, Role::Admin);
        assert_eq!(h.orchestrator.promote(&admin, id).await.unwrap_err(), AuthError::AlreadyAdmin);
        assert_eq!(h.orchestrator.demote(&admin, id).await.unwrap().role, Role::User);
        assert_eq!(h.orchestrator.demote(&admin, id).await.unwrap_err(), AuthError::AlreadyUser);

        h.orchestrator.delete_identity(&admin, id).await.unwrap();
        assert!(active_sessions(&h.sessions, id).await.is_empty());
        assert_eq!(
            h.orchestrator.delete_identity(&admin, id).await.unwrap_err(),
            AuthError::IdentityNotFound
        );
        assert_eq!(
            h.orchestrator.refresh(&user.refresh_token).await.unwrap_err(),
            AuthError::RevokedOrExpired
        );
    }

    #[tokio::test]
    async fn profiles_are_owner_or_admin_only() {
        let h = harness();
        let admin = register_admin(&h).await;
        let a = h.orchestrator.register("a@x.com", "password1", "Aa").await.unwrap();
        let b = h.orchestrator.register("b@x.com", "password1", "Bb").await.unwrap();
        let a_principal = h.orchestrator.authenticate(&a.access_token).unwrap();

        let updated = h
            .orchestrator
            .update_profile(
                &a_principal,
                a.identity.id,
                ProfileUpdate {
                    name: Some("  Alice ".into()),
                    avatar: Some("https://img/a".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Alice");
        assert_eq!(updated.avatar.as_deref(), Some("https://img/a"));

        assert!(matches!(
            h.orchestrator.get_profile(&a_principal, b.identity.id).await,
            Err(AuthError::Forbidden(_))
        ));
        assert_eq!(
            h.orchestrator.get_profile(&admin, a.identity.id).await.unwrap().name,
            "Alice"
        );

        let err = h
            .orchestrator
            .update_profile(
                &a_principal,
                a.identity.id,
                ProfileUpdate {
                    name: Some("A".into()),
                    avatar: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn listing_is_admin_only_and_paged() {
        let h = harness();
        let admin = register_admin(&h).await;
        for n in 0..3 {
            h.orchestrator
                .register(&format!("user{n}@x.com"), "password1", "User")
                .await
                .unwrap();
        }

        let page = h.orchestrator.list_identities(&admin, 0, -5).await.unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.limit, 10);
        assert_eq!(page.offset, 0);
        assert_eq!(page.items.len(), 4);

        let page = h.orchestrator.list_identities(&admin, 2, 3).await.unwrap();
        assert_eq!(page.items.len(), 1);

        let user = h.orchestrator.login("user0@x.com", "password1").await.unwrap();
        let user = h.orchestrator.authenticate(&user.access_token).unwrap();
        assert!(matches!(
            h.orchestrator.list_identities(&user, 10, 0).await,
            Err(AuthError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn set_password_revokes_sessions_and_changes_login() {
        let h = harness();
        let session = h.orchestrator.register("u@x.com", "password1", "User").await.unwrap();
        let principal = h.orchestrator.authenticate(&session.access_token).unwrap();

        h.orchestrator
            .set_password(&principal, session.identity.id, "password2")
            .await
            .unwrap();

        assert_eq!(
            h.orchestrator.refresh(&session.refresh_token).await.unwrap_err(),
            AuthError::RevokedOrExpired
        );
        assert_eq!(
            h.orchestrator.login("u@x.com", "password1").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        h.orchestrator.login("u@x.com", "password2").await.unwrap();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Federated sessions
    // ─────────────────────────────────────────────────────────────────────

    async fn assert_single_active(h: &Harness, id: IdentityId, refresh_token: &str) {
        let active = active_sessions(&h.sessions, id).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token, refresh_token);
    }

    #[tokio::test]
    async fn federated_logins_leave_one_active_session() {
        let h = harness();
        let registered = h.orchestrator.register("u@x.com", "password1", "User").await.unwrap();
        let id = registered.identity.id;

        let merged = h
            .orchestrator
            .federated_login(Provider::google(), google_profile("g1", "u@x.com"))
            .await
            .unwrap();
        assert_eq!(merged.identity.id, id);
        assert_single_active(&h, id, &merged.refresh_token).await;

        let linked = h
            .orchestrator
            .federated_login(Provider::google(), google_profile("g1", "u@x.com"))
            .await
            .unwrap();
        assert_single_active(&h, id, &linked.refresh_token).await;

        // Another subject id under the same provider lands on the email owner.
        let other_subject = h
            .orchestrator
            .federated_login(Provider::google(), google_profile("g2", "u@x.com"))
            .await
            .unwrap();
        assert_eq!(other_subject.identity.id, id);
        assert_single_active(&h, id, &other_subject.refresh_token).await;

        for stale in [&registered.refresh_token, &merged.refresh_token, &linked.refresh_token] {
            assert_eq!(
                h.orchestrator.refresh(stale).await.unwrap_err(),
                AuthError::RevokedOrExpired
            );
        }
        h.orchestrator.login("u@x.com", "password1").await.unwrap();
    }

    #[tokio::test]
    async fn repeated_federated_signup_leaves_one_active_session() {
        let h = harness();
        let first = h
            .orchestrator
            .federated_login(Provider::google(), google_profile("g-new", "new@x.com"))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .federated_login(Provider::google(), google_profile("g-new", "new@x.com"))
            .await
            .unwrap();
        assert_eq!(first.identity.id, second.identity.id);
        assert_single_active(&h, second.identity.id, &second.refresh_token).await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Hashing work
    // ─────────────────────────────────────────────────────────────────────

    /// Argon2 hasher that counts its calls.
    struct CountingHasher {
        inner: Argon2Hasher,
        hashes: AtomicUsize,
        verifies: AtomicUsize,
    }

    impl CredentialHasher for CountingHasher {
        fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
            self.hashes.fetch_add(1, Ordering::SeqCst);
            self.inner.hash(plaintext)
        }

        fn verify(&self, plaintext: &str, hash: &str) -> Result<(), CredentialError> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(plaintext, hash)
        }
    }

    fn counting_harness() -> (Harness, Arc<CountingHasher>) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let identities = Arc::new(InMemoryIdentityRepository::new());
        let hasher = Arc::new(CountingHasher {
            inner: cheap_hasher(),
            hashes: AtomicUsize::new(0),
            verifies: AtomicUsize::new(0),
        });
        let tokens = TokenIssuer::new(SECRET, TokenSettings::default()).unwrap();
        let orchestrator = SessionOrchestrator::new(
            sessions.clone(),
            identities.clone(),
            hasher.clone(),
            tokens,
            Duration::from_secs(2),
        );
        let h = Harness {
            sessions,
            identities,
            orchestrator,
        };
        (h, hasher)
    }

    #[tokio::test]
    async fn rejected_registrations_do_not_hash() {
        let (h, hasher) = counting_harness();
        h.orchestrator.register("u@x.com", "password1", "User").await.unwrap();
        assert_eq!(hasher.hashes.load(Ordering::SeqCst), 1);

        let err = h.orchestrator.register(" U@X.com ", "password2", "User").await.unwrap_err();
        assert_eq!(err, AuthError::DuplicateEmail);

        let err = h.orchestrator.register("not-an-email", "password1", "User").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let err = h.orchestrator.register("v@x.com", "password1", "V").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        assert_eq!(hasher.hashes.load(Ordering::SeqCst), 1);
        assert_eq!(h.identities.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn every_failed_login_pays_for_one_verification() {
        let (h, hasher) = counting_harness();
        h.orchestrator.register("u@x.com", "password1", "User").await.unwrap();
        h.orchestrator
            .federated_login(Provider::google(), google_profile("g1", "g@x.com"))
            .await
            .unwrap();
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 0);

        let err = h.orchestrator.login("ghost@x.com", "password1").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 1);

        let err = h.orchestrator.login("g@x.com", "password1").await.unwrap_err();
        assert_eq!(err, AuthError::FederatedLoginRequired);
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 2);

        let err = h.orchestrator.login("u@x.com", "password2").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 3);

        // The throwaway hash is computed once and reused.
        h.orchestrator.login("ghost@x.com", "password1").await.unwrap_err();
        assert_eq!(hasher.hashes.load(Ordering::SeqCst), 2);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Storage failures
    // ─────────────────────────────────────────────────────────────────────

    /// Session store whose writes fail or stall on demand.
    #[derive(Default)]
    struct FaultySessionStore {
        inner: InMemorySessionStore,
        fail_writes: AtomicBool,
        stall_reads: AtomicBool,
    }

    impl FaultySessionStore {
        fn check_write(&self) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::backend("injected write failure"));
            }
            Ok(())
        }

        async fn maybe_stall(&self) {
            if self.stall_reads.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
        }
    }

    #[async_trait]
    impl SessionStore for FaultySessionStore {
        async fn create(&self, session: Session) -> Result<(), StoreError> {
            self.check_write()?;
            self.inner.create(session).await
        }

        async fn find_by_token(&self, token: &str) -> Result<Option<Session>, StoreError> {
            self.maybe_stall().await;
            self.inner.find_by_token(token).await
        }

        async fn find_by_identity(&self, identity_id: IdentityId) -> Result<Vec<Session>, StoreError> {
            self.inner.find_by_identity(identity_id).await
        }

        async fn delete_by_token(&self, token: &str) -> Result<(), StoreError> {
            self.check_write()?;
            self.inner.delete_by_token(token).await
        }

        async fn revoke_all_for_identity(
            &self,
            identity_id: IdentityId,
            now: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            self.check_write()?;
            self.inner.revoke_all_for_identity(identity_id, now).await
        }

        async fn is_active(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
            self.maybe_stall().await;
            self.inner.is_active(token, now).await
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.purge_expired(now).await
        }

        async fn claim(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
            self.check_write()?;
            self.inner.claim(token, now).await
        }

        async fn rotate(
            &self,
            old_token: &str,
            replacement: Session,
            now: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.check_write()?;
            self.inner.rotate(old_token, replacement, now).await
        }

        async fn start_exclusive(&self, session: Session, now: DateTime<Utc>) -> Result<(), StoreError> {
            self.check_write()?;
            self.inner.start_exclusive(session, now).await
        }
    }

    #[tokio::test]
    async fn failed_session_write_compensates_registration() {
        let sessions = Arc::new(FaultySessionStore::default());
        let identities = Arc::new(InMemoryIdentityRepository::new());
        let orchestrator =
            orchestrator_with(sessions.clone(), identities.clone(), Duration::from_secs(2));

        sessions.fail_writes.store(true, Ordering::SeqCst);
        let err = orchestrator.register("u@x.com", "password1", "User").await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(StoreError::Backend(_))));
        assert_eq!(err.public().code, "INTERNAL_ERROR");
        assert!(identities.find_by_email("u@x.com").await.unwrap().is_none());

        sessions.fail_writes.store(false, Ordering::SeqCst);
        orchestrator.register("u@x.com", "password1", "User").await.unwrap();
    }

    #[tokio::test]
    async fn failed_revocation_aborts_login() {
        let sessions = Arc::new(FaultySessionStore::default());
        let identities = Arc::new(InMemoryIdentityRepository::new());
        let orchestrator =
            orchestrator_with(sessions.clone(), identities.clone(), Duration::from_secs(2));
        let registered = orchestrator.register("u@x.com", "password1", "User").await.unwrap();

        sessions.fail_writes.store(true, Ordering::SeqCst);
        let err = orchestrator.login("u@x.com", "password1").await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));

        let remaining = sessions.find_by_identity(registered.identity.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token, registered.refresh_token);
    }

    #[tokio::test]
    async fn stalled_store_times_out() {
        let sessions = Arc::new(FaultySessionStore::default());
        let identities = Arc::new(InMemoryIdentityRepository::new());
        let orchestrator =
            orchestrator_with(sessions.clone(), identities, Duration::from_millis(50));
        let registered = orchestrator.register("u@x.com", "password1", "User").await.unwrap();

        sessions.stall_reads.store(true, Ordering::SeqCst);
        let err = orchestrator.refresh(&registered.refresh_token).await.unwrap_err();
        assert_eq!(err, AuthError::Storage(StoreError::Timeout));

        sessions.stall_reads.store(false, Ordering::SeqCst);
        orchestrator.refresh(&registered.refresh_token).await.unwrap();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Log levels
    // ─────────────────────────────────────────────────────────────────────

    /// Counts ERROR events seen by the thread-local subscriber.
    #[derive(Clone, Default)]
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_errors() -> (ErrorCounter, tracing::subscriber::DefaultGuard) {
        use tracing_subscriber::layer::SubscriberExt;

        let counter = ErrorCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        (counter, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test]
    async fn rejected_logins_are_not_logged_as_errors() {
        let h = harness();
        h.orchestrator.register("u@x.com", "password1", "User").await.unwrap();
        let (errors, _guard) = count_errors();

        h.orchestrator.login("u@x.com", "wrongpass").await.unwrap_err();
        h.orchestrator.login("ghost@x.com", "password1").await.unwrap_err();
        h.orchestrator.refresh("not-a-token").await.unwrap_err();
        h.orchestrator.register("u@x.com", "password1", "User").await.unwrap_err();
        let unverified = FederatedProfile {
            email_verified: false,
            ..google_profile("g1", "g@x.com")
        };
        h.orchestrator
            .federated_login(Provider::google(), unverified)
            .await
            .unwrap_err();

        assert_eq!(errors.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn storage_failures_are_logged_as_errors() {
        let sessions = Arc::new(FaultySessionStore::default());
        let identities = Arc::new(InMemoryIdentityRepository::new());
        let orchestrator =
            orchestrator_with(sessions.clone(), identities, Duration::from_secs(2));
        orchestrator.register("u@x.com", "password1", "User").await.unwrap();
        let (errors, _guard) = count_errors();

        sessions.fail_writes.store(true, Ordering::SeqCst);
        orchestrator.login("u@x.com", "password1").await.unwrap_err();

        assert!(errors.0.load(Ordering::SeqCst) >= 1);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Postgres (runs only with WARDEN_TEST_DATABASE_URL)
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn postgres_lifecycle_matches_in_memory() {
        let Some(pool) = crate::postgres::test_pool().await else {
            return;
        };
        let identities = Arc::new(crate::PostgresIdentityRepository::new(pool.clone()));
        let orchestrator = orchestrator_with(
            Arc::new(crate::PostgresSessionStore::new(pool)),
            identities.clone(),
            Duration::from_secs(5),
        );
        let email = format!("{}@lifecycle.test", IdentityId::new());

        let registered: AuthSession = orchestrator.register(&email, "password1", "Pg").await.unwrap();
        let logged_in = orchestrator.login(&email.to_uppercase(), "password1").await.unwrap();
        assert_eq!(
            orchestrator.refresh(&registered.refresh_token).await.unwrap_err(),
            AuthError::RevokedOrExpired
        );

        let rotated = orchestrator.refresh(&logged_in.refresh_token).await.unwrap();
        assert_eq!(
            orchestrator.refresh(&logged_in.refresh_token).await.unwrap_err(),
            AuthError::RevokedOrExpired
        );

        let (merged, how) = orchestrator
            .resolver()
            .resolve_federated(
                Provider::google(),
                &google_profile(&format!("g-{}", IdentityId::new()), &email),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(how, FederatedResolution::Merged);
        assert!(merged.has_password());

        orchestrator.logout(&rotated.refresh_token).await.unwrap();
        orchestrator.logout_all(merged.id).await.unwrap();

        // The identity row goes away underneath a live session.
        let orphaned = orchestrator.login(&email, "password1").await.unwrap();
        identities.delete(merged.id).await.unwrap();
        assert_eq!(
            orchestrator.refresh(&orphaned.refresh_token).await.unwrap_err(),
            AuthError::IdentityNotFound
        );
        orchestrator.logout(&orphaned.refresh_token).await.unwrap();
    }
}

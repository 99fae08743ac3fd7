//! `warden-auth`: pure authentication/authorization domain.
//!
//! Identities, sessions, token claims, token signing, password hashing and
//! role checks. Storage and transport live elsewhere.

pub mod authorize;
pub mod claims;
pub mod identity;
pub mod password;
pub mod principal;
pub mod roles;
pub mod session;
pub mod token;

pub use authorize::{AuthzError, require_role, require_self_or_admin};
pub use claims::{TokenClaims, TokenError, TokenKind, validate_claims};
pub use identity::{
    Identity, IdentityError, IdentitySummary, Provider, normalize_email, validate_email,
    validate_name,
};
pub use password::{
    Argon2Hasher, CredentialError, CredentialHasher, HashCost, check_password_policy,
};
pub use principal::Principal;
pub use roles::Role;
pub use session::{REVOCATION_BACKDATE, Session};
pub use token::{IssuedToken, TokenIssuer, TokenPair, TokenSettings};

//! Identity (user account) records, local or federated.
//!
//! An identity is created by registration or by a first federated login and is
//! mutated afterwards only through the methods on [`Identity`], which keep the
//! record's invariants intact:
//! - the email is trimmed, lowercased and syntactically plausible;
//! - a `LOCAL` identity always carries a password hash;
//! - a federated identity always carries a provider-assigned external id;
//! - role transitions are only `USER <-> ADMIN`.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warden_core::{DomainError, DomainResult, IdentityId};

use crate::Role;

pub const EMAIL_MIN_LEN: usize = 6;
pub const EMAIL_MAX_LEN: usize = 255;
pub const NAME_MIN_LEN: usize = 2;
pub const NAME_MAX_LEN: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication provider an identity is linked to.
///
/// `Local` means password authentication. Federated providers are named
/// (`GOOGLE`, `GITHUB`, ...) and the set is open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Provider {
    #[default]
    Local,
    Federated(String),
}

impl Provider {
    /// Build a federated provider from a name, normalised to uppercase.
    ///
    /// `"local"` is rejected: the local provider is not federated.
    pub fn federated(name: &str) -> DomainResult<Self> {
        match name.parse::<Provider>()? {
            Provider::Local => Err(DomainError::validation(
                "LOCAL is not a federated provider",
            )),
            federated => Ok(federated),
        }
    }

    pub fn google() -> Self {
        Provider::Federated("GOOGLE".to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Provider::Local => "LOCAL",
            Provider::Federated(name) => name,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Provider::Local)
    }
}

impl core::fmt::Display for Provider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_uppercase();
        if name.is_empty() {
            return Err(DomainError::validation("provider name is required"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(DomainError::validation(format!(
                "provider name '{name}' contains invalid characters"
            )));
        }
        if name == "LOCAL" {
            Ok(Provider::Local)
        } else {
            Ok(Provider::Federated(name))
        }
    }
}

impl From<Provider> for String {
    fn from(value: Provider) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for Provider {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Trim and lowercase an email. All lookups and writes go through this.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Syntactic email check applied to an already normalised email.
pub fn validate_email(email: &str) -> DomainResult<()> {
    let len = email.chars().count();
    if !(EMAIL_MIN_LEN..=EMAIL_MAX_LEN).contains(&len) {
        return Err(DomainError::validation(format!(
            "email must be between {EMAIL_MIN_LEN} and {EMAIL_MAX_LEN} characters"
        )));
    }
    if !email.contains('@') || !email.contains('.') {
        return Err(DomainError::validation("email is malformed"));
    }
    Ok(())
}

/// Display names are trimmed and must be 2..=100 characters.
pub fn validate_name(name: &str) -> DomainResult<String> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(DomainError::validation(format!(
            "name must be between {NAME_MIN_LEN} and {NAME_MAX_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("identity is already an admin")]
    AlreadyAdmin,

    #[error("identity is already a regular user")]
    AlreadyUser,

    #[error("a password cannot be set on a federated-only identity")]
    PasswordNotAllowed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    pub email: String,
    /// PHC-formatted password hash. Absent for pure federated accounts.
    pub password_hash: Option<String>,
    pub name: String,
    pub role: Role,
    pub provider: Provider,
    /// Provider-assigned external id; required when `provider` is federated.
    pub external_id: Option<String>,
    pub avatar: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Hand-written so password hashes stay out of logs.
impl core::fmt::Debug for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "<redacted>"))
            .field("name", &self.name)
            .field("role", &self.role)
            .field("provider", &self.provider)
            .field("external_id", &self.external_id)
            .field("avatar", &self.avatar)
            .field("email_verified", &self.email_verified)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Identity {
    /// A fresh password-authenticated identity with role `USER`.
    pub fn new_local(
        email: &str,
        name: &str,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<Self, IdentityError> {
        let identity = Self {
            id: IdentityId::new(),
            email: normalize_email(email),
            password_hash: Some(password_hash),
            name: validate_name(name)?,
            role: Role::User,
            provider: Provider::Local,
            external_id: None,
            avatar: None,
            email_verified: false,
            created_at: now,
            updated_at: now,
        };
        identity.validate()?;
        Ok(identity)
    }

    /// A fresh federated identity. Providers pre-verify email, so the flag is set.
    pub fn new_federated(
        email: &str,
        name: &str,
        provider: Provider,
        external_id: &str,
        avatar: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, IdentityError> {
        let identity = Self {
            id: IdentityId::new(),
            email: normalize_email(email),
            password_hash: None,
            name: federated_display_name(name, email),
            role: Role::User,
            provider,
            external_id: Some(external_id.trim().to_string()),
            avatar: avatar.filter(|a| !a.trim().is_empty()),
            email_verified: true,
            created_at: now,
            updated_at: now,
        };
        identity.validate()?;
        Ok(identity)
    }

    pub fn validate(&self) -> Result<(), IdentityError> {
        validate_email(&self.email)?;
        match &self.provider {
            Provider::Local => {
                if self.password_hash.as_deref().is_none_or(str::is_empty) {
                    return Err(DomainError::invariant(
                        "a LOCAL identity requires a password hash",
                    )
                    .into());
                }
            }
            Provider::Federated(_) => {
                if self.external_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
                    return Err(DomainError::invariant(
                        "a federated identity requires an external provider id",
                    )
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.as_deref().is_some_and(|h| !h.is_empty())
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Attach federated linkage to this identity.
    ///
    /// Password and role are kept, so a merged local account can still log in
    /// with its password. The federated avatar is adopted only when none is set.
    pub fn link_provider(
        &mut self,
        provider: Provider,
        external_id: &str,
        avatar: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        if provider.is_local() {
            return Err(DomainError::validation("cannot link the LOCAL provider").into());
        }
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(DomainError::validation("external provider id is required").into());
        }

        self.provider = provider;
        self.external_id = Some(external_id.to_string());
        if self.avatar.is_none() {
            self.avatar = avatar.filter(|a| !a.trim().is_empty());
        }
        self.email_verified = true;
        self.updated_at = now;
        Ok(())
    }

    pub fn promote(&mut self, now: DateTime<Utc>) -> Result<(), IdentityError> {
        if self.role == Role::Admin {
            return Err(IdentityError::AlreadyAdmin);
        }
        self.role = Role::Admin;
        self.updated_at = now;
        Ok(())
    }

    pub fn demote(&mut self, now: DateTime<Utc>) -> Result<(), IdentityError> {
        if self.role == Role::User {
            return Err(IdentityError::AlreadyUser);
        }
        self.role = Role::User;
        self.updated_at = now;
        Ok(())
    }

    /// Change the display name and, when given, the avatar.
    pub fn update_profile(
        &mut self,
        name: &str,
        avatar: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        self.name = validate_name(name)?;
        if let Some(avatar) = avatar {
            let avatar = avatar.trim();
            self.avatar = (!avatar.is_empty()).then(|| avatar.to_string());
        }
        self.updated_at = now;
        Ok(())
    }

    /// Replace the password hash. Pure federated identities have no local
    /// credential to replace.
    pub fn set_password(
        &mut self,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        if !self.provider.is_local() && !self.has_password() {
            return Err(IdentityError::PasswordNotAllowed);
        }
        if password_hash.is_empty() {
            return Err(DomainError::validation("password hash is empty").into());
        }
        self.password_hash = Some(password_hash);
        self.updated_at = now;
        Ok(())
    }

    pub fn summary(&self) -> IdentitySummary {
        IdentitySummary::from(self)
    }
}

/// Providers sometimes omit the display name; fall back to the mailbox part.
fn federated_display_name(name: &str, email: &str) -> String {
    match validate_name(name) {
        Ok(name) => name,
        Err(_) => {
            let local = email.trim().split('@').next().unwrap_or_default();
            let mut fallback: String = local.chars().take(NAME_MAX_LEN).collect();
            while fallback.chars().count() < NAME_MIN_LEN {
                fallback.push('_');
            }
            fallback
        }
    }
}

/// Identity view safe to hand to callers (no credential material).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub id: IdentityId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub provider: Provider,
    pub avatar: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Identity> for IdentitySummary {
    fn from(value: &Identity) -> Self {
        Self {
            id: value.id,
            email: value.email.clone(),
            name: value.name.clone(),
            role: value.role,
            provider: value.provider.clone(),
            avatar: value.avatar.clone(),
            email_verified: value.email_verified,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

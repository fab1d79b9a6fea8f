//! Access credentials: the share URL and 5-digit access code pair.
//!
//! A credential moves through a small state machine:
//!
//! ```text
//! Absent --issue/rotate--> Active --rotate--> Active (new code)
//!                          Active --deactivate--> Inactive
//!                        Inactive --issue/rotate--> Active (new code)
//! ```
//!
//! Every transition is a single atomic document update, so a validator sees
//! either the old code or the new one, never both and never neither.
//! `validate` only reads.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::SharingConfig;
use crate::error::{Error, Result};
use crate::identity::OwnerId;
use crate::storage::{Change, Collection, DocumentStore};

/// Smallest access code.
pub const ACCESS_CODE_MIN: u32 = 10_000;

/// Largest access code.
pub const ACCESS_CODE_MAX: u32 = 99_999;

/// Path segment that share URLs are served under.
pub const SHARE_PATH: &str = "medical-info";

/// A 5-digit access code in `10000..=99999`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessCode(String);

impl AccessCode {
    /// Parse a code supplied by a caller.
    ///
    /// Surrounding whitespace is trimmed; nothing else is normalized.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` unless the code is exactly five ASCII digits
    /// without a leading zero.
    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim();
        if code.len() != 5 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_input("access code must be exactly 5 digits"));
        }
        if code.starts_with('0') {
            return Err(Error::invalid_input("access code cannot start with 0"));
        }
        Ok(Self(code.to_string()))
    }

    /// Draw a code uniformly from `10000..=99999`.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen_range(ACCESS_CODE_MIN..=ACCESS_CODE_MAX).to_string())
    }

    /// Keep drawing until the code differs from `previous`.
    pub fn generate_distinct(
        previous: Option<&AccessCode>,
        mut draw: impl FnMut() -> AccessCode,
    ) -> Self {
        loop {
            let code = draw();
            if previous != Some(&code) {
                return code;
            }
            debug!("Re-rolling access code that repeated its predecessor");
        }
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(&self) -> blake3::Hash {
        blake3::hash(self.0.as_bytes())
    }
}

impl std::fmt::Debug for AccessCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessCode(*****)")
    }
}

impl std::fmt::Display for AccessCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AccessCode> for String {
    fn from(code: AccessCode) -> Self {
        code.0
    }
}

/// Random hex token that a share URL is built on.
fn generate_share_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

fn is_share_token(token: &str) -> bool {
    !token.is_empty() && token.len() <= 128 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// An owner's credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCredential {
    /// The owner whose profile this credential opens.
    pub owner_id: String,
    /// The current access code.
    pub access_code: AccessCode,
    /// Stable random token embedded in the share URL.
    pub share_token: String,
    /// The URL a QR code should encode.
    pub share_url: String,
    /// When the current code was issued.
    pub created_at: DateTime<Utc>,
    /// Inactive credentials reject every validation attempt.
    pub is_active: bool,
}

impl AccessCredential {
    fn from_document(document: &Value) -> Result<Self> {
        Ok(serde_json::from_value(document.clone())?)
    }
}

/// Result of checking an access code. Denial is a normal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Whether access is granted.
    pub granted: bool,
}

impl ValidationOutcome {
    /// Access granted.
    pub const GRANTED: Self = Self { granted: true };
    /// Access denied.
    pub const DENIED: Self = Self { granted: false };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Issue,
    Rotate,
}

/// Issues, rotates, deactivates and validates access credentials.
#[derive(Debug, Clone)]
pub struct CredentialManager<S> {
    store: S,
    base_url: String,
    token_bytes: usize,
}

impl<S: DocumentStore> CredentialManager<S> {
    /// Create a manager over a document store.
    pub fn new(store: S, sharing: &SharingConfig) -> Self {
        Self {
            store,
            base_url: sharing.base_url.trim().trim_end_matches('/').to_string(),
            token_bytes: sharing.token_bytes,
        }
    }

    /// The share URL for a token.
    #[must_use]
    pub fn share_url(&self, share_token: &str) -> String {
        format!("{}/{SHARE_PATH}/{share_token}", self.base_url)
    }

    /// Load the owner's current credential.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if none was ever issued.
    pub async fn get_credential(&self, owner_id: &OwnerId) -> Result<AccessCredential> {
        self.load(owner_id.as_str())
            .await?
            .ok_or_else(|| Error::credential_not_found(owner_id.as_str()))
    }

    /// Issue a credential, or return the active one unchanged.
    ///
    /// An inactive credential is reactivated with a fresh code.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store fails.
    pub async fn issue(&self, owner_id: &OwnerId) -> Result<AccessCredential> {
        self.transition(owner_id, Transition::Issue).await
    }

    /// Replace the access code, creating the credential first if needed.
    ///
    /// The old code stops validating in the same write that makes the new
    /// one valid.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store fails.
    pub async fn rotate(&self, owner_id: &OwnerId) -> Result<AccessCredential> {
        self.transition(owner_id, Transition::Rotate).await
    }

    /// Deactivate the owner's credential.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no credential exists, or a persistence error.
    pub async fn deactivate(&self, owner_id: &OwnerId) -> Result<()> {
        let owner = owner_id.as_str().to_string();
        self.store
            .update(Collection::AccessCredentials, owner_id.as_str(), move |current| {
                let Some(document) = current else {
                    return Err(Error::credential_not_found(owner));
                };
                let mut credential = AccessCredential::from_document(document)?;
                if !credential.is_active {
                    return Ok(Change::Keep);
                }
                credential.is_active = false;
                Ok(Change::Replace(serde_json::to_value(&credential)?))
            })
            .await?;

        info!(owner_id = %owner_id, "Deactivated access credential");
        Ok(())
    }

    /// Check a supplied code against the owner's credential.
    ///
    /// Malformed codes are rejected before the store is touched. Otherwise
    /// the answer has the same shape whether or not the owner exists, and
    /// the comparison runs over BLAKE3 digests in constant time.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed code, or a persistence error.
    pub async fn validate(&self, owner_id: &OwnerId, supplied: &str) -> Result<ValidationOutcome> {
        let supplied = AccessCode::parse(supplied)?;
        let credential = self.load(owner_id.as_str()).await?;
        let outcome = check_code(credential.as_ref(), &supplied);

        debug!(owner_id = %owner_id, granted = outcome.granted, "Validated access code");
        Ok(outcome)
    }

    /// Map a share token back to the owner it belongs to.
    ///
    /// Unknown or malformed tokens resolve to `None`.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store fails.
    pub async fn resolve_share_token(&self, share_token: &str) -> Result<Option<OwnerId>> {
        if !is_share_token(share_token) {
            return Ok(None);
        }

        let Some(entry) = self.store.get(Collection::ShareTokens, share_token).await? else {
            return Ok(None);
        };
        let Some(owner) = entry.get("ownerId").and_then(Value::as_str) else {
            warn!("Share token index entry without an owner");
            self.store.delete(Collection::ShareTokens, share_token).await?;
            return Ok(None);
        };

        // The credential has the final say on which token is current.
        // Entries it no longer backs are pruned here.
        match self.load(owner).await? {
            Some(credential) if credential.share_token == share_token => {
                Ok(Some(OwnerId::from_stored(owner)))
            }
            _ => {
                debug!(owner_id = %owner, "Dropping stale share token entry");
                self.store.delete(Collection::ShareTokens, share_token).await?;
                Ok(None)
            }
        }
    }

    /// Remove the owner's credential and its share token.
    ///
    /// Returns `true` if a credential existed.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store fails.
    pub async fn revoke(&self, owner_id: &OwnerId) -> Result<bool> {
        let Some(credential) = self.load(owner_id.as_str()).await? else {
            return Ok(false);
        };

        self.store
            .delete(Collection::AccessCredentials, owner_id.as_str())
            .await?;
        self.store
            .delete(Collection::ShareTokens, &credential.share_token)
            .await?;

        info!(owner_id = %owner_id, "Revoked access credential");
        Ok(true)
    }

    async fn load(&self, owner_id: &str) -> Result<Option<AccessCredential>> {
        self.store
            .get(Collection::AccessCredentials, owner_id)
            .await?
            .map(|document| self.with_share_url(&document))
            .transpose()
    }

    fn with_share_url(&self, document: &Value) -> Result<AccessCredential> {
        let mut credential = AccessCredential::from_document(document)?;
        credential.share_url = self.share_url(&credential.share_token);
        Ok(credential)
    }

    async fn transition(
        &self,
        owner_id: &OwnerId,
        transition: Transition,
    ) -> Result<AccessCredential> {
        let owner = owner_id.as_str().to_string();
        let fresh_token = generate_share_token(self.token_bytes);
        let fresh_url = self.share_url(&fresh_token);

        let stored = self
            .store
            .update(Collection::AccessCredentials, owner_id.as_str(), move |current| {
                let current = current.map(AccessCredential::from_document).transpose()?;

                if transition == Transition::Issue {
                    if let Some(credential) = &current {
                        if credential.is_active {
                            return Ok(Change::Keep);
                        }
                    }
                }

                let previous = current.as_ref().map(|c| &c.access_code);
                let access_code =
                    AccessCode::generate_distinct(previous, || AccessCode::generate(&mut OsRng));
                let (share_token, share_url) = match current {
                    Some(credential) => (credential.share_token, credential.share_url),
                    None => (fresh_token, fresh_url),
                };

                let credential = AccessCredential {
                    owner_id: owner,
                    access_code,
                    share_token,
                    share_url,
                    created_at: Utc::now(),
                    is_active: true,
                };
                Ok(Change::Replace(serde_json::to_value(&credential)?))
            })
            .await?
            .ok_or_else(|| Error::internal("credential missing after update"))?;

        let credential = self.with_share_url(&stored)?;
        self.index_share_token(&credential).await?;

        match transition {
            Transition::Issue => info!(owner_id = %owner_id, "Issued access credential"),
            Transition::Rotate => info!(owner_id = %owner_id, "Rotated access code"),
        }
        Ok(credential)
    }

    async fn index_share_token(&self, credential: &AccessCredential) -> Result<()> {
        let entry = json!({ "ownerId": credential.owner_id });
        let indexed = self
            .store
            .get(Collection::ShareTokens, &credential.share_token)
            .await?;
        if indexed.as_ref() != Some(&entry) {
            self.store
                .put(Collection::ShareTokens, &credential.share_token, &entry)
                .await?;
        }
        Ok(())
    }
}

/// Compare a supplied code with a credential without short-circuiting.
///
/// A missing credential is compared against a decoy digest so the work done
/// does not depend on whether the owner exists.
fn check_code(credential: Option<&AccessCredential>, supplied: &AccessCode) -> ValidationOutcome {
    let (expected, active) = match credential {
        Some(credential) => (credential.access_code.digest(), credential.is_active),
        None => (blake3::hash(b"safetid:absent-credential"), false),
    };
    // blake3::Hash equality is constant-time
    let matches = supplied.digest() == expected;
    ValidationOutcome {
        granted: matches & active,
    }
}

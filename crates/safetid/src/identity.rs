//! Owner identity types.
//!
//! The sign-in flow lives outside this crate. An identity provider hands us
//! an opaque, stable owner id plus optional display metadata; the owner id is
//! passed explicitly into every profile and credential operation.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::IdentityConfig;
use crate::error::{Error, Result};

/// A validated owner identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// The owner id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an id read back from our own storage, which was validated on the way in.
    pub(crate) fn from_stored(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OwnerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parses raw owner ids coming from the identity provider.
#[derive(Debug, Clone)]
pub struct OwnerIdPolicy {
    pattern: Regex,
}

impl OwnerIdPolicy {
    /// Build a policy from the identity configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` if the configured pattern is not a valid regex.
    pub fn from_config(config: &IdentityConfig) -> Result<Self> {
        let pattern =
            Regex::new(&config.owner_id_pattern).map_err(|e| Error::ConfigValidation {
                message: format!("invalid owner id pattern: {e}"),
            })?;
        Ok(Self { pattern })
    }

    /// Validate a raw owner id.
    ///
    /// Surrounding whitespace is trimmed before matching.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the id is empty or does not match the pattern.
    pub fn parse(&self, raw: &str) -> Result<OwnerId> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_input("owner id must not be empty"));
        }
        if !self.pattern.is_match(trimmed) {
            return Err(Error::invalid_input("owner id has an unsupported format"));
        }
        Ok(OwnerId(trimmed.to_string()))
    }
}

impl Default for OwnerIdPolicy {
    fn default() -> Self {
        Self {
            pattern: Regex::new(&IdentityConfig::default().owner_id_pattern)
                .expect("default owner id pattern is valid"),
        }
    }
}

/// The signed-in owner as reported by the identity provider.
///
/// Everything except `owner_id` is presentation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerIdentity {
    /// Stable owner id.
    pub owner_id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Avatar image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl OwnerIdentity {
    /// An identity with no display metadata.
    #[must_use]
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            display_name: None,
            email: None,
            avatar_url: None,
        }
    }

    /// Attach a display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

//! Medical profiles and the profile store.
//!
//! A profile is overwritten wholesale on every save. The store stamps
//! `lastUpdated` and a write `version`; callers never supply either. Passing
//! an expected version turns the save into a compare-and-swap so a stale
//! device cannot silently clobber a newer write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identity::{OwnerId, OwnerIdentity};
use crate::storage::{Change, Collection, DocumentStore};

/// ABO/Rh blood group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BloodType {
    /// A positive.
    #[serde(rename = "A+")]
    APositive,
    /// A negative.
    #[serde(rename = "A-")]
    ANegative,
    /// B positive.
    #[serde(rename = "B+")]
    BPositive,
    /// B negative.
    #[serde(rename = "B-")]
    BNegative,
    /// AB positive.
    #[serde(rename = "AB+")]
    AbPositive,
    /// AB negative.
    #[serde(rename = "AB-")]
    AbNegative,
    /// O positive.
    #[serde(rename = "O+")]
    OPositive,
    /// O negative.
    #[serde(rename = "O-")]
    ONegative,
}

impl BloodType {
    /// All eight blood types.
    pub const ALL: [Self; 8] = [
        Self::APositive,
        Self::ANegative,
        Self::BPositive,
        Self::BNegative,
        Self::AbPositive,
        Self::AbNegative,
        Self::OPositive,
        Self::ONegative,
    ];

    /// The conventional label, e.g. `AB-`.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::APositive => "A+",
            Self::ANegative => "A-",
            Self::BPositive => "B+",
            Self::BNegative => "B-",
            Self::AbPositive => "AB+",
            Self::AbNegative => "AB-",
            Self::OPositive => "O+",
            Self::ONegative => "O-",
        }
    }
}

impl std::fmt::Display for BloodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Personal and emergency-contact details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalInfo {
    /// Full name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Date of birth as entered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    /// Blood type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_type: Option<BloodType>,
    /// Height in centimetres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Weight in kilograms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Emergency contact name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
    /// Emergency contact phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_phone: Option<String>,
}

/// The caller-editable part of a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileFields {
    /// Personal information.
    pub personal_info: PersonalInfo,
    /// Known medical conditions.
    pub medical_conditions: String,
    /// Current medications.
    pub medications: String,
    /// Allergies.
    pub allergies: String,
    /// Anything else a responder should know.
    pub additional_notes: String,
}

/// A stored medical profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalProfile {
    /// The owner this profile belongs to.
    pub owner_id: String,
    /// Editable fields.
    #[serde(flatten)]
    pub fields: ProfileFields,
    /// When the store last wrote this profile.
    pub last_updated: DateTime<Utc>,
    /// Write counter, starting at 1.
    pub version: u64,
}

impl MedicalProfile {
    fn from_document(document: &Value) -> Result<Self> {
        Ok(serde_json::from_value(document.clone())?)
    }
}

/// Owner-keyed persistence for medical profiles.
#[derive(Debug, Clone)]
pub struct ProfileStore<S> {
    store: S,
}

impl<S: DocumentStore> ProfileStore<S> {
    /// Create a profile store over a document store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Fetch the profile for an owner.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the owner has never saved a profile, or a
    /// persistence error if the store fails.
    pub async fn get_profile(&self, owner_id: &OwnerId) -> Result<MedicalProfile> {
        let document = self
            .store
            .get(Collection::MedicalProfiles, owner_id.as_str())
            .await?
            .ok_or_else(|| Error::profile_not_found(owner_id.as_str()))?;
        MedicalProfile::from_document(&document)
    }

    /// Overwrite the owner's profile with `fields`.
    ///
    /// With `expected_version` set, the write only happens if the stored
    /// version matches (`0` meaning "no profile yet"). Returns the record as
    /// stored, including the stamped `last_updated` and `version`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` on a version mismatch, or a persistence error if
    /// the store fails.
    pub async fn save_profile(
        &self,
        owner_id: &OwnerId,
        fields: ProfileFields,
        expected_version: Option<u64>,
    ) -> Result<MedicalProfile> {
        let owner = owner_id.as_str().to_string();

        let stored = self
            .store
            .update(Collection::MedicalProfiles, owner_id.as_str(), move |current| {
                let current_version = current
                    .and_then(|doc| doc.get("version"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);

                if let Some(expected) = expected_version {
                    if expected != current_version {
                        return Err(Error::Conflict {
                            owner_id: owner.clone(),
                            expected,
                            actual: current_version,
                        });
                    }
                }

                let profile = MedicalProfile {
                    owner_id: owner,
                    fields,
                    last_updated: Utc::now(),
                    version: current_version + 1,
                };
                Ok(Change::Replace(serde_json::to_value(&profile)?))
            })
            .await?
            .ok_or_else(|| Error::internal("profile missing after save"))?;

        let profile = MedicalProfile::from_document(&stored)?;
        info!(owner_id = %owner_id, version = profile.version, "Saved medical profile");
        Ok(profile)
    }

    /// Delete the owner's profile. Returns `true` if one existed.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store fails.
    pub async fn delete_profile(&self, owner_id: &OwnerId) -> Result<bool> {
        let deleted = self
            .store
            .delete(Collection::MedicalProfiles, owner_id.as_str())
            .await?;
        debug!(owner_id = %owner_id, deleted, "Deleted medical profile");
        Ok(deleted)
    }
}

/// An empty, unsaved profile for a newly signed-in owner.
///
/// The full name is prefilled from the identity's display name.
#[must_use]
pub fn draft_profile(identity: &OwnerIdentity) -> ProfileFields {
    ProfileFields {
        personal_info: PersonalInfo {
            full_name: identity.display_name.clone(),
            ..PersonalInfo::default()
        },
        ..ProfileFields::default()
    }
}

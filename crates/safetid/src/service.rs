//! The access service: profile store and credential manager over one store.
//!
//! This is what the HTTP API and the CLI call into. It also owns the
//! provider-side flow: scan a share URL, enter the access code, read the
//! profile.

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::credential::{AccessCode, CredentialManager};
use crate::error::Result;
use crate::identity::{OwnerId, OwnerIdPolicy};
use crate::profile::{MedicalProfile, ProfileStore};
use crate::storage::DocumentStore;

/// What a provider sees after presenting a share token and code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedView {
    /// Whether the code was accepted.
    pub granted: bool,
    /// The owner's profile, when granted and one has been saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<MedicalProfile>,
}

impl SharedView {
    fn denied() -> Self {
        Self {
            granted: false,
            profile: None,
        }
    }
}

/// What an account deletion removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeletion {
    /// A profile existed and was deleted.
    pub profile_deleted: bool,
    /// A credential existed and was revoked.
    pub credential_revoked: bool,
}

/// Profile and credential operations for every owner.
#[derive(Debug, Clone)]
pub struct AccessService<S> {
    profiles: ProfileStore<S>,
    credentials: CredentialManager<S>,
    owner_ids: OwnerIdPolicy,
}

impl<S: DocumentStore + Clone> AccessService<S> {
    /// Build the service over a document store.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` if the owner id pattern does not compile.
    pub fn new(store: S, config: &Config) -> Result<Self> {
        Ok(Self {
            profiles: ProfileStore::new(store.clone()),
            credentials: CredentialManager::new(store, &config.sharing),
            owner_ids: OwnerIdPolicy::from_config(&config.identity)?,
        })
    }

    /// The profile store.
    pub fn profiles(&self) -> &ProfileStore<S> {
        &self.profiles
    }

    /// The credential manager.
    pub fn credentials(&self) -> &CredentialManager<S> {
        &self.credentials
    }

    /// Validate a raw owner id from a request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the id does not match the configured pattern.
    pub fn owner_id(&self, raw: &str) -> Result<OwnerId> {
        self.owner_ids.parse(raw)
    }

    /// Open an owner's profile with a share token and access code.
    ///
    /// An unknown token, a wrong code and an inactive credential all give
    /// the same denied view.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed code (before any lookup), or a
    /// persistence error.
    pub async fn open_shared_profile(&self, share_token: &str, code: &str) -> Result<SharedView> {
        let code = AccessCode::parse(code)?;

        let Some(owner_id) = self.credentials.resolve_share_token(share_token).await? else {
            return Ok(SharedView::denied());
        };

        let outcome = self.credentials.validate(&owner_id, code.as_str()).await?;
        if !outcome.granted {
            return Ok(SharedView::denied());
        }

        let profile = match self.profiles.get_profile(&owner_id).await {
            Ok(profile) => Some(profile),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        info!(owner_id = %owner_id, "Shared profile opened");
        Ok(SharedView {
            granted: true,
            profile,
        })
    }

    /// Remove everything stored for an owner.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store fails.
    pub async fn delete_account(&self, owner_id: &OwnerId) -> Result<AccountDeletion> {
        let credential_revoked = self.credentials.revoke(owner_id).await?;
        let profile_deleted = self.profiles.delete_profile(owner_id).await?;

        info!(
            owner_id = %owner_id,
            profile_deleted, credential_revoked, "Deleted account data"
        );
        Ok(AccountDeletion {
            profile_deleted,
            credential_revoked,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::error::Error;
    use crate::profile::ProfileFields;
    use crate::storage::{Change, Collection, Storage};

    fn create_service() -> AccessService<Arc<Storage>> {
        AccessService::new(
            Arc::new(Storage::open_in_memory().unwrap()),
            &Config::default(),
        )
        .unwrap()
    }

    fn fields() -> ProfileFields {
        ProfileFields {
            allergies: "Peanuts".to_string(),
            ..ProfileFields::default()
        }
    }

    /// A store that fails every call once `broken` is set.
    #[derive(Debug, Clone)]
    struct FlakyStore {
        inner: Arc<Storage>,
        broken: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: Arc::new(Storage::open_in_memory().unwrap()),
                broken: Arc::new(AtomicBool::new(false)),
            }
        }

        fn check(&self) -> Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(Error::Persistence(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                    Some("disk I/O error".to_string()),
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>> {
            self.check()?;
            self.inner.get(collection, key).await
        }

        async fn put(&self, collection: Collection, key: &str, document: &Value) -> Result<()> {
            self.check()?;
            self.inner.put(collection, key, document).await
        }

        async fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
            self.check()?;
            self.inner.delete(collection, key).await
        }

        async fn update<F>(
            &self,
            collection: Collection,
            key: &str,
            apply: F,
        ) -> Result<Option<Value>>
        where
            F: FnOnce(Option<&Value>) -> Result<Change> + Send,
        {
            self.check()?;
            self.inner.update(collection, key, apply).await
        }
    }

    #[tokio::test]
    async fn test_end_to_end_rotation_scenario() {
        let service = create_service();
        let u1 = service.owner_id("u1").unwrap();
        let credentials = service.credentials();

        let c1 = credentials.issue(&u1).await.unwrap().access_code;
        assert!(credentials.validate(&u1, c1.as_str()).await.unwrap().granted);

        let c2 = credentials.rotate(&u1).await.unwrap().access_code;
        assert_ne!(c1, c2);
        assert!(!credentials.validate(&u1, c1.as_str()).await.unwrap().granted);
        assert!(credentials.validate(&u1, c2.as_str()).await.unwrap().granted);
    }

    #[tokio::test]
    async fn test_open_shared_profile_granted() {
        let service = create_service();
        let u1 = service.owner_id("u1").unwrap();
        service.profiles().save_profile(&u1, fields(), None).await.unwrap();
        let credential = service.credentials().issue(&u1).await.unwrap();

        let view = service
            .open_shared_profile(&credential.share_token, credential.access_code.as_str())
            .await
            .unwrap();

        assert!(view.granted);
        assert_eq!(view.profile.unwrap().fields.allergies, "Peanuts");
    }

    #[tokio::test]
    async fn test_open_shared_profile_without_saved_profile() {
        let service = create_service();
        let u1 = service.owner_id("u1").unwrap();
        let credential = service.credentials().issue(&u1).await.unwrap();

        let view = service
            .open_shared_profile(&credential.share_token, credential.access_code.as_str())
            .await
            .unwrap();
        assert!(view.granted);
        assert!(view.profile.is_none());
    }

    #[tokio::test]
    async fn test_open_shared_profile_denials_look_alike() {
        let service = create_service();
        let u1 = service.owner_id("u1").unwrap();
        service.profiles().save_profile(&u1, fields(), None).await.unwrap();
        let credential = service.credentials().issue(&u1).await.unwrap();
        let code = credential.access_code.as_str().to_string();
        let wrong = if code == "99999" { "10000" } else { "99999" };

        let unknown_token = service
            .open_shared_profile("deadbeefdeadbeefdeadbeefdeadbeef", &code)
            .await
            .unwrap();
        let wrong_code = service
            .open_shared_profile(&credential.share_token, wrong)
            .await
            .unwrap();
        service.credentials().deactivate(&u1).await.unwrap();
        let inactive = service
            .open_shared_profile(&credential.share_token, &code)
            .await
            .unwrap();

        for view in [&unknown_token, &wrong_code, &inactive] {
            assert_eq!(view, &SharedView::denied());
            assert_eq!(serde_json::to_string(view).unwrap(), r#"{"granted":false}"#);
        }
    }

    #[tokio::test]
    async fn test_open_shared_profile_malformed_code() {
        let service = create_service();
        let err = service
            .open_shared_profile("deadbeef", "12")
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_delete_account_cascades() {
        let service = create_service();
        let u1 = service.owner_id("u1").unwrap();
        service.profiles().save_profile(&u1, fields(), None).await.unwrap();
        let credential = service.credentials().issue(&u1).await.unwrap();

        let deletion = service.delete_account(&u1).await.unwrap();
        assert_eq!(
            deletion,
            AccountDeletion {
                profile_deleted: true,
                credential_revoked: true,
            }
        );

        assert!(service.profiles().get_profile(&u1).await.unwrap_err().is_not_found());
        let view = service
            .open_shared_profile(&credential.share_token, credential.access_code.as_str())
            .await
            .unwrap();
        assert!(!view.granted);

        let again = service.delete_account(&u1).await.unwrap();
        assert!(!again.profile_deleted && !again.credential_revoked);
    }

    #[tokio::test]
    async fn test_storage_failures_are_retryable_errors() {
        let store = FlakyStore::new();
        let service = AccessService::new(store.clone(), &Config::default()).unwrap();
        let u1 = service.owner_id("u1").unwrap();
        let credential = service.credentials().issue(&u1).await.unwrap();

        store.broken.store(true, Ordering::SeqCst);

        let err = service
            .profiles()
            .save_profile(&u1, fields(), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let err = service
            .credentials()
            .validate(&u1, credential.access_code.as_str())
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // Malformed input is rejected before the broken store is reached
        let err = service.credentials().validate(&u1, "12").await.unwrap_err();
        assert!(err.is_invalid_input());

        // Manual retry succeeds once the store recovers
        store.broken.store(false, Ordering::SeqCst);
        service
            .profiles()
            .save_profile(&u1, fields(), None)
            .await
            .unwrap();
    }

    #[test]
    fn test_owner_id_uses_configured_pattern() {
        let mut config = Config::default();
        config.identity.owner_id_pattern = r"^uid-[0-9]+$".to_string();
        let service =
            AccessService::new(Arc::new(Storage::open_in_memory().unwrap()), &config).unwrap();

        assert!(service.owner_id("uid-42").is_ok());
        assert!(service.owner_id("u1").unwrap_err().is_invalid_input());
    }
}

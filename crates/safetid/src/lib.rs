//! `safetid` - A shareable medical record behind a five-digit access code
//!
//! This library keeps each owner's medical profile and the access credential
//! (a five-digit code plus a share URL) that lets a healthcare provider read
//! it after scanning the owner's QR code.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod api;
pub mod cli;
pub mod config;
pub mod credential;
pub mod error;
pub mod identity;
pub mod logging;
pub mod profile;
pub mod service;
pub mod storage;

pub use config::Config;
pub use credential::{AccessCode, AccessCredential, CredentialManager, ValidationOutcome};
pub use error::{Error, Result};
pub use identity::{OwnerId, OwnerIdPolicy, OwnerIdentity};
pub use logging::init_logging;
pub use profile::{MedicalProfile, ProfileFields, ProfileStore};
pub use service::{AccessService, SharedView};
pub use storage::{DocumentStore, Storage, StorageStats};

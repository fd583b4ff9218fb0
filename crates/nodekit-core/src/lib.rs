//! nodekit-core - NodeKit Call-Branding Domain Library
//!
//! This crate holds the storage- and network-free building blocks of the
//! NodeKit runtime: the branding/event data model, E.164 normalization,
//! stable device-identity and idempotency-key derivation, configuration,
//! and the keyring-backed credential store.
//!
//! # Modules
//!
//! - [`model`]: `BrandingRecord`, `OutboxEvent`, and the `EventOutcome`
//!   wire enum
//! - [`phone`]: E.164 caller-address normalization
//! - [`identity`]: stable device id and per-event idempotency keys
//! - [`config`]: runtime configuration with validated setters and atomic
//!   settings persistence
//! - [`credentials`]: OS-keyring-backed API key storage

pub mod config;
pub mod credentials;
pub mod identity;
pub mod model;
pub mod phone;

pub use config::{NodeKitConfig, ConfigError};
pub use credentials::{ApiKeyStore, CredentialError};
pub use model::{BrandingRecord, EventOutcome, NewOutboxEvent, OutboxEvent};
pub use phone::{normalize_e164, PhoneError};

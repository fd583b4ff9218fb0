//! Background reconciliation with the remote branding service.
//!
//! One sync pass pulls fresh branding records into the local cache, drains
//! pending outbox events to the service, and runs retention sweeps on both
//! stores. Every stage is fail-soft: a failed pull leaves the cache at its
//! last-known-good state, a failed event delivery never blocks the rest of
//! the batch, and total network loss degrades the pass to a no-op.

mod engine;
mod transport;
#[cfg(test)]
mod tests;

pub use engine::{SyncEngine, SyncReport};
pub use transport::{BrandingTransport, DeviceInfo, HttpBrandingTransport, SyncError};

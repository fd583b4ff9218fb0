//! nodekit-daemon - NodeKit Call-Branding Runtime
//!
//! Device-resident runtime that intercepts inbound calls, annotates them
//! with cached caller branding, and durably records each display decision
//! for asynchronous upload to the remote branding service.
//!
//! The load-bearing guarantee is "fail open, never lose data": the
//! telephony callback always receives a usable, Active connection no matter
//! what fails underneath it, and every interception decision is queued as a
//! durable outbox event that survives restarts and is retried until
//! delivered.
//!
//! # Runtime Requirements
//!
//! The interception path ([`gate`]) is synchronous and never awaits; all
//! background work (spool drain, sync passes) runs on a tokio runtime.
//! Blocking SQLite calls made from async context go through
//! `tokio::task::spawn_blocking`.
//!
//! # Modules
//!
//! - [`clock`]: time source abstraction shared by the gate and sync engine
//! - [`store`]: SQLite-backed branding cache and event outbox
//! - [`spool`]: non-blocking event hand-off from the call path to the outbox
//! - [`gate`]: fail-open call-interception gate and connection state machine
//! - [`scheduler`]: self-healing periodic sync trigger
//! - [`sync`]: reconciliation engine and remote transport
//! - [`plugin`]: host plugin surface (`initialize` / `sync_branding` /
//!   `test_incoming_call`)

pub mod clock;
pub mod gate;
pub mod plugin;
pub mod scheduler;
pub mod spool;
pub mod store;
pub mod sync;

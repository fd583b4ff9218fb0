//! Fail-open call-interception gate.
//!
//! The gate sits on the host's telephony callback. Its contract is strict:
//! every call request, including malformed ones, yields a connection that
//! has reached [`ConnectionState::Active`] before control returns to the
//! platform. Branding is best-effort on top of that guarantee. Failures in
//! normalization, the cache lookup, or the event spool are converted into
//! an unbranded connection and logged, never propagated.

mod connection;
mod interceptor;

pub use connection::{CallConnection, ConnectionState};
pub use interceptor::{CallInterceptionGate, CallRequest, TelephonyBoundary};

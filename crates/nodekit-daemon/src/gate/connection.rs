//! Connection object handed back to the telephony subsystem.

use tracing::debug;
use uuid::Uuid;

/// Lifecycle of a produced connection.
///
/// `Initializing` exists only during construction; the gate always moves
/// the connection to `Active` before returning it. `Rejected` and
/// `Disconnected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initializing,
    Active,
    Answered,
    Rejected,
    Disconnected,
}

impl ConnectionState {
    /// Whether the connection can still change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Disconnected)
    }
}

/// An inbound (or outbound-fallback) call connection.
///
/// Carries optional branding fields for the in-call UI plus the caller
/// address passed through unchanged. Self-managed: the host renders it
/// without waiting on any further signal from this crate.
#[derive(Debug, Clone)]
pub struct CallConnection {
    call_id: String,
    state: ConnectionState,
    /// Caller address exactly as the platform supplied it.
    pub caller_address: Option<String>,
    pub brand_name: Option<String>,
    pub logo_url: Option<String>,
    pub call_reason: Option<String>,
}

impl CallConnection {
    /// Builds a connection in `Initializing`; callers activate it before
    /// handing it to the platform.
    pub(crate) fn new(caller_address: Option<String>) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            state: ConnectionState::Initializing,
            caller_address,
            brand_name: None,
            logo_url: None,
            call_reason: None,
        }
    }

    pub(crate) fn with_branding(
        mut self,
        brand_name: Option<String>,
        logo_url: Option<String>,
        call_reason: Option<String>,
    ) -> Self {
        self.brand_name = brand_name;
        self.logo_url = logo_url;
        self.call_reason = call_reason;
        self
    }

    pub(crate) fn activate(mut self) -> Self {
        if self.state == ConnectionState::Initializing {
            self.state = ConnectionState::Active;
        }
        self
    }

    /// Unique id for this connection instance.
    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether any branding field is set.
    #[must_use]
    pub const fn is_branded(&self) -> bool {
        self.brand_name.is_some() || self.logo_url.is_some() || self.call_reason.is_some()
    }

    /// User answered. No-op unless the connection is `Active`.
    pub fn answer(&mut self) {
        if self.state == ConnectionState::Active {
            self.state = ConnectionState::Answered;
            debug!(call_id = %self.call_id, "Call answered");
        }
    }

    /// User rejected. Terminal; no-op if already terminal.
    pub fn reject(&mut self) {
        if !self.state.is_terminal() {
            self.state = ConnectionState::Rejected;
            debug!(call_id = %self.call_id, "Call rejected");
        }
    }

    /// Call ended or torn down. Terminal; no-op if already terminal.
    pub fn disconnect(&mut self) {
        if !self.state.is_terminal() {
            self.state = ConnectionState::Disconnected;
            debug!(call_id = %self.call_id, "Call disconnected");
        }
    }
}

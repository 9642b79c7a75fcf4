//! Telephony engine port.
//!
//! The engine itself (registration, dialing, audio transport) is an external
//! collaborator. The hub consumes it through two narrow surfaces: a command
//! trait and an event feed delivered over the hub's inbox channel.

use std::fmt;

use thiserror::Error;

use crate::protocol::Account;

/// Opaque call handle supplied by the engine. Not durable — handles are
/// meaningless across process restarts. The engine guarantees a handle is
/// never reused while a record for it is still live; a violation surfaces as
/// the defensive unknown-handle path in the call registry, never a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Command failure from the engine. Logged at warn level; an actual
/// registration failure additionally comes back through the normal
/// [`EngineEvent::RegisterFail`] path.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine rejected command: {0}")]
    Rejected(String),
}

/// Command surface the hub drives.
pub trait TelephonyEngine: Send + 'static {
    /// Begin (or restart) registration for an account.
    fn start_registration(&mut self, account: &Account) -> Result<(), EngineError>;

    /// Tear down the registration for an address-of-record.
    fn drop_registration(&mut self, aor: &str) -> Result<(), EngineError>;

    /// Originate the answer for an incoming call.
    fn answer(&mut self, call: CallId) -> Result<(), EngineError>;

    /// The engine's active-registration pointer, as an AOR string.
    fn current_aor(&self) -> Option<String>;

    /// Clear the active-registration pointer.
    fn clear_current(&mut self);
}

/// Asynchronous engine callbacks, serialized into the hub's event stream.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    CallIncoming { id: CallId, peer: String },
    CallEstablished { id: CallId },
    CallClosed { id: CallId, reason: String },
    RegisterOk { aor: String },
    Unregistering { aor: String },
    RegisterFail { aor: String },
}

/// Stand-in engine for running the hub without a telephony backend wired in.
/// Commands are logged and acknowledged; no events are ever emitted.
#[derive(Debug, Default)]
pub struct NullEngine {
    current: Option<String>,
}

impl TelephonyEngine for NullEngine {
    fn start_registration(&mut self, account: &Account) -> Result<(), EngineError> {
        tracing::debug!(addr = %account.registration_addr(), "engine: start registration");
        self.current = Some(account.aor());
        Ok(())
    }

    fn drop_registration(&mut self, aor: &str) -> Result<(), EngineError> {
        tracing::debug!(aor = aor, "engine: drop registration");
        Ok(())
    }

    fn answer(&mut self, call: CallId) -> Result<(), EngineError> {
        tracing::debug!(call = %call, "engine: answer");
        Ok(())
    }

    fn current_aor(&self) -> Option<String> {
        self.current.clone()
    }

    fn clear_current(&mut self) {
        self.current = None;
    }
}

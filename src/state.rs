//! Driver state vocabulary and observed-state snapshots.
//!
//! Drivers report their lifecycle position as an opaque string. The handful of
//! states the correction logic acts on are modeled as enum variants; every
//! other value is carried through in [`DriverState::Other`] so an unfamiliar
//! protocol state never breaks parsing.

use std::fmt;

use serde_json::Value;

use crate::error::{ControlError, ControlResult};

const WIRE_UNCONFIGURED: &str = "DRIVER_STATE_UNCONFIGURED";
const WIRE_DISCONNECTED: &str = "DRIVER_STATE_DISCONNECTED";
const WIRE_UNKNOWN: &str = "DRIVER_STATE_UNKNOWN";
const WIRE_COMMAND: &str = "DRIVER_STATE_COMMAND";
const WIRE_AUTOSAMPLE: &str = "DRIVER_STATE_AUTOSAMPLE";

/// Lifecycle state reported by a driver process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    /// Driver running, no port-agent configuration yet.
    Unconfigured,
    /// Configured but not connected to the instrument.
    Disconnected,
    /// Connected, protocol state not yet discovered.
    Unknown,
    /// Instrument accepted, awaiting commands.
    Command,
    /// Instrument streaming samples autonomously.
    Autosample,
    /// Any state the correction logic has no action for.
    Other(String),
}

impl DriverState {
    /// Parses a wire state string. Never fails; unrecognized names land in
    /// [`DriverState::Other`].
    pub fn from_wire(s: &str) -> Self {
        match s {
            WIRE_UNCONFIGURED => DriverState::Unconfigured,
            WIRE_DISCONNECTED => DriverState::Disconnected,
            WIRE_UNKNOWN => DriverState::Unknown,
            WIRE_COMMAND => DriverState::Command,
            WIRE_AUTOSAMPLE => DriverState::Autosample,
            other => DriverState::Other(other.to_string()),
        }
    }

    /// The wire name of this state.
    pub fn as_wire(&self) -> &str {
        match self {
            DriverState::Unconfigured => WIRE_UNCONFIGURED,
            DriverState::Disconnected => WIRE_DISCONNECTED,
            DriverState::Unknown => WIRE_UNKNOWN,
            DriverState::Command => WIRE_COMMAND,
            DriverState::Autosample => WIRE_AUTOSAMPLE,
            DriverState::Other(name) => name,
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One observation of the driver's state, with the full reply value preserved
/// for display and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    /// Parsed lifecycle state.
    pub state: DriverState,
    /// The complete `value` object from the state reply.
    pub detail: Value,
}

impl StateSnapshot {
    /// Parses a `get_state` reply of the form `{"value": {"state": ..., ...}}`.
    pub fn from_reply(reply: &Value) -> ControlResult<Self> {
        let value = reply
            .get("value")
            .ok_or_else(|| ControlError::Protocol("state reply missing 'value'".to_string()))?;
        let state = value
            .get("state")
            .and_then(Value::as_str)
            .ok_or_else(|| ControlError::Protocol("state reply missing 'state'".to_string()))?;
        Ok(Self {
            state: DriverState::from_wire(state),
            detail: value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_states_round_trip() {
        for name in [
            "DRIVER_STATE_UNCONFIGURED",
            "DRIVER_STATE_DISCONNECTED",
            "DRIVER_STATE_UNKNOWN",
            "DRIVER_STATE_COMMAND",
            "DRIVER_STATE_AUTOSAMPLE",
        ] {
            let state = DriverState::from_wire(name);
            assert!(!matches!(state, DriverState::Other(_)), "{name}");
            assert_eq!(state.as_wire(), name);
        }
    }

    #[test]
    fn unfamiliar_state_is_preserved() {
        let state = DriverState::from_wire("DRIVER_STATE_DIRECT_ACCESS");
        assert_eq!(
            state,
            DriverState::Other("DRIVER_STATE_DIRECT_ACCESS".to_string())
        );
        assert_eq!(state.to_string(), "DRIVER_STATE_DIRECT_ACCESS");
    }

    #[test]
    fn snapshot_parses_reply_and_keeps_detail() {
        let reply = json!({"value": {"state": "DRIVER_STATE_COMMAND", "extra": 7}});
        let snap = StateSnapshot::from_reply(&reply).unwrap();
        assert_eq!(snap.state, DriverState::Command);
        assert_eq!(snap.detail["extra"], 7);
    }

    #[test]
    fn snapshot_rejects_malformed_reply() {
        assert!(StateSnapshot::from_reply(&json!({"value": {}})).is_err());
        assert!(StateSnapshot::from_reply(&json!({})).is_err());
    }
}

//! Script files: a YAML list of driver commands run in order.
//!
//! Each step is an externally tagged [`ScriptStep`]; a step name that is not
//! in the vocabulary fails at load time, naming the offender, rather than
//! silently doing nothing halfway through a run.
//!
//! ```yaml
//! - start_driver
//! - wait_state: { state: DRIVER_STATE_COMMAND, seconds: 60 }
//! - execute: DRIVER_EVENT_ACQUIRE_SAMPLE
//! - sleep: 5
//! - stop_driver
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ControlError, ControlResult};

/// One command in a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    /// Pause for the given number of seconds.
    Sleep(f64),
    /// Wait until the observed driver state equals `state`, at most `seconds`.
    WaitState {
        /// Wire name of the state to wait for.
        state: String,
        /// Deadline in seconds.
        seconds: f64,
    },
    /// Launch the driver process.
    StartDriver,
    /// Stop the driver process. The surrounding session still guarantees a
    /// single stop overall.
    StopDriver,
    /// Deliver a port-agent configuration.
    Configure(Value),
    /// Deliver startup parameters.
    SetInitParams(Value),
    /// Connect the driver to its instrument.
    Connect,
    /// Discover the instrument's protocol state.
    Discover,
    /// Write resource parameters.
    SetResource(Value),
    /// Fetch and publish the driver's current state.
    GetState,
    /// Execute a protocol capability.
    Execute(Value),
}

/// A parsed, validated script.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    /// Loads and validates a script file.
    pub fn load(path: &Path) -> ControlResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Parses and validates a script from YAML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> ControlResult<Self> {
        let steps: Vec<ScriptStep> = serde_yaml::from_str(text)
            .map_err(|e| ControlError::Script(format!("invalid script: {e}")))?;
        for step in &steps {
            let seconds = match step {
                ScriptStep::Sleep(s) => *s,
                ScriptStep::WaitState { seconds, .. } => *seconds,
                _ => continue,
            };
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(ControlError::Script(format!(
                    "invalid duration {seconds} in step {step:?}"
                )));
            }
        }
        Ok(Self { steps })
    }

    /// The steps in execution order.
    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

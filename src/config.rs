//! Connection parameters and configure-file loading.
//!
//! A driver process exposes two endpoints derived from the same host: the HTTP
//! command API served by the instrument agent on a fixed port, and a per-driver
//! event stream on a port chosen at launch. [`ConnectParams`] holds everything
//! needed to derive both, plus the launch parameters (Python module path, class
//! name, ports) forwarded verbatim when starting a driver.
//!
//! Configure files are small YAML documents with exactly two top-level keys,
//! `port_agent_config` and `startup_config`, whose values are passed through to
//! the driver untouched.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ControlResult;

/// Fixed port of the instrument agent's HTTP API.
pub const AGENT_PORT: u16 = 12572;

/// Path prefix of the per-driver command API.
pub const BASE_API_PATH: &str = "instrument/api";

/// Default driver module launched when none is given.
pub const DEFAULT_MODULE: &str = "mi.instrument.virtual.driver";

/// Default driver class launched when none is given.
pub const DEFAULT_CLASS: &str = "InstrumentDriver";

/// Default command port passed to a newly launched driver.
pub const DEFAULT_COMMAND_PORT: u16 = 10000;

/// Default event port passed to a newly launched driver.
pub const DEFAULT_EVENT_PORT: u16 = 10001;

/// Everything needed to reach and launch one named driver.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Host running the instrument agent and the driver process.
    pub host: String,
    /// Reference designator naming the driver instance.
    pub name: String,
    /// Module path handed to the agent when starting the driver.
    pub module: String,
    /// Class name handed to the agent when starting the driver.
    pub class: String,
    /// Command port handed to the agent when starting the driver.
    pub command_port: u16,
    /// Port the driver publishes its event stream on.
    pub event_port: u16,
}

impl ConnectParams {
    /// Base URL of the driver's command API.
    pub fn base_url(&self) -> String {
        format!(
            "http://{}:{}/{}/{}",
            self.host, AGENT_PORT, BASE_API_PATH, self.name
        )
    }

    /// Address of the driver's event stream.
    pub fn event_addr(&self) -> String {
        format!("{}:{}", self.host, self.event_port)
    }
}

/// Parsed configure file: the two payloads forwarded to the driver.
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Port-agent connection description, forwarded to `configure`.
    pub port_agent_config: Value,
    /// Startup parameter set, forwarded to `set_init_params`.
    pub startup_config: Value,
}

impl DriverConfig {
    /// Loads a configure file from disk.
    pub fn load(path: &Path) -> ControlResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Parses a configure file from YAML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> ControlResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

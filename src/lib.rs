//! Core library for the instrument-control client.
//!
//! This library contains the remote driver API client, the event and state
//! observation tasks, and the orchestration logic used to drive a remote
//! instrument driver process to a target state and run command scripts
//! against it. It is used by the `instrument_control` command-line binary.

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod samples;
pub mod script;
pub mod state;

pub use client::{DriverApi, HttpDriverClient};
pub use config::{ConnectParams, DriverConfig};
pub use controller::Controller;
pub use error::{ControlError, ControlResult};
pub use events::{EventSource, TcpEventSource};
pub use samples::SampleStore;
pub use script::Script;
pub use state::{DriverState, StateSnapshot};

//! Shared test doubles: a scripted driver and an in-memory event source.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use instrument_control::client::DriverApi;
use instrument_control::error::ControlResult;
use instrument_control::events::EventSource;
use instrument_control::state::{DriverState, StateSnapshot};

/// Driver double that replays a canned state sequence.
///
/// Each non-blocking `get_state` pops the next state, repeating the last one
/// once the sequence is exhausted. Blocking `get_state` never resolves, like a
/// long poll against a driver whose state never changes again. Every command
/// is recorded in call order.
#[derive(Default)]
pub struct ScriptedDriver {
    states: Mutex<VecDeque<&'static str>>,
    last_state: Mutex<&'static str>,
    calls: Mutex<Vec<String>>,
    stop_calls: AtomicUsize,
    execute_reply: Mutex<Value>,
}

impl ScriptedDriver {
    pub fn with_states(states: &[&'static str]) -> Arc<Self> {
        let driver = Self::default();
        *driver.states.lock().unwrap() = states.iter().copied().collect();
        *driver.execute_reply.lock().unwrap() = json!({});
        Arc::new(driver)
    }

    /// Makes every subsequent `execute` answer with the given reply.
    pub fn set_execute_reply(&self, reply: Value) {
        *self.execute_reply.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl DriverApi for ScriptedDriver {
    async fn start(&self) -> ControlResult<Value> {
        self.record("start");
        Ok(json!({}))
    }

    async fn stop(&self) -> ControlResult<Value> {
        self.record("stop");
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({}))
    }

    async fn configure(&self, _port_agent_config: &Value) -> ControlResult<Value> {
        self.record("configure");
        Ok(json!({}))
    }

    async fn set_init_params(&self, _startup_config: &Value) -> ControlResult<Value> {
        self.record("set_init_params");
        Ok(json!({}))
    }

    async fn connect_instrument(&self) -> ControlResult<Value> {
        self.record("connect");
        Ok(json!({}))
    }

    async fn discover(&self) -> ControlResult<Value> {
        self.record("discover");
        Ok(json!({}))
    }

    async fn set_resource(&self, parameters: &Value) -> ControlResult<Value> {
        self.record(format!("set_resource:{parameters}"));
        Ok(json!({}))
    }

    async fn get_state(&self, blocking: bool) -> ControlResult<StateSnapshot> {
        if blocking {
            return std::future::pending().await;
        }
        let name = {
            let mut queue = self.states.lock().unwrap();
            match queue.pop_front() {
                Some(next) => {
                    *self.last_state.lock().unwrap() = next;
                    next
                }
                None => *self.last_state.lock().unwrap(),
            }
        };
        Ok(StateSnapshot {
            state: DriverState::from_wire(name),
            detail: json!({ "state": name }),
        })
    }

    async fn execute(&self, command: &Value) -> ControlResult<Value> {
        self.record(format!("execute:{command}"));
        Ok(self.execute_reply.lock().unwrap().clone())
    }
}

/// Event source fed from an in-memory channel. Once the sender is gone it
/// behaves like a silent stream and never resolves again.
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl ChannelEvents {
    pub fn new() -> (mpsc::UnboundedSender<Value>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelEvents {
    async fn recv(&mut self) -> ControlResult<Value> {
        match self.rx.recv().await {
            Some(event) => Ok(event),
            None => std::future::pending().await,
        }
    }
}

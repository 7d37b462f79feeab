//! Session orchestration: background observation tasks, the state-driving
//! correction loop, and guaranteed teardown.
//!
//! A [`Controller`] owns one driver session. It keeps the latest observed
//! state in a `tokio::sync::watch` cell fed by a long-polling poller task,
//! folds the event stream into a shared [`SampleStore`], and exposes the two
//! blocking primitives scripts build on: [`Controller::initialize_driver`],
//! which drives the driver to a target state through a fixed correction table,
//! and [`Controller::wait_state`], which waits on the watch cell without
//! issuing commands.
//!
//! Teardown is idempotent: `stop` is issued to the driver at most once per
//! session, the run flag is cleared, and background tasks are joined before
//! [`Controller::shutdown`] returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::DriverApi;
use crate::error::{ControlError, ControlResult};
use crate::events::{listen, EventSource};
use crate::samples::SampleStore;
use crate::script::{Script, ScriptStep};
use crate::state::{DriverState, StateSnapshot};

/// Capability that switches a driver from command mode to autosampling.
pub const CMD_START_AUTOSAMPLE: &str = "DRIVER_EVENT_START_AUTOSAMPLE";

/// Capability that switches a driver from autosampling back to command mode.
pub const CMD_STOP_AUTOSAMPLE: &str = "DRIVER_EVENT_STOP_AUTOSAMPLE";

/// Reply type marking a driver-side exception.
pub const EXCEPTION_EVENT: &str = "DRIVER_EXCEPTION_EVENT";

/// Pause before retrying a failed state poll.
const POLL_BACKOFF: Duration = Duration::from_millis(100);

/// Rejects replies that carry a driver-side exception.
fn check_reply(reply: Value) -> ControlResult<Value> {
    if reply.get("type").and_then(Value::as_str) == Some(EXCEPTION_EVENT) {
        return Err(ControlError::DriverFault {
            value: reply.get("value").cloned().unwrap_or(Value::Null),
        });
    }
    Ok(reply)
}

/// One driver session: shared observation state plus the orchestration logic.
pub struct Controller<C: DriverApi> {
    client: Arc<C>,
    samples: SampleStore,
    state_tx: watch::Sender<Option<StateSnapshot>>,
    run_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl<C: DriverApi> Controller<C> {
    /// Creates a session over the given client. No requests are made and no
    /// tasks are spawned until the session is used.
    pub fn new(client: Arc<C>) -> Self {
        let (state_tx, _) = watch::channel(None);
        let (run_tx, _) = watch::channel(true);
        Self {
            client,
            samples: SampleStore::new(),
            state_tx,
            run_tx,
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// The shared sample store fed by the event listener.
    pub fn samples(&self) -> &SampleStore {
        &self.samples
    }

    /// The most recently observed driver state, if any observation has
    /// happened yet.
    pub fn state(&self) -> Option<StateSnapshot> {
        self.state_tx.borrow().clone()
    }

    fn push_task(&self, handle: JoinHandle<()>) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }

    /// Fetches the driver's state and publishes it to the watch cell.
    pub async fn fetch_state(&self, blocking: bool) -> ControlResult<StateSnapshot> {
        let snap = self.client.get_state(blocking).await?;
        self.state_tx.send_replace(Some(snap.clone()));
        Ok(snap)
    }

    /// Spawns the event listener over the given source. Runs until the run
    /// flag clears.
    pub fn spawn_event_listener<S: EventSource>(&self, source: S) {
        let handle = tokio::spawn(listen(
            source,
            self.samples.clone(),
            self.run_tx.subscribe(),
        ));
        self.push_task(handle);
    }

    /// Spawns the state poller: repeated blocking `get_state` calls publishing
    /// each change to the watch cell, retrying transport errors after a short
    /// backoff. The first observation comes from the caller's own
    /// non-blocking fetch, so the poller only reports changes.
    pub fn spawn_state_poller(&self) {
        let client = Arc::clone(&self.client);
        let tx = self.state_tx.clone();
        let mut run = self.run_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                if !*run.borrow() {
                    break;
                }
                tokio::select! {
                    changed = run.changed() => {
                        if changed.is_err() || !*run.borrow() {
                            break;
                        }
                    }
                    next = client.get_state(true) => match next {
                        Ok(snap) => {
                            info!(state = %snap.state, "state updated");
                            tx.send_replace(Some(snap));
                        }
                        Err(e) => {
                            debug!(error = %e, "state poll failed, retrying");
                            tokio::time::sleep(POLL_BACKOFF).await;
                        }
                    }
                }
            }
            debug!("state poller stopped");
        });
        self.push_task(handle);
    }

    /// Starts the driver, spawns the observation tasks, and drives the driver
    /// to `target` through the correction table:
    ///
    /// | observed state | action |
    /// |---|---|
    /// | `UNCONFIGURED` | `configure`, then `set_init_params` |
    /// | `DISCONNECTED` | `connect` |
    /// | `UNKNOWN` | `discover` |
    /// | `COMMAND` | start autosampling, if that is the target |
    /// | `AUTOSAMPLE` | stop autosampling |
    /// | anything else | none |
    ///
    /// After each action the state is re-fetched. The deadline is computed
    /// once at entry; missing it yields [`ControlError::Timeout`] naming the
    /// target state.
    pub async fn initialize_driver<S: EventSource>(
        &self,
        events: S,
        target: DriverState,
        port_agent_config: &Value,
        startup_config: &Value,
        timeout: Duration,
    ) -> ControlResult<()> {
        info!(target = %target, "initializing driver");
        self.client.start().await?;
        self.spawn_event_listener(events);
        self.spawn_state_poller();

        let deadline = Instant::now() + timeout;
        let mut snap = self.fetch_state(false).await?;
        while snap.state != target {
            match &snap.state {
                DriverState::Unconfigured => {
                    info!("sending configuration");
                    self.client.configure(port_agent_config).await?;
                    self.client.set_init_params(startup_config).await?;
                }
                DriverState::Disconnected => {
                    info!("connecting to instrument");
                    self.client.connect_instrument().await?;
                }
                DriverState::Unknown => {
                    info!("running discover");
                    self.client.discover().await?;
                }
                DriverState::Command => {
                    if target == DriverState::Autosample {
                        info!("starting autosampling");
                        self.client.execute(&json!(CMD_START_AUTOSAMPLE)).await?;
                    }
                }
                DriverState::Autosample => {
                    info!("stopping autosampling");
                    self.client.execute(&json!(CMD_STOP_AUTOSAMPLE)).await?;
                }
                DriverState::Other(name) => {
                    warn!(state = %name, "no corrective action for state");
                }
            }

            snap = self.fetch_state(false).await?;
            if Instant::now() > deadline {
                return Err(ControlError::Timeout {
                    state: target.as_wire().to_string(),
                });
            }
        }
        info!(state = %snap.state, "target state reached");
        Ok(())
    }

    /// Waits until the observed state equals `target`, without issuing any
    /// commands. Returns [`ControlError::Timeout`] naming `target` if the
    /// deadline passes first.
    pub async fn wait_state(&self, target: &DriverState, timeout: Duration) -> ControlResult<()> {
        let mut rx = self.state_tx.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            let reached = rx.borrow().as_ref().is_some_and(|s| &s.state == target);
            if reached {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ControlError::Timeout {
                    state: target.as_wire().to_string(),
                });
            }
            match tokio::time::timeout(remaining, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    return Err(ControlError::Timeout {
                        state: target.as_wire().to_string(),
                    });
                }
            }
        }
    }

    /// Stops the session: clears the run flag, issues `stop` to the driver
    /// (at most once per session, no matter how many times this is called),
    /// and joins the background tasks. Returns the driver's stop reply, or
    /// `Null` if stop was already issued.
    pub async fn shutdown(&self) -> ControlResult<Value> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("stop already issued");
            return Ok(Value::Null);
        }
        info!("stopping driver");
        self.run_tx.send_replace(false);
        let reply = self.client.stop().await;

        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task panicked");
            }
        }
        reply
    }

    /// Runs a script to completion, then tears the session down. The store is
    /// cleared at entry so collected samples belong to this run. The driver is
    /// stopped exactly once whether the script succeeds, fails, or contains
    /// its own `stop_driver` step; a script error takes precedence over any
    /// teardown error in the result.
    pub async fn run_script(&self, script: &Script) -> ControlResult<()> {
        self.samples.clear();
        let outcome = self.run_steps(script).await;
        let teardown = self.shutdown().await;
        outcome?;
        teardown?;
        Ok(())
    }

    async fn run_steps(&self, script: &Script) -> ControlResult<()> {
        for step in script.steps() {
            info!(?step, "running script step");
            match step {
                ScriptStep::Sleep(seconds) => {
                    tokio::time::sleep(Duration::from_secs_f64(*seconds)).await;
                }
                ScriptStep::WaitState { state, seconds } => {
                    self.wait_state(
                        &DriverState::from_wire(state),
                        Duration::from_secs_f64(*seconds),
                    )
                    .await?;
                }
                ScriptStep::StartDriver => {
                    check_reply(self.client.start().await?)?;
                }
                ScriptStep::StopDriver => {
                    self.shutdown().await?;
                }
                ScriptStep::Configure(config) => {
                    check_reply(self.client.configure(config).await?)?;
                }
                ScriptStep::SetInitParams(config) => {
                    check_reply(self.client.set_init_params(config).await?)?;
                }
                ScriptStep::Connect => {
                    check_reply(self.client.connect_instrument().await?)?;
                }
                ScriptStep::Discover => {
                    check_reply(self.client.discover().await?)?;
                }
                ScriptStep::SetResource(parameters) => {
                    check_reply(self.client.set_resource(parameters).await?)?;
                }
                ScriptStep::GetState => {
                    self.fetch_state(false).await?;
                }
                ScriptStep::Execute(command) => {
                    check_reply(self.client.execute(command).await?)?;
                }
            }
        }
        Ok(())
    }
}

//! Asynchronous driver event stream.
//!
//! A running driver publishes JSON events on a dedicated port. The listener
//! subscribes for the life of a session, picks out sample events and folds
//! their particles into the shared [`SampleStore`]; every other event type is
//! logged and dropped. Events are advisory: a lost or malformed event is never
//! fatal, the listener just backs off briefly and keeps reading.
//!
//! [`EventSource`] abstracts the transport so tests can inject events
//! directly. The concrete transport is newline-delimited JSON over TCP,
//! connecting lazily since the port only exists once the driver is up.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{ControlError, ControlResult};
use crate::samples::{flatten_particle, FlattenResult, SampleStore};

/// Event type carrying a sample particle.
pub const SAMPLE_EVENT: &str = "DRIVER_ASYNC_EVENT_SAMPLE";

/// Stream name of raw (undecoded) particles, which are not retained.
const RAW_STREAM: &str = "raw";

/// Pause between retries after a transport or decode error.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// A source of driver events.
#[async_trait]
pub trait EventSource: Send + 'static {
    /// Receives the next event, blocking until one arrives.
    async fn recv(&mut self) -> ControlResult<Value>;
}

/// [`EventSource`] reading newline-delimited JSON from the driver's event
/// port. Connects on first receive and reconnects after a dropped connection.
pub struct TcpEventSource {
    addr: String,
    reader: Option<BufReader<TcpStream>>,
}

impl TcpEventSource {
    /// Creates a source for the given `host:port` address. No connection is
    /// made until the first receive.
    pub fn new(addr: String) -> Self {
        Self { addr, reader: None }
    }
}

#[async_trait]
impl EventSource for TcpEventSource {
    async fn recv(&mut self) -> ControlResult<Value> {
        if self.reader.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| ControlError::Transport(format!("{}: {e}", self.addr)))?;
            debug!(addr = %self.addr, "connected to event stream");
            self.reader = Some(BufReader::new(stream));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(ControlError::Transport("event stream unavailable".to_string()));
        };

        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                self.reader = None;
                Err(ControlError::Transport("event stream closed".to_string()))
            }
            Ok(_) => serde_json::from_str(line.trim())
                .map_err(|e| ControlError::Protocol(format!("undecodable event: {e}"))),
            Err(e) => {
                self.reader = None;
                Err(ControlError::Transport(e.to_string()))
            }
        }
    }
}

/// Folds one event into the store. Sample events on real streams with a
/// positive preferred timestamp are flattened and recorded; everything else
/// is dropped.
fn process_event(samples: &SampleStore, event: &Value) {
    if event.get("type").and_then(Value::as_str) != Some(SAMPLE_EVENT) {
        debug!(event = %event, "ignoring non-sample event");
        return;
    }
    let Some(particle) = event.get("value") else {
        warn!("sample event without a particle");
        return;
    };

    let stream = particle
        .get("stream_name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let ts_field = particle
        .get("preferred_timestamp")
        .and_then(Value::as_str)
        .unwrap_or("");
    let ts = particle.get(ts_field).and_then(Value::as_f64).unwrap_or(0.0);

    if stream.is_empty() || stream == RAW_STREAM || ts <= 0.0 {
        debug!(%stream, ts, "dropping sample");
        return;
    }

    let particle = match flatten_particle(particle.clone()) {
        FlattenResult::Flattened(p) => p,
        FlattenResult::Malformed(p) => {
            warn!(%stream, "sample particle has no flattenable values");
            p
        }
    };
    samples.insert(&stream, ts, particle);
}

/// Reads events from `source` into `samples` until the run flag clears.
/// Transient errors are logged and retried after a short backoff; after the
/// flag clears, no further store writes happen.
pub async fn listen<S: EventSource>(
    mut source: S,
    samples: SampleStore,
    mut run: watch::Receiver<bool>,
) {
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
            event = source.recv() => match event {
                Ok(event) => process_event(&samples, &event),
                Err(e) => {
                    debug!(error = %e, "event receive failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }
    debug!("event listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event(stream: &str, ts: f64) -> Value {
        json!({
            "type": SAMPLE_EVENT,
            "value": {
                "stream_name": stream,
                "preferred_timestamp": "port_timestamp",
                "port_timestamp": ts,
                "values": [{"value_id": "temperature", "value": 20.0}]
            }
        })
    }

    #[test]
    fn sample_event_is_flattened_into_store() {
        let store = SampleStore::new();
        process_event(&store, &sample_event("ctdbp_sample", 100.0));

        let snap = store.snapshot();
        let (_, particle) = snap["ctdbp_sample"].iter().next().unwrap();
        assert_eq!(particle["temperature"], 20.0);
        assert!(particle.get("values").is_none());
    }

    #[test]
    fn raw_stream_is_dropped() {
        let store = SampleStore::new();
        process_event(&store, &sample_event("raw", 100.0));
        assert!(store.is_empty());
    }

    #[test]
    fn non_positive_timestamp_is_dropped() {
        let store = SampleStore::new();
        process_event(&store, &sample_event("ctdbp_sample", 0.0));
        process_event(&store, &sample_event("ctdbp_sample", -5.0));
        assert!(store.is_empty());
    }

    #[test]
    fn missing_preferred_timestamp_is_dropped() {
        let store = SampleStore::new();
        let event = json!({
            "type": SAMPLE_EVENT,
            "value": {"stream_name": "ctdbp_sample", "values": []}
        });
        process_event(&store, &event);
        assert!(store.is_empty());
    }

    #[test]
    fn non_sample_events_are_ignored() {
        let store = SampleStore::new();
        let event = json!({"type": "DRIVER_ASYNC_EVENT_STATE_CHANGE", "value": "x"});
        process_event(&store, &event);
        assert!(store.is_empty());
    }
}

//! Remote driver command API.
//!
//! The [`DriverApi`] trait is the seam between the orchestration logic and the
//! wire: [`HttpDriverClient`] implements it against a live driver process,
//! and tests substitute scripted mocks.
//!
//! The driver's HTTP surface is form-encoded. Structured payloads (configure
//! documents, resource parameters, commands) travel as a JSON string inside a
//! single form field; replies are JSON documents, except that a few endpoints
//! may answer with plain text, which is surfaced as a JSON string.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;
use serde_json::Value;
use tracing::debug;

use crate::config::ConnectParams;
use crate::error::{ControlError, ControlResult};
use crate::state::StateSnapshot;

/// Timeout forwarded to the driver's discover endpoint, in milliseconds.
pub const DISCOVER_TIMEOUT_MS: u64 = 300_000;

/// Client-side deadline for ordinary command requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client-side deadline for discover, which can run for minutes on slow
/// instruments. Slightly longer than the server-side timeout so the driver's
/// own answer wins.
const DISCOVER_REQUEST_TIMEOUT: Duration = Duration::from_millis(DISCOVER_TIMEOUT_MS + 30_000);

/// Command surface of one named driver.
#[async_trait]
pub trait DriverApi: Send + Sync + 'static {
    /// Launches the driver process.
    async fn start(&self) -> ControlResult<Value>;

    /// Terminates the driver process.
    async fn stop(&self) -> ControlResult<Value>;

    /// Delivers the port-agent configuration.
    async fn configure(&self, port_agent_config: &Value) -> ControlResult<Value>;

    /// Delivers the startup parameter set.
    async fn set_init_params(&self, startup_config: &Value) -> ControlResult<Value>;

    /// Tells the driver to connect to its instrument.
    async fn connect_instrument(&self) -> ControlResult<Value>;

    /// Asks the driver to discover the instrument's protocol state.
    async fn discover(&self) -> ControlResult<Value>;

    /// Writes resource parameters to the instrument.
    async fn set_resource(&self, parameters: &Value) -> ControlResult<Value>;

    /// Fetches the driver's current state. With `blocking` set, the request
    /// long-polls and returns only on the next state change.
    async fn get_state(&self, blocking: bool) -> ControlResult<StateSnapshot>;

    /// Executes a protocol capability (e.g. starting autosampling).
    async fn execute(&self, command: &Value) -> ControlResult<Value>;
}

/// [`DriverApi`] over the instrument agent's HTTP interface.
pub struct HttpDriverClient {
    http: reqwest::Client,
    params: ConnectParams,
    base_url: String,
}

impl HttpDriverClient {
    /// Builds a client for the driver named in `params`.
    pub fn new(params: ConnectParams) -> ControlResult<Self> {
        // No global timeout: blocking get_state holds the connection open
        // until the driver's state changes. Per-request deadlines are set on
        // the command paths instead.
        let http = reqwest::Client::builder().build()?;
        let base_url = params.base_url();
        Ok(Self {
            http,
            params,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Decodes a reply body as JSON, falling back to a plain string for
    /// endpoints that answer with bare text.
    async fn decode(resp: Response) -> ControlResult<Value> {
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> ControlResult<Value> {
        debug!(path, "posting driver command");
        let resp = self
            .http
            .post(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .form(form)
            .send()
            .await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl DriverApi for HttpDriverClient {
    async fn start(&self) -> ControlResult<Value> {
        debug!(url = %self.base_url, "starting driver");
        let form = [
            ("host", self.params.host.clone()),
            ("module", self.params.module.clone()),
            ("class", self.params.class.clone()),
            ("commandPort", self.params.command_port.to_string()),
            ("eventPort", self.params.event_port.to_string()),
        ];
        let resp = self
            .http
            .post(&self.base_url)
            .timeout(REQUEST_TIMEOUT)
            .form(&form)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn stop(&self) -> ControlResult<Value> {
        debug!(url = %self.base_url, "stopping driver");
        let resp = self
            .http
            .delete(&self.base_url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn configure(&self, port_agent_config: &Value) -> ControlResult<Value> {
        let config = serde_json::to_string(port_agent_config)
            .map_err(|e| ControlError::Protocol(e.to_string()))?;
        self.post_form("configure", &[("config", config)]).await
    }

    async fn set_init_params(&self, startup_config: &Value) -> ControlResult<Value> {
        let config = serde_json::to_string(startup_config)
            .map_err(|e| ControlError::Protocol(e.to_string()))?;
        self.post_form("initparams", &[("config", config)]).await
    }

    async fn connect_instrument(&self) -> ControlResult<Value> {
        self.post_form("connect", &[]).await
    }

    async fn discover(&self) -> ControlResult<Value> {
        debug!("starting discover, this can take several minutes");
        let resp = self
            .http
            .post(self.url("discover"))
            .timeout(DISCOVER_REQUEST_TIMEOUT)
            .form(&[("timeout", DISCOVER_TIMEOUT_MS.to_string())])
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn set_resource(&self, parameters: &Value) -> ControlResult<Value> {
        let resource = serde_json::to_string(parameters)
            .map_err(|e| ControlError::Protocol(e.to_string()))?;
        self.post_form("resource", &[("resource", resource)]).await
    }

    async fn get_state(&self, blocking: bool) -> ControlResult<StateSnapshot> {
        let mut req = self
            .http
            .get(&self.base_url)
            .query(&[("blocking", blocking)]);
        if !blocking {
            req = req.timeout(REQUEST_TIMEOUT);
        }
        let resp = req.send().await?;
        let text = resp.text().await?;
        let reply: Value = serde_json::from_str(&text)
            .map_err(|e| ControlError::Protocol(format!("state reply is not JSON: {e}")))?;
        StateSnapshot::from_reply(&reply)
    }

    async fn execute(&self, command: &Value) -> ControlResult<Value> {
        let command = serde_json::to_string(command)
            .map_err(|e| ControlError::Protocol(e.to_string()))?;
        self.post_form("execute", &[("command", command)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_CLASS, DEFAULT_MODULE};

    #[test]
    fn client_derives_base_url_from_params() {
        let client = HttpDriverClient::new(ConnectParams {
            host: "localhost".to_string(),
            name: "TEST-0001".to_string(),
            module: DEFAULT_MODULE.to_string(),
            class: DEFAULT_CLASS.to_string(),
            command_port: 10000,
            event_port: 10001,
        })
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:12572/instrument/api/TEST-0001");
        assert_eq!(client.url("execute"), "http://localhost:12572/instrument/api/TEST-0001/execute");
    }
}

//! Command-line remote control for instrument driver processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use instrument_control::client::DriverApi;
use instrument_control::config::{
    ConnectParams, DriverConfig, DEFAULT_CLASS, DEFAULT_COMMAND_PORT, DEFAULT_EVENT_PORT,
    DEFAULT_MODULE,
};
use instrument_control::controller::Controller;
use instrument_control::events::TcpEventSource;
use instrument_control::script::Script;
use instrument_control::state::DriverState;
use instrument_control::HttpDriverClient;

#[derive(Parser)]
#[command(name = "instrument_control", about = "Remote control for instrument drivers")]
struct Cli {
    /// Host running the instrument agent.
    host: String,

    /// Reference designator of the driver instance.
    name: String,

    /// Driver module path used when starting the driver.
    #[arg(long, default_value = DEFAULT_MODULE)]
    module: String,

    /// Driver class name used when starting the driver.
    #[arg(long = "klass", default_value = DEFAULT_CLASS)]
    class: String,

    /// Command port passed to a newly started driver.
    #[arg(long, default_value_t = DEFAULT_COMMAND_PORT)]
    command_port: u16,

    /// Event port passed to a newly started driver.
    #[arg(long, default_value_t = DEFAULT_EVENT_PORT)]
    event_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch the driver process.
    Start,
    /// Terminate the driver process.
    Stop,
    /// Connect the driver to its instrument.
    Connect,
    /// Discover the instrument's protocol state.
    Discover,
    /// Print the driver's current state.
    State,
    /// Send a configure file to the driver.
    Configure {
        /// YAML file with port_agent_config and startup_config sections.
        config_file: PathBuf,
    },
    /// Execute a protocol capability.
    Execute {
        /// Capability name, e.g. DRIVER_EVENT_ACQUIRE_SAMPLE.
        capability: String,
    },
    /// Drive the driver to a target state, run a script, and tear down.
    Run {
        /// YAML script file.
        script: PathBuf,
        /// Configure file used while driving to the target state.
        #[arg(long)]
        config: PathBuf,
        /// State to reach before the script starts.
        #[arg(long, default_value = "DRIVER_STATE_COMMAND")]
        target_state: String,
        /// Deadline for reaching the target state, in seconds.
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
}

fn print_reply(reply: &Value) {
    println!("{reply}");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("instrument_control=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let params = ConnectParams {
        host: cli.host,
        name: cli.name,
        module: cli.module,
        class: cli.class,
        command_port: cli.command_port,
        event_port: cli.event_port,
    };
    let event_addr = params.event_addr();
    let client = HttpDriverClient::new(params)?;

    match cli.command {
        Command::Start => print_reply(&client.start().await?),
        Command::Stop => print_reply(&client.stop().await?),
        Command::Connect => print_reply(&client.connect_instrument().await?),
        Command::Discover => print_reply(&client.discover().await?),
        Command::State => {
            let snap = client.get_state(false).await?;
            println!("{}", serde_json::to_string_pretty(&snap.detail)?);
        }
        Command::Configure { config_file } => {
            let cfg = DriverConfig::load(&config_file)
                .with_context(|| format!("loading {}", config_file.display()))?;
            print_reply(&client.configure(&cfg.port_agent_config).await?);
            print_reply(&client.set_init_params(&cfg.startup_config).await?);
        }
        Command::Execute { capability } => {
            print_reply(&client.execute(&Value::String(capability)).await?);
        }
        Command::Run {
            script,
            config,
            target_state,
            timeout,
        } => {
            let script = Script::load(&script)
                .with_context(|| format!("loading {}", script.display()))?;
            let cfg = DriverConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let controller = Controller::new(Arc::new(client));

            controller
                .initialize_driver(
                    TcpEventSource::new(event_addr),
                    DriverState::from_wire(&target_state),
                    &cfg.port_agent_config,
                    &cfg.startup_config,
                    Duration::from_secs(timeout),
                )
                .await?;
            controller.run_script(&script).await?;

            let samples = controller.samples().snapshot();
            info!(count = controller.samples().len(), "samples collected");
            for (stream, by_time) in &samples {
                for particle in by_time.values() {
                    println!("{stream}: {particle}");
                }
            }
        }
    }
    Ok(())
}

use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use fleet_coord::config::{AgentConfig, CoordinatorConfig, DEFAULT_API_PORT};
use fleet_coord::node::Agent;
use fleet_coord::shutdown::install_shutdown_handler;
use fleet_coord::state::{Document, HttpStateClient, StateStore};
use fleet_coord::telemetry::TracingTelemetry;
use fleet_coord::topology::StaticTopology;
use fleet_coord::workload::{ShellExecutor, WorkloadCatalog};

#[derive(Parser, Debug)]
#[command(name = "fleet-coord")]
#[command(version)]
#[command(about = "Coordinates client/server workload phases across hosts")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the coordination agent on this host
    Agent(AgentArgs),

    /// Read or write documents on an agent's state API
    State {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: StateCommands,
    },

    /// Check whether an agent's state API is up
    Heartbeat {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Agent Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct AgentArgs {
    /// ID of this host in the topology
    #[arg(long, default_value = "localhost")]
    host_id: String,

    /// Hosts taking part in the run (comma-separated, format: "id:ip:role")
    /// Example: "vm-1:10.0.0.4:primary,vm-2:10.0.0.5:secondary"
    /// Leave empty for single-host mode.
    #[arg(long, default_value = "", conflicts_with = "topology")]
    hosts: String,

    /// JSON file with the host list, instead of --hosts
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Port to serve the state API on
    #[arg(long, default_value_t = DEFAULT_API_PORT)]
    port: u16,

    /// Port peers serve their state API on (defaults to --port)
    #[arg(long)]
    api_port: Option<u16>,

    /// JSON file with workload definitions
    #[arg(long)]
    workloads: Option<PathBuf>,

    /// Workload to coordinate (secondary and single-host only)
    #[arg(long)]
    workload: Option<String>,

    /// Interval between state polls, in milliseconds
    #[arg(long, default_value = "5000")]
    poll_interval_ms: u64,

    /// Bound for reset/start confirmation polls, in milliseconds
    #[arg(long, default_value = "1800000")]
    state_timeout_ms: u64,

    /// Bound for waiting on the peer to come online, in milliseconds
    #[arg(long, default_value = "3600000")]
    peer_online_timeout_ms: u64,

    /// Bound for the final reset after a run, in milliseconds
    #[arg(long, default_value = "120000")]
    cleanup_timeout_ms: u64,

    /// Whole-phase retries after the first attempt
    #[arg(long, default_value = "3")]
    retries: u32,
}

// =============================================================================
// Client Arguments (shared by state and heartbeat commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Agent address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:4500")]
    addr: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum StateCommands {
    /// Fetch a document
    Get { id: String },
    /// Create or replace a document with a JSON definition
    Put {
        id: String,
        /// Definition as JSON, e.g. '{"properties":{"serviceName":"svcA","serviceState":true}}'
        definition: String,
    },
    /// Delete a document
    Delete { id: String },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct WriteOutput {
    id: String,
    operation: &'static str,
    found: bool,
}

#[derive(Serialize)]
struct HeartbeatOutput {
    addr: String,
    online: bool,
    events_online: bool,
}

// =============================================================================
// Agent Implementation
// =============================================================================

async fn run_agent(args: AgentArgs) -> Result<(), Box<dyn std::error::Error>> {
    let topology = match &args.topology {
        Some(path) => StaticTopology::load(path).await?,
        None => StaticTopology::parse(&args.hosts)?,
    };

    let catalog = match &args.workloads {
        Some(path) => WorkloadCatalog::load(path).await?,
        None => WorkloadCatalog::default(),
    };

    let mut coordinator = CoordinatorConfig {
        poll_interval_ms: args.poll_interval_ms,
        state_timeout_ms: args.state_timeout_ms,
        peer_online_timeout_ms: args.peer_online_timeout_ms,
        cleanup_timeout_ms: args.cleanup_timeout_ms,
        ..Default::default()
    };
    coordinator.retry.retries = args.retries;

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = AgentConfig::new(args.host_id, listen_addr)
        .with_api_port(args.api_port.unwrap_or(args.port))
        .with_coordinator(coordinator);

    tracing::info!(
        host_id = %config.host_id,
        addr = %config.listen_addr,
        workloads = ?catalog.ids(),
        "Starting fleet-coord agent"
    );

    let shutdown_token = install_shutdown_handler()?;
    let agent = Agent::bind(
        config,
        &topology,
        catalog,
        Arc::new(ShellExecutor::new()),
        Arc::new(TracingTelemetry),
    )
    .await?;

    if let Some(output) = agent.run(args.workload, shutdown_token).await? {
        print!("{}", output.stdout);
    }
    Ok(())
}

// =============================================================================
// Client Commands
// =============================================================================

fn state_client(args: &ClientArgs) -> Result<HttpStateClient, Box<dyn std::error::Error>> {
    Ok(HttpStateClient::new(
        args.addr.clone(),
        Duration::from_millis(args.timeout_ms),
    )?)
}

async fn handle_state(
    client: ClientArgs,
    command: StateCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = state_client(&client)?;

    match command {
        StateCommands::Get { id } => match store.get(&id).await? {
            Some(doc) => match client.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
                OutputFormat::Table => {
                    println!("ID:         {}", doc.id);
                    println!("Definition:");
                    for line in serde_json::to_string_pretty(&doc.definition)?.lines() {
                        println!("  {}", line);
                    }
                }
            },
            None => {
                eprintln!("Document '{}' not found", id);
                std::process::exit(1);
            }
        },
        StateCommands::Put { id, definition } => {
            let definition: serde_json::Value = serde_json::from_str(&definition)?;
            store
                .upsert(&Document {
                    id: id.clone(),
                    definition,
                })
                .await?;
            print_write(&client.output, id, "put", true)?;
        }
        StateCommands::Delete { id } => {
            let found = store.delete(&id).await?;
            print_write(&client.output, id, "delete", found)?;
        }
    }

    Ok(())
}

fn print_write(
    format: &OutputFormat,
    id: String,
    operation: &'static str,
    found: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            let output = WriteOutput {
                id,
                operation,
                found,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if found {
                println!("{} '{}': ok", operation, id);
            } else {
                println!("{} '{}': not found", operation, id);
            }
        }
    }
    Ok(())
}

async fn handle_heartbeat(client: ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = state_client(&client)?;
    let online = store.heartbeat().await.unwrap_or(false);
    let events_online = online && store.events_online().await.unwrap_or(false);

    match client.output {
        OutputFormat::Json => {
            let output = HeartbeatOutput {
                addr: client.addr,
                online,
                events_online,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Agent:   {}", client.addr);
            println!("API:     {}", if online { "online" } else { "offline" });
            println!(
                "Events:  {}",
                if events_online { "online" } else { "offline" }
            );
        }
    }

    if !online {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Agent(agent_args) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();
            run_agent(agent_args).await
        }
        Commands::State { client, command } => handle_state(client, command).await,
        Commands::Heartbeat { client } => handle_heartbeat(client).await,
    }
}

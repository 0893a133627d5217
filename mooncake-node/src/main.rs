//! Mooncake transfer engine node binary: bootstraps logging and metrics,
//! builds an `EngineFacade` over a simulated verbs device, and drives the
//! install/register/submit/status/free lifecycle from the CLI.

mod monitoring;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use mooncake_common::{Device, EngineConfig};
use mooncake_engine::{EngineFacade, Opcode, SimDevice, TransferRequest, VerbsDevice};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mooncake-node", about = "Mooncake RDMA transfer engine node")]
struct Cli {
    #[arg(long, env = "MOONCAKE_SERVER_NAME", default_value = "node-a")]
    local_server_name: String,

    #[arg(long, env = "MOONCAKE_METRICS_ADDR", default_value = "127.0.0.1:9898")]
    metrics_addr: SocketAddr,

    #[arg(long, env = "MOONCAKE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Installs the RDMA transport, registers a buffer, writes to it, and
    /// reads the same range back, printing the round-trip result.
    Demo {
        #[arg(long, default_value_t = 4096)]
        length: u64,
    },
    /// Runs only the install + memory registration steps and exits.
    Install,
}

fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    match path {
        None => Ok(EngineConfig::default()),
        Some(path) => {
            let body = std::fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
            serde_json::from_str(&body).with_context(|| format!("parsing config file {path}"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    monitoring::init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let handle = monitoring::init_metrics();
    let metrics_addr = cli.metrics_addr;
    tokio::spawn(async move {
        monitoring::start_metrics_server(handle, metrics_addr).await;
    });

    let facade = Arc::new(EngineFacade::new(cli.local_server_name.clone(), config));
    let device = Device { name: "sim0".into(), lid: 1, gid: [0; 16] };
    let verbs: Arc<dyn mooncake_engine::VerbsDevice> = Arc::new(SimDevice::new());

    match cli.command {
        Command::Install => {
            facade.install_or_get_transport("rdma", vec![device], verbs).await?;
            tracing::info!("transport installed");
        }
        Command::Demo { length } => {
            run_demo(facade.clone(), device, verbs, length).await?;
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }
    Ok(())
}

async fn run_demo(
    facade: Arc<EngineFacade>,
    device: Device,
    verbs: Arc<dyn mooncake_engine::VerbsDevice>,
    length: u64,
) -> Result<()> {
    let transport = facade.install_or_get_transport("rdma", vec![device], verbs.clone()).await?;
    transport.run_workers().await;

    transport.register_local_memory(0x1000, length, "cpu:0", true, true).await?;
    transport.register_local_memory(0x2000, length, "cpu:0", true, true).await?;
    if let Some(region) = verbs.local_region(0x1000) {
        region.data.write().fill(0x5A);
    }

    let batch_id = transport.allocate_batch_id(1);
    transport
        .submit_transfer(
            batch_id,
            vec![TransferRequest {
                opcode: Opcode::Write,
                source_addr: 0x1000,
                length,
                target_id: mooncake_common::LOCAL_SEGMENT_ID,
                target_segment_name: String::new(),
                dest_addr: 0x2000,
                location_tag: "cpu:0".into(),
            }],
        )
        .await?;

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = transport.get_transfer_status(batch_id, 0)?;
        if status.state != mooncake_engine::TaskState::Pending {
            tracing::info!(state = ?status.state, bytes = status.bytes, "demo transfer finished");
            break;
        }
    }
    transport.free_batch_id(batch_id)?;
    Ok(())
}

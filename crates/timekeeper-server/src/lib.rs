//! Timekeeper Server - Process entry points
//!
//! Wires configuration, logging, and a concrete transport into the
//! controller and node loops from `timekeeper-core`.

pub mod config;
pub mod startup;

use anyhow::bail;
use tracing::info;

use timekeeper_api::Address;
use timekeeper_core::{Controller, CoordinationConfig, Node};
use timekeeper_transport::{TcpTransport, Transport};

use crate::config::{Cli, Configuration, TransportKind};

/// Run the mode selected on the command line until it finishes or fails
pub async fn run(cli: &Cli, configuration: &Configuration) -> anyhow::Result<()> {
    let coordination = configuration.to_coordination_config()?;

    match configuration.transport_kind()? {
        TransportKind::Tcp => {
            let transport =
                TcpTransport::new(Address::new(configuration.tcp_controller_address()));
            serve(transport, coordination, cli).await
        }
        #[cfg(unix)]
        TransportKind::Unix => {
            if configuration.controller_address().is_some() {
                tracing::warn!(
                    "controller_address is ignored by the unix transport, using the socket directory"
                );
            }
            let transport = timekeeper_transport::UnixTransport::new(configuration.socket_dir());
            serve(transport, coordination, cli).await
        }
        #[cfg(not(unix))]
        TransportKind::Unix => bail!("the unix transport is not available on this platform"),
    }
}

async fn serve<T: Transport>(
    transport: T,
    coordination: CoordinationConfig,
    cli: &Cli,
) -> anyhow::Result<()> {
    if cli.controller {
        run_controller(transport, coordination).await
    } else {
        run_node(transport, coordination, cli).await
    }
}

/// Controller mode
pub async fn run_controller<T: Transport>(
    transport: T,
    coordination: CoordinationConfig,
) -> anyhow::Result<()> {
    info!("Starting controller");
    let mut controller = Controller::bind(transport, coordination).await?;
    let exit = controller.run().await;
    info!("Controller finished: {:?}", exit);
    Ok(())
}

/// Node mode; starts a controller first if none answers
pub async fn run_node<T: Transport>(
    transport: T,
    coordination: CoordinationConfig,
    cli: &Cli,
) -> anyhow::Result<()> {
    startup::ensure_controller(&transport, &cli.controller_args()).await?;

    let mut node = Node::start(transport, coordination).await?;
    info!("Node started at {}", node.address());
    node.run().await?;

    bail!("node loop ended unexpectedly")
}

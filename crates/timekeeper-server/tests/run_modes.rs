//! Timekeeper Run Mode Tests
//!
//! Exercises the process entry points over the in-memory transport.

use timekeeper_core::{CoordinationConfig, NodeError};
use timekeeper_server::{config::Cli, run_controller, run_node};
use timekeeper_transport::{MemoryTransport, Transport};

#[tokio::test(start_paused = true)]
async fn test_controller_without_nodes_finishes() {
    let transport = MemoryTransport::new();
    run_controller(transport, CoordinationConfig::default())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_orphaned_node_fails() {
    let transport = MemoryTransport::new();
    let _controller = transport
        .listen(&transport.controller_address())
        .await
        .unwrap();

    let err = run_node(transport.clone(), CoordinationConfig::default(), &Cli::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<NodeError>(),
        Some(NodeError::Orphaned(_))
    ));
}

#[tokio::test]
async fn test_controller_address_in_use() {
    let transport = MemoryTransport::new();
    let _taken = transport
        .listen(&transport.controller_address())
        .await
        .unwrap();

    assert!(
        run_controller(transport, CoordinationConfig::default())
            .await
            .is_err()
    );
}

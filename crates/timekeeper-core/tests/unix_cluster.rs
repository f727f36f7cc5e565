//! Timekeeper Unix Socket Cluster Tests
//!
//! Same protocol flow as the in-memory cluster tests, over real sockets in a
//! temporary directory.

#![cfg(unix)]

use std::time::Duration;

use timekeeper_api::Address;
use timekeeper_core::{Controller, CoordinationConfig, Node, Step};
use timekeeper_transport::{Transport, UnixTransport};

fn config() -> CoordinationConfig {
    CoordinationConfig::default().with_broadcast_interval(Duration::from_millis(100))
}

#[tokio::test]
async fn test_promotion_and_heartbeat_over_unix_sockets() {
    let dir = tempfile::tempdir().unwrap();
    let transport = UnixTransport::new(dir.path());

    let mut controller = Controller::bind(transport.clone(), config()).await.unwrap();
    assert!(dir.path().join("controller.sock").exists());

    let mut n1 = Node::start(transport.clone(), config()).await.unwrap();
    let n1_address: Address = n1.address().clone();

    assert_eq!(controller.step().await, Step::Continue);
    assert_eq!(controller.state().leader().address, Some(n1_address.clone()));

    n1.step().await.unwrap();
    assert!(n1.state().is_server());

    tokio::time::sleep(Duration::from_millis(150)).await;
    n1.step().await.unwrap();
    assert_eq!(n1.state().controller_failures(), 0);

    assert_eq!(controller.step().await, Step::Continue);
    assert!(controller.state().leader().last_heartbeat.is_some());

    let mut n2 = Node::start(transport.clone(), config()).await.unwrap();
    assert_eq!(controller.step().await, Step::Continue);

    n1.step().await.unwrap();
    assert!(n1.state().peers().contains(n2.address()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    n1.step().await.unwrap();
    n2.step().await.unwrap();
    assert!(n2.state().last_time().is_some());

    assert_ne!(transport.controller_address(), n1_address);
}

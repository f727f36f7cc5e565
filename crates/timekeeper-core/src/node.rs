// Node state machine
// A node registers with the controller, waits as a client, and broadcasts time once promoted

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use timekeeper_api::{Address, Message, MessageKind, Role};
use timekeeper_common::{format_utc, now_utc};
use timekeeper_transport::{Connection, Listener, Transport, deliver};

use crate::{
    config::CoordinationConfig,
    error::NodeError,
    membership::MemberSet,
    metrics::{
        BROADCAST_PEERS_PRUNED_TOTAL, CONTROLLER_REPORT_FAILURES_TOTAL,
        PROTOCOL_VIOLATIONS_TOTAL,
    },
    retry::{RetryBudget, RetryDecision},
};

/// Role and peer state, owned exclusively by the node loop
#[derive(Debug, Clone)]
pub struct NodeState {
    role: Role,
    peers: MemberSet,
    last_broadcast: Instant,
    controller_failures: RetryBudget,
    last_time: Option<DateTime<Utc>>,
}

impl NodeState {
    pub fn new(max_controller_failures: u32) -> Self {
        Self {
            role: Role::Client,
            peers: MemberSet::new(),
            last_broadcast: Instant::now(),
            controller_failures: RetryBudget::new(max_controller_failures),
            last_time: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn peers(&self) -> &MemberSet {
        &self.peers
    }

    /// Most recent time received from a leader while acting as client
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.last_time
    }

    /// Consecutive failed reports to the controller
    pub fn controller_failures(&self) -> u32 {
        self.controller_failures.failures()
    }

    /// Become the leader. Promotion is terminal.
    pub fn promote(&mut self, peers: impl IntoIterator<Item = Address>, now: Instant) {
        self.role = Role::Server;
        self.peers.extend(peers);
        self.last_broadcast = now;
    }

    pub fn add_peer(&mut self, address: Address) -> bool {
        self.peers.insert(address)
    }

    pub fn remove_peers(&mut self, addresses: &[Address]) {
        self.peers.remove_all(addresses);
    }

    /// Whether at least `interval` has passed since the last broadcast
    pub fn broadcast_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_broadcast) >= interval
    }
}

/// A registered participant
pub struct Node<T: Transport> {
    transport: T,
    listener: T::Listener,
    address: Address,
    controller: Address,
    config: CoordinationConfig,
    state: NodeState,
}

impl<T: Transport> Node<T> {
    /// Listen on a fresh address and register with the controller
    pub async fn start(transport: T, config: CoordinationConfig) -> Result<Self, NodeError> {
        let address = transport.generate_address();
        Self::start_at(transport, config, address).await
    }

    /// Listen on `address` and register with the controller.
    ///
    /// There is no retry: a controller that cannot be reached here is fatal.
    pub async fn start_at(
        transport: T,
        config: CoordinationConfig,
        address: Address,
    ) -> Result<Self, NodeError> {
        let listener = transport.listen(&address).await.map_err(NodeError::Listen)?;
        let address = listener.address().clone();
        let controller = transport.controller_address();

        deliver(
            &transport,
            &controller,
            &Message::new_client(address.clone()),
            config.startup_connect_timeout,
        )
        .await
        .map_err(NodeError::Startup)?;

        info!("Node {} registered with controller {}", address, controller);

        let state = NodeState::new(config.max_controller_report_failures);
        Ok(Self {
            transport,
            listener,
            address,
            controller,
            config,
            state,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// Run until a fatal condition is reached
    pub async fn run(&mut self) -> Result<(), NodeError> {
        loop {
            self.step().await?;
        }
    }

    /// One loop iteration for the current role
    pub async fn step(&mut self) -> Result<(), NodeError> {
        if self.state.is_server() {
            self.run_as_server().await;
            self.send_time().await
        } else {
            self.run_as_client().await
        }
    }

    /// Wait for a promotion or a time update; silence means we were orphaned
    pub async fn run_as_client(&mut self) -> Result<(), NodeError> {
        let timeout = self.config.client_accept_timeout;
        let Some(mut connection) = self.listener.accept(timeout).await else {
            return Err(NodeError::Orphaned(timeout));
        };

        let message = connection.receive().await;
        connection.close().await;
        if !message.delivered {
            debug!("Dropping undelivered message");
            return Ok(());
        }

        self.handle_as_client(message);
        Ok(())
    }

    /// Poll briefly for relayed registrations
    pub async fn run_as_server(&mut self) {
        let Some(mut connection) = self
            .listener
            .accept(self.config.server_accept_timeout)
            .await
        else {
            return;
        };

        let message = connection.receive().await;
        connection.close().await;
        if message.delivered {
            self.handle_as_server(message);
        }
    }

    pub fn handle_as_client(&mut self, message: Message) {
        match (message.role, message.kind) {
            (Role::Controller, MessageKind::SetServer) => {
                info!(
                    "Promoted to server with {} peers",
                    message.address_count()
                );
                self.state.promote(message.addresses, Instant::now());
            }
            (Role::Server, MessageKind::NewTime) => {
                info!("{}", format_utc(&message.timestamp));
                self.state.last_time = Some(message.timestamp);
            }
            _ => protocol_violation(&message, Role::Client),
        }
    }

    pub fn handle_as_server(&mut self, message: Message) {
        match (message.role, message.kind) {
            (Role::Controller, MessageKind::NewClient) => {
                if let Some(address) = message.first_address().cloned() {
                    info!("Adding peer {}", address);
                    self.state.add_peer(address);
                } else {
                    protocol_violation(&message, Role::Server);
                }
            }
            _ => protocol_violation(&message, Role::Server),
        }
    }

    /// Broadcast the current time to every peer, then report it to the controller.
    ///
    /// Does nothing until the broadcast interval has elapsed. Peers that
    /// cannot be reached are dropped for good. Failed reports count against
    /// the retry budget; exhausting it is fatal.
    pub async fn send_time(&mut self) -> Result<(), NodeError> {
        let now = Instant::now();
        if !self
            .state
            .broadcast_due(now, self.config.broadcast_interval)
        {
            return Ok(());
        }
        self.state.last_broadcast = now;

        let message = Message::new_time(now_utc());
        let mut failed = Vec::new();
        for peer in self.state.peers.iter().filter(|peer| **peer != self.address) {
            if let Err(e) = deliver(
                &self.transport,
                peer,
                &message,
                self.config.broadcast_connect_timeout,
            )
            .await
            {
                warn!("Could not send time to {}, dropping it: {}", peer, e);
                failed.push(peer.clone());
            }
        }
        if !failed.is_empty() {
            counter!(BROADCAST_PEERS_PRUNED_TOTAL).increment(failed.len() as u64);
            self.state.remove_peers(&failed);
        }

        match deliver(
            &self.transport,
            &self.controller,
            &message,
            self.config.controller_report_timeout,
        )
        .await
        {
            Ok(()) => {
                self.state.controller_failures.record_success();
                Ok(())
            }
            Err(e) => {
                counter!(CONTROLLER_REPORT_FAILURES_TOTAL).increment(1);
                match self.state.controller_failures.record_failure() {
                    RetryDecision::Retry { attempt, max } => {
                        warn!(
                            "Could not report time to controller ({}/{}): {}",
                            attempt, max, e
                        );
                        Ok(())
                    }
                    RetryDecision::Exhausted { attempts } => {
                        Err(NodeError::ControllerUnreachable { attempts })
                    }
                }
            }
        }
    }
}

fn protocol_violation(message: &Message, acting_as: Role) {
    counter!(PROTOCOL_VIOLATIONS_TOTAL).increment(1);
    warn!(
        "Protocol error: {} {} received while acting as {}",
        message.role, message.kind, acting_as
    );
}

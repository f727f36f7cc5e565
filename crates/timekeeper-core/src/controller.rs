// Controller state machine
// Tracks node membership, keeps a leader elected, and relays registrations to it

use std::time::Duration;

use metrics::{counter, gauge};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use timekeeper_api::{Address, Message, MessageKind, Role};
use timekeeper_common::{MAX_ADDRESSES, format_utc};
use timekeeper_transport::{Connection, Listener, Transport, deliver};

use crate::{
    config::{AdmissionPolicy, CoordinationConfig},
    error::ControllerError,
    membership::MemberSet,
    metrics::{
        ELECTION_CANDIDATES_PRUNED_TOTAL, ELECTIONS_TOTAL, HEARTBEATS_TOTAL, MEMBERS,
        PROTOCOL_VIOLATIONS_TOTAL,
    },
};

/// Result of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Address added to membership
    Admitted,
    /// Address added even though the configured cap was reached
    AdmittedOverCap,
    /// Address was already a member
    AlreadyMember,
    /// Membership is full; address dropped
    Rejected,
}

impl Admission {
    pub fn is_member(self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

/// What the controller knows about the current leader
#[derive(Debug, Clone, Default)]
pub struct LeaderState {
    /// Address of the last successfully promoted node
    pub address: Option<Address>,
    /// Receipt time of the last time report from a leader
    pub last_heartbeat: Option<Instant>,
}

/// Membership and leader state, owned exclusively by the controller loop
#[derive(Debug, Default)]
pub struct ControllerState {
    members: MemberSet,
    leader: LeaderState,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> &MemberSet {
        &self.members
    }

    pub fn leader(&self) -> &LeaderState {
        &self.leader
    }

    /// Add a node to membership under the given cap and policy
    pub fn admit(
        &mut self,
        address: Address,
        max_members: usize,
        policy: AdmissionPolicy,
    ) -> Admission {
        if self.members.contains(&address) {
            return Admission::AlreadyMember;
        }

        let admission = if self.members.len() < max_members {
            Admission::Admitted
        } else {
            match policy {
                AdmissionPolicy::WarnAndAdmit if self.members.len() < MAX_ADDRESSES => {
                    Admission::AdmittedOverCap
                }
                _ => Admission::Rejected,
            }
        };

        if admission.is_member() {
            self.members.insert(address);
            gauge!(MEMBERS).set(self.members.len() as f64);
        }
        admission
    }

    /// Remove a node that could not be reached
    pub fn prune(&mut self, address: &Address) {
        if self.members.remove(address) {
            gauge!(MEMBERS).set(self.members.len() as f64);
        }
    }

    /// A time report from the leader arrived at `now`
    pub fn record_heartbeat(&mut self, now: Instant) {
        self.leader.last_heartbeat = Some(now);
    }

    /// Whether the leader is unknown, has never reported, or reported too long ago
    pub fn leader_is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        if self.leader.address.is_none() {
            return true;
        }
        match self.leader.last_heartbeat {
            Some(at) => now.saturating_duration_since(at) > stale_after,
            None => true,
        }
    }

    fn set_leader(&mut self, address: Option<Address>) {
        self.leader.address = address;
    }
}

/// Outcome of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit,
}

/// Why the controller loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerExit {
    /// Every known node was unreachable; there is nobody left to lead
    MembershipExhausted,
}

/// The coordination process
pub struct Controller<T: Transport> {
    transport: T,
    listener: T::Listener,
    config: CoordinationConfig,
    state: ControllerState,
}

impl<T: Transport> Controller<T> {
    /// Listen on the transport's well-known controller address
    pub async fn bind(transport: T, config: CoordinationConfig) -> Result<Self, ControllerError> {
        let address = transport.controller_address();
        let listener = transport
            .listen(&address)
            .await
            .map_err(ControllerError::Listen)?;

        info!("Controller listening on {}", listener.address());

        Ok(Self {
            transport,
            listener,
            config,
            state: ControllerState::new(),
        })
    }

    pub fn address(&self) -> &Address {
        self.listener.address()
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Run until membership is exhausted
    pub async fn run(&mut self) -> ControllerExit {
        info!("Controller is running...");
        loop {
            if self.step().await == Step::Exit {
                info!("Membership exhausted, controller stopping");
                return ControllerExit::MembershipExhausted;
            }
        }
    }

    /// Accept and handle at most one inbound message
    pub async fn step(&mut self) -> Step {
        let Some(mut connection) = self
            .listener
            .accept(self.config.controller_accept_timeout)
            .await
        else {
            debug!(
                "No message within {:?}",
                self.config.controller_accept_timeout
            );
            self.choose_new_server().await;
            return self.continue_while_members();
        };

        let message = connection.receive().await;
        connection.close().await;
        if !message.delivered {
            return Step::Continue;
        }

        self.handle(message).await
    }

    /// Interpret one delivered message by sender role and kind
    pub async fn handle(&mut self, message: Message) -> Step {
        if message.kind == MessageKind::TestController {
            debug!("Liveness probe received");
            return Step::Continue;
        }

        match (message.role, message.kind) {
            (Role::Client, MessageKind::NewClient) => {
                let Some(address) = message.first_address().cloned() else {
                    protocol_violation(&message, "registration without an address");
                    return Step::Continue;
                };
                info!("Got NEW_CLIENT from {}", address);
                match self.state.admit(
                    address.clone(),
                    self.config.max_members,
                    self.config.admission_policy,
                ) {
                    Admission::Rejected => {
                        warn!("Too many nodes, rejected {}", address);
                        return Step::Continue;
                    }
                    Admission::AdmittedOverCap => {
                        warn!(
                            "Too many nodes, admitting {} over the cap of {}",
                            address, self.config.max_members
                        );
                    }
                    Admission::Admitted | Admission::AlreadyMember => {}
                }
            }
            (Role::Server, MessageKind::NewTime) => {
                self.state.record_heartbeat(Instant::now());
                counter!(HEARTBEATS_TOTAL).increment(1);
                info!("Got new time: {}", format_utc(&message.timestamp));
                return Step::Continue;
            }
            (Role::Client, _) => {
                protocol_violation(&message, "unexpected message kind from client");
                return Step::Continue;
            }
            (Role::Server, _) => {
                protocol_violation(&message, "unexpected message kind from server");
                return Step::Continue;
            }
            (Role::Controller, _) => {
                protocol_violation(&message, "controller message received by controller");
                return Step::Continue;
            }
        }

        if self
            .state
            .leader_is_stale(Instant::now(), self.config.leader_stale_after)
        {
            self.choose_new_server().await;
            if self.state.members.is_empty() {
                return Step::Exit;
            }
        }

        self.relay(message).await
    }

    /// Forward a registration to the leader, re-electing until one accepts it
    async fn relay(&mut self, message: Message) -> Step {
        let message = message.with_role(Role::Controller);

        while !self.state.members.is_empty() {
            let Some(leader) = self.state.leader.address.clone() else {
                self.choose_new_server().await;
                continue;
            };

            match deliver(
                &self.transport,
                &leader,
                &message,
                self.config.relay_connect_timeout,
            )
            .await
            {
                Ok(()) => {
                    debug!("Relayed registration to leader {}", leader);
                    return Step::Continue;
                }
                Err(e) => {
                    warn!("Could not relay registration to leader {}: {}", leader, e);
                    self.choose_new_server().await;
                }
            }
        }

        Step::Exit
    }

    /// Offer leadership to members in order until one accepts.
    ///
    /// A candidate that cannot be reached is removed from membership and not
    /// retried in the same pass. Returns the new leader, if any.
    pub async fn choose_new_server(&mut self) -> Option<Address> {
        if self.state.members.is_empty() {
            self.state.set_leader(None);
            return None;
        }

        info!("Server died or not set yet. Choosing new server...");
        counter!(ELECTIONS_TOTAL).increment(1);

        while let Some(candidate) = self.state.members.first().cloned() {
            let message = Message::set_server(self.state.members.to_vec());
            info!("Attempt to make {} the server", candidate);

            match deliver(
                &self.transport,
                &candidate,
                &message,
                self.config.election_connect_timeout,
            )
            .await
            {
                Ok(()) => {
                    info!("Successfully made {} the server", candidate);
                    self.state.set_leader(Some(candidate.clone()));
                    return Some(candidate);
                }
                Err(e) => {
                    warn!("Candidate {} unreachable, removing: {}", candidate, e);
                    counter!(ELECTION_CANDIDATES_PRUNED_TOTAL).increment(1);
                    self.state.prune(&candidate);
                }
            }
        }

        warn!("No reachable candidate left");
        self.state.set_leader(None);
        None
    }

    fn continue_while_members(&self) -> Step {
        if self.state.members.is_empty() {
            Step::Exit
        } else {
            Step::Continue
        }
    }
}

fn protocol_violation(message: &Message, reason: &str) {
    counter!(PROTOCOL_VIOLATIONS_TOTAL).increment(1);
    warn!(
        "Protocol error: {} ({} {})",
        reason, message.role, message.kind
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use timekeeper_transport::MemoryTransport;

    fn addr(raw: &str) -> Address {
        Address::from(raw)
    }

    #[test]
    fn test_admit_is_idempotent() {
        let mut state = ControllerState::new();
        assert_eq!(
            state.admit(addr("n1"), 16, AdmissionPolicy::Reject),
            Admission::Admitted
        );
        assert_eq!(
            state.admit(addr("n1"), 16, AdmissionPolicy::Reject),
            Admission::AlreadyMember
        );
        assert_eq!(state.members().len(), 1);
    }

    #[test]
    fn test_admit_over_cap() {
        let mut state = ControllerState::new();
        state.admit(addr("n1"), 2, AdmissionPolicy::Reject);
        state.admit(addr("n2"), 2, AdmissionPolicy::Reject);

        assert_eq!(
            state.admit(addr("n3"), 2, AdmissionPolicy::Reject),
            Admission::Rejected
        );
        assert!(!state.members().contains(&addr("n3")));

        assert_eq!(
            state.admit(addr("n3"), 2, AdmissionPolicy::WarnAndAdmit),
            Admission::AdmittedOverCap
        );
        assert!(state.members().contains(&addr("n3")));
    }

    #[test]
    fn test_warn_and_admit_stops_at_wire_limit() {
        let mut state = ControllerState::new();
        for i in 0..MAX_ADDRESSES {
            state.admit(
                Address::new(format!("n{}", i)),
                1,
                AdmissionPolicy::WarnAndAdmit,
            );
        }
        assert_eq!(state.members().len(), MAX_ADDRESSES);
        assert_eq!(
            state.admit(addr("extra"), 1, AdmissionPolicy::WarnAndAdmit),
            Admission::Rejected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness() {
        let stale_after = Duration::from_secs(6);
        let mut state = ControllerState::new();
        assert!(state.leader_is_stale(Instant::now(), stale_after));

        state.set_leader(Some(addr("n1")));
        assert!(state.leader_is_stale(Instant::now(), stale_after));

        state.record_heartbeat(Instant::now());
        assert!(!state.leader_is_stale(Instant::now(), stale_after));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!state.leader_is_stale(Instant::now(), stale_after));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(state.leader_is_stale(Instant::now(), stale_after));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_controller_with_no_members_exits() {
        let transport = MemoryTransport::new();
        let mut controller = Controller::bind(transport, CoordinationConfig::default())
            .await
            .unwrap();
        assert_eq!(controller.run().await, ControllerExit::MembershipExhausted);
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let transport = MemoryTransport::new();
        let _first = Controller::bind(transport.clone(), CoordinationConfig::default())
            .await
            .unwrap();
        let second = Controller::bind(transport, CoordinationConfig::default()).await;
        assert!(matches!(second, Err(ControllerError::Listen(_))));
    }

    #[tokio::test]
    async fn test_probe_and_violations_leave_state_untouched() {
        let transport = MemoryTransport::new();
        let mut controller = Controller::bind(transport, CoordinationConfig::default())
            .await
            .unwrap();

        let messages = [
            Message::test_controller(),
            Message::test_controller().with_role(Role::Server),
            Message::set_server(vec![addr("n1")]).with_role(Role::Client),
            Message::new_client(addr("n1")).with_role(Role::Server),
            Message::new_client(addr("n1")).with_role(Role::Controller),
            Message::new(Role::Client, MessageKind::NewClient),
        ];
        for message in messages {
            assert_eq!(controller.handle(message.mark_delivered()).await, Step::Continue);
        }

        assert!(controller.state().members().is_empty());
        assert!(controller.state().leader().address.is_none());
        assert!(controller.state().leader().last_heartbeat.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_is_not_relayed() {
        let transport = MemoryTransport::new();
        let mut controller = Controller::bind(transport, CoordinationConfig::default())
            .await
            .unwrap();

        let step = controller
            .handle(Message::new_time(chrono::Utc::now()).mark_delivered())
            .await;
        assert_eq!(step, Step::Continue);
        assert!(controller.state().leader().last_heartbeat.is_some());
        assert!(controller.state().members().is_empty());
    }

    #[tokio::test]
    async fn test_election_prunes_unreachable_in_order() {
        let transport = MemoryTransport::new();
        let mut controller = Controller::bind(transport.clone(), CoordinationConfig::default())
            .await
            .unwrap();

        let mut reachable = transport.listen(&addr("n3")).await.unwrap();
        for raw in ["n1", "n2", "n3", "n4"] {
            controller
                .state
                .admit(addr(raw), 16, AdmissionPolicy::Reject);
        }

        let leader = controller.choose_new_server().await;
        assert_eq!(leader, Some(addr("n3")));
        assert_eq!(controller.state().members().to_vec(), vec![addr("n3"), addr("n4")]);

        let mut connection = reachable.accept(Duration::from_secs(1)).await.unwrap();
        let promotion = connection.receive().await;
        assert_eq!(promotion.role, Role::Controller);
        assert_eq!(promotion.kind, MessageKind::SetServer);
        assert_eq!(promotion.addresses, vec![addr("n3"), addr("n4")]);
    }

    #[tokio::test]
    async fn test_election_with_nobody_reachable_clears_leader() {
        let transport = MemoryTransport::new();
        let mut controller = Controller::bind(transport, CoordinationConfig::default())
            .await
            .unwrap();
        controller
            .state
            .admit(addr("ghost"), 16, AdmissionPolicy::Reject);

        assert_eq!(controller.choose_new_server().await, None);
        assert!(controller.state().members().is_empty());
        assert!(controller.state().leader().address.is_none());
    }

    #[tokio::test]
    async fn test_registration_of_unreachable_node_exits() {
        let transport = MemoryTransport::new();
        let mut controller = Controller::bind(transport, CoordinationConfig::default())
            .await
            .unwrap();

        let step = controller
            .handle(Message::new_client(addr("ghost")).mark_delivered())
            .await;
        assert_eq!(step, Step::Exit);
    }
}

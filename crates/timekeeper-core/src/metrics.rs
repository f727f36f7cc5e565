// Metrics for the coordination loops
// Counters and gauges recorded through the `metrics` facade; a no-op until a recorder is installed

use metrics::{describe_counter, describe_gauge};

pub const ELECTIONS_TOTAL: &str = "timekeeper_elections_total";
pub const ELECTION_CANDIDATES_PRUNED_TOTAL: &str = "timekeeper_election_candidates_pruned_total";
pub const MEMBERS: &str = "timekeeper_members";
pub const PROTOCOL_VIOLATIONS_TOTAL: &str = "timekeeper_protocol_violations_total";
pub const HEARTBEATS_TOTAL: &str = "timekeeper_heartbeats_total";
pub const BROADCAST_PEERS_PRUNED_TOTAL: &str = "timekeeper_broadcast_peers_pruned_total";
pub const CONTROLLER_REPORT_FAILURES_TOTAL: &str = "timekeeper_controller_report_failures_total";

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn describe_metrics() {
    describe_counter!(ELECTIONS_TOTAL, "Total number of elections started");
    describe_counter!(
        ELECTION_CANDIDATES_PRUNED_TOTAL,
        "Candidates removed from membership because they could not be promoted"
    );
    describe_gauge!(MEMBERS, "Current number of nodes known to the controller");
    describe_counter!(
        PROTOCOL_VIOLATIONS_TOTAL,
        "Messages discarded because their kind does not match the sender role"
    );
    describe_counter!(HEARTBEATS_TOTAL, "Time reports received from the leader");
    describe_counter!(
        BROADCAST_PEERS_PRUNED_TOTAL,
        "Peers dropped by the leader after a failed broadcast"
    );
    describe_counter!(
        CONTROLLER_REPORT_FAILURES_TOTAL,
        "Failed time reports from the leader to the controller"
    );
}

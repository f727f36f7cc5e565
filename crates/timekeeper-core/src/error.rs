//! Fatal conditions of the coordination loops
//!
//! Transport failures and protocol violations are handled inside the loops.
//! Only the conditions below end a loop; the binary maps them to a process exit.

use timekeeper_common::TransportError;

/// Conditions that terminate a node
#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error("cannot open node endpoint: {0}")]
    Listen(#[source] TransportError),

    #[error("cannot register with the controller: {0}")]
    Startup(#[source] TransportError),

    #[error("no contact from controller or leader within {0:?}, assuming orphaned")]
    Orphaned(std::time::Duration),

    #[error("controller unreachable after {attempts} consecutive attempts")]
    ControllerUnreachable { attempts: u32 },
}

/// Conditions that prevent the controller from running
#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error("cannot listen on controller address: {0}")]
    Listen(#[source] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_node_error_display() {
        assert_eq!(
            NodeError::ControllerUnreachable { attempts: 7 }.to_string(),
            "controller unreachable after 7 consecutive attempts"
        );
        assert_eq!(
            NodeError::Orphaned(Duration::from_secs(10)).to_string(),
            "no contact from controller or leader within 10s, assuming orphaned"
        );
    }

    #[test]
    fn test_startup_error_keeps_source() {
        let err = NodeError::Startup(TransportError::Unreachable("ctl".to_string()));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "endpoint 'ctl' is not reachable");
    }
}

// Controller discovery for node mode
// Probes the well-known controller address and launches a controller process when nobody answers

use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use timekeeper_api::Message;
use timekeeper_transport::{Transport, deliver};

/// Connect timeout for the liveness probe
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Time a freshly spawned controller gets to start listening
pub const SPAWN_GRACE: Duration = Duration::from_millis(200);

/// Whether a controller answers at the transport's well-known address
pub async fn probe_controller<T: Transport + ?Sized>(transport: &T) -> bool {
    deliver(
        transport,
        &transport.controller_address(),
        &Message::test_controller(),
        PROBE_TIMEOUT,
    )
    .await
    .is_ok()
}

/// Detach `command` from this process: no inherited stdio and, on unix, its own
/// process group so a terminal interrupt aimed at the node does not reach it
pub fn detach(command: &mut Command) -> &mut Command {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command
}

/// Start this executable in controller mode as a separate process.
///
/// The child is not waited on; it outlives the node that started it. Its
/// output is discarded, so it only logs when file logging is configured.
pub fn spawn_controller(args: &[String]) -> anyhow::Result<Child> {
    let exe = std::env::current_exe().context("Cannot locate the current executable")?;
    detach(Command::new(exe).args(args))
        .spawn()
        .context("Failed to start a controller process")
}

/// Make sure a controller is running before a node registers
pub async fn ensure_controller<T: Transport + ?Sized>(
    transport: &T,
    controller_args: &[String],
) -> anyhow::Result<()> {
    if probe_controller(transport).await {
        return Ok(());
    }

    info!(
        "No controller at {}, starting one",
        transport.controller_address()
    );
    let child = spawn_controller(controller_args)?;
    info!("Controller process started, pid {}", child.id());
    tokio::time::sleep(SPAWN_GRACE).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use timekeeper_transport::{Connection, Listener, MemoryTransport};
    use timekeeper_api::MessageKind;

    #[tokio::test]
    async fn test_probe_without_controller() {
        let transport = MemoryTransport::new();
        assert!(!probe_controller(&transport).await);
    }

    #[tokio::test]
    async fn test_probe_reaches_controller() {
        let transport = MemoryTransport::new();
        let mut controller = transport
            .listen(&transport.controller_address())
            .await
            .unwrap();

        assert!(probe_controller(&transport).await);

        let mut connection = controller.accept(Duration::from_secs(1)).await.unwrap();
        let probe = connection.receive().await;
        assert!(probe.delivered);
        assert_eq!(probe.kind, MessageKind::TestController);
    }

    /// Process group id of `pid`, read from procfs
    #[cfg(target_os = "linux")]
    fn process_group_of(pid: u32) -> u32 {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap();
        let after_name = &stat[stat.rfind(')').unwrap() + 1..];
        // state, ppid, pgrp
        after_name.split_whitespace().nth(2).unwrap().parse().unwrap()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_detached_child_leads_its_own_process_group() {
        let mut child = detach(Command::new("sleep").arg("5")).spawn().unwrap();
        let pid = child.id();

        assert_eq!(process_group_of(pid), pid);
        assert_ne!(process_group_of(pid), process_group_of(std::process::id()));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_ensure_controller_is_noop_when_running() {
        let transport = MemoryTransport::new();
        let _controller = transport
            .listen(&transport.controller_address())
            .await
            .unwrap();

        ensure_controller(&transport, &[]).await.unwrap();
    }
}

//! Local equipment simulator.
//!
//! `navwatch sim <port> [interval_ms]` blasts encoded monitor bytes at
//! `127.0.0.1:<port>`, cycling through every path-state × severity
//! combination.  Loopback traffic identifies by port, so the simulator needs
//! no per-equipment source address configuration.

use std::time::Duration;

use colored::Colorize;
use navwatch_codec::encode;
use navwatch_types::{PathState, Severity};
use tokio::net::UdpSocket;
use tracing::info;

const DEFAULT_INTERVAL: Duration = Duration::from_millis(1_000);

/// Every path-state × severity combination, in transmission order.
fn cycle() -> [(PathState, Severity); 8] {
    [
        (PathState::Active, Severity::Normal),
        (PathState::Active, Severity::Warning),
        (PathState::Active, Severity::Alarm),
        (PathState::Active, Severity::Fault),
        (PathState::Standby, Severity::Normal),
        (PathState::Standby, Severity::Warning),
        (PathState::Standby, Severity::Alarm),
        (PathState::Standby, Severity::Fault),
    ]
}

/// Build one simulated datagram: a filler byte followed by the monitor
/// byte, exercising the receiver's offset scan.
fn build_packet(path_state: PathState, severity: Severity) -> Vec<u8> {
    vec![0x00, encode(path_state, severity)]
}

/// Run the simulator until the process is killed.
pub async fn run(target_port: u16, interval: Option<Duration>) -> std::io::Result<()> {
    let interval = interval.unwrap_or(DEFAULT_INTERVAL);
    let socket = UdpSocket::bind("127.0.0.1:0").await?;

    println!(
        "  Simulating equipment on {} every {} ms.  Ctrl-C to stop.\n",
        format!("udp://127.0.0.1:{target_port}").bold(),
        interval.as_millis()
    );

    let mut ticker = tokio::time::interval(interval);
    loop {
        for (path_state, severity) in cycle() {
            ticker.tick().await;
            let packet = build_packet(path_state, severity);
            socket.send_to(&packet, ("127.0.0.1", target_port)).await?;
            info!(
                port = target_port,
                byte = format!("{:08b}", packet[1]),
                ?path_state,
                ?severity,
                "simulated packet sent"
            );
        }
    }
}

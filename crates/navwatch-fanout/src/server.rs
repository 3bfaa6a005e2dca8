//! [`FanoutServer`] – WebSocket fanout with subscriber heartbeat.
//!
//! * WebSocket upgrades → a per-subscriber bridge to the event bus: an
//!   initial snapshot of every current status, then the live event stream.
//! * Plain HTTP requests → 200 OK with the current status map as JSON
//!   (diagnostic surface; the real REST router is an external collaborator).
//!
//! Each subscriber is probed with a WebSocket Ping once per heartbeat
//! interval; a subscriber that has not answered with a Pong within two
//! intervals is treated as dead and dropped.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use navwatch_bus::EventBus;
use navwatch_tracker::EquipmentTracker;
use navwatch_types::NavError;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Bytes, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default TCP port for the fanout server.
pub const DEFAULT_PORT: u16 = 8901;

/// Default subscriber heartbeat probe interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// WebSocket server that fans status-change events out to every connected
/// subscriber.
///
/// # Example
///
/// ```rust,no_run
/// use navwatch_bus::EventBus;
/// use navwatch_fanout::FanoutServer;
/// use navwatch_tracker::EquipmentTracker;
///
/// #[tokio::main]
/// async fn main() {
///     let bus = EventBus::default();
///     let tracker = EquipmentTracker::default();
///     FanoutServer::new(bus, tracker)
///         .run()
///         .await
///         .expect("fanout server failed");
/// }
/// ```
pub struct FanoutServer {
    bus: EventBus,
    tracker: EquipmentTracker,
    port: u16,
    heartbeat_interval: Duration,
}

impl FanoutServer {
    /// Create a server on the [`DEFAULT_PORT`] with the
    /// [`DEFAULT_HEARTBEAT_INTERVAL`].
    pub fn new(bus: EventBus, tracker: EquipmentTracker) -> Self {
        Self {
            bus,
            tracker,
            port: DEFAULT_PORT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the heartbeat probe interval (builder-style).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Return the configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start the server and accept subscribers until the task is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::Bind`] when the TCP listener cannot bind.
    pub async fn run(self) -> Result<(), NavError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| NavError::Bind {
            port: self.port,
            details: e.to_string(),
        })?;

        info!(port = self.port, "fanout server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bus = self.bus.clone();
                    let tracker = self.tracker.clone();
                    let heartbeat = self.heartbeat_interval;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, bus, tracker, heartbeat).await
                        {
                            debug!(%peer, error = %e, "subscriber connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept error");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    bus: EventBus,
    tracker: EquipmentTracker,
    heartbeat_interval: Duration,
) -> Result<(), NavError> {
    // Peek at the request head to decide between a WebSocket upgrade and a
    // plain HTTP snapshot.  `peek` does not consume the bytes, so the
    // tungstenite handshaker still sees the full request.
    let mut buf = [0u8; 1024];
    let n = stream.peek(&mut buf).await.map_err(|e| NavError::Channel(format!(
        "peek error from {peer}: {e}"
    )))?;

    let head = String::from_utf8_lossy(&buf[..n]);
    let is_ws_upgrade = head.lines().any(|line| {
        line.to_lowercase().starts_with("upgrade:") && line.to_lowercase().contains("websocket")
    });

    if is_ws_upgrade {
        handle_subscriber(stream, peer, bus, tracker, heartbeat_interval).await
    } else {
        serve_snapshot(stream, &tracker).await
    }
}

// ---------------------------------------------------------------------------
// Plain HTTP: current status map as JSON
// ---------------------------------------------------------------------------

async fn serve_snapshot(mut stream: TcpStream, tracker: &EquipmentTracker) -> Result<(), NavError> {
    let body = snapshot_frame(tracker);
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/json; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| NavError::Channel(format!("http write error: {e}")))?;
    Ok(())
}

/// JSON frame describing every current status.  Sent to each WebSocket
/// subscriber on connect and as the plain-HTTP response body.
fn snapshot_frame(tracker: &EquipmentTracker) -> String {
    json!({
        "type": "snapshot",
        "statuses": tracker.all_statuses(),
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// WebSocket subscriber bridge
// ---------------------------------------------------------------------------

async fn handle_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    bus: EventBus,
    tracker: EquipmentTracker,
    heartbeat_interval: Duration,
) -> Result<(), NavError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| NavError::Channel(format!("ws handshake from {peer}: {e}")))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut events = bus.subscribe();

    info!(%peer, "subscriber connected");

    // New subscribers start from the complete current picture, then follow
    // the live stream.
    if ws_tx
        .send(Message::Text(snapshot_frame(&tracker).into()))
        .await
        .is_err()
    {
        return Ok(());
    }

    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.tick().await; // the immediate first tick
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            // ── Downstream: bus → subscriber, FIFO per sink ────────────────
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(frame) => {
                            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                                // Failed sink: log and drop this subscriber;
                                // the others are unaffected.
                                warn!(%peer, "delivery failed; dropping subscriber");
                                break;
                            }
                        }
                        Err(e) => warn!(%peer, error = %e, "event serialization failed"),
                    },
                    None => break,
                }
            }
            // ── Heartbeat probe ────────────────────────────────────────────
            _ = ticker.tick() => {
                if last_pong.elapsed() > heartbeat_interval * 2 {
                    warn!(%peer, "subscriber missed two heartbeats; dropping");
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            // ── Upstream: pongs and closes ─────────────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    info!(%peer, "subscriber disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use navwatch_codec::decode;
    use navwatch_types::{Event, EventPayload};
    use tokio_tungstenite::connect_async;

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
        listener.local_addr().expect("local addr").port()
    }

    fn record(tracker: &EquipmentTracker, id: &str, byte: u8) -> navwatch_types::EquipmentStatus {
        tracker.record_status(
            id,
            &decode(byte).unwrap(),
            "127.0.0.1".parse().unwrap(),
            40000,
            5001,
        )
    }

    async fn spawn_server(
        bus: EventBus,
        tracker: EquipmentTracker,
        heartbeat: Duration,
    ) -> u16 {
        let port = free_port();
        let server = FanoutServer::new(bus, tracker)
            .with_port(port)
            .with_heartbeat_interval(heartbeat);
        tokio::spawn(server.run());

        // Wait for the listener to come up.
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                return port;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("fanout server did not come up on port {port}");
    }

    #[test]
    fn default_port_and_builders() {
        let server = FanoutServer::new(EventBus::default(), EquipmentTracker::default());
        assert_eq!(server.port(), DEFAULT_PORT);

        let server = server.with_port(9999);
        assert_eq!(server.port(), 9999);
    }

    #[test]
    fn snapshot_frame_contains_all_statuses() {
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0xA8);
        record(&tracker, "gp", 0x98);

        let frame = snapshot_frame(&tracker);
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["type"], "snapshot");
        assert_eq!(parsed["statuses"]["dme"]["severity"], "WARNING");
        assert_eq!(parsed["statuses"]["gp"]["severity"], "FAULT");
    }

    #[tokio::test]
    async fn subscriber_gets_snapshot_then_live_events() {
        let bus = EventBus::default();
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0xA0);
        let port = spawn_server(bus.clone(), tracker.clone(), Duration::from_secs(10)).await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .expect("connect");

        // First frame: the snapshot.
        let first = ws.next().await.expect("frame").expect("ok");
        let parsed: serde_json::Value =
            serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(parsed["type"], "snapshot");
        assert_eq!(parsed["statuses"]["dme"]["severity"], "NORMAL");

        // Then the live stream.
        let status = record(&tracker, "dme", 0xB8);
        bus.publish(Event::now(
            "test",
            EventPayload::StatusChanged {
                equipment_id: "dme".to_string(),
                status,
            },
        ));

        let second = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("event frame")
            .expect("frame")
            .expect("ok");
        let event: Event = serde_json::from_str(second.to_text().unwrap()).unwrap();
        match event.payload {
            EventPayload::StatusChanged { equipment_id, status } => {
                assert_eq!(equipment_id, "dme");
                assert_eq!(status.severity, navwatch_types::Severity::Fault);
            }
            other => panic!("expected StatusChanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_dead_sink_does_not_block_the_others() {
        let bus = EventBus::default();
        let tracker = EquipmentTracker::default();
        let port = spawn_server(bus.clone(), tracker.clone(), Duration::from_secs(10)).await;

        let (mut alive, _) = connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .expect("connect alive");
        let (mut doomed, _) = connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .expect("connect doomed");

        // Drain both snapshots, then kill one subscriber abruptly.
        alive.next().await.expect("snapshot").expect("ok");
        doomed.next().await.expect("snapshot").expect("ok");
        drop(doomed);

        let status = record(&tracker, "loc", 0xB0);
        bus.publish(Event::now(
            "test",
            EventPayload::StatusChanged {
                equipment_id: "loc".to_string(),
                status,
            },
        ));

        // The surviving subscriber still gets the event.
        let frame = tokio::time::timeout(Duration::from_secs(2), alive.next())
            .await
            .expect("event frame")
            .expect("frame")
            .expect("ok");
        let event: Event = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert!(matches!(event.payload, EventPayload::StatusChanged { .. }));
    }

    #[tokio::test]
    async fn silent_subscriber_is_dropped_after_two_heartbeats() {
        let bus = EventBus::default();
        let tracker = EquipmentTracker::default();
        let port = spawn_server(bus, tracker, Duration::from_millis(50)).await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .expect("connect");
        ws.next().await.expect("snapshot").expect("ok");

        // Stop polling the socket entirely: no reads means no automatic pong
        // replies, so the server sees a dead subscriber.
        tokio::time::sleep(Duration::from_millis(400)).await;

        // The server dropped us; draining the buffered pings must end in a
        // close or a reset, never more data frames.
        for _ in 0..16 {
            let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("connection should have been closed");
            match next {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => panic!("expected close, got {other:?}"),
            }
        }
        panic!("server never closed the silent subscriber");
    }

    #[tokio::test]
    async fn plain_http_request_serves_status_json() {
        use tokio::io::AsyncReadExt;

        let bus = EventBus::default();
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0x90);
        let port = spawn_server(bus, tracker, Duration::from_secs(10)).await;

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect");
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .expect("write");

        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("application/json"));
        assert!(response.contains("\"dme\""));
        assert!(response.contains("ALARM"));
    }
}

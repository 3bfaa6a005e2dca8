//! Broadcast channel carrying status-change and port-change events.

use navwatch_types::Event;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus.  Clone it cheaply – all clones share the same underlying
/// broadcast channel.
///
/// Publication is fire-and-forget: delivery is best-effort, per-subscriber
/// order equals publish order, and a bus with zero subscribers is a normal
/// condition (the fanout server may simply have no clients yet).
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns the number of subscribers the event was handed to.  Zero
    /// subscribers is not an error; the event is simply dropped.
    pub fn publish(&self, event: Event) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(_)) => 0,
        }
    }

    /// Register a new subscriber.
    ///
    /// The returned [`EventStream`] yields every event published after this
    /// call, in publish order.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of currently-registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver of bus events.  Obtained via [`EventBus::subscribe`].
pub struct EventStream {
    receiver: broadcast::Receiver<Event>,
}

impl EventStream {
    /// Wait for the next event.
    ///
    /// Returns `None` when the bus has shut down.  A subscriber that falls
    /// behind the channel buffer has the gap logged and skipped rather than
    /// treated as fatal – best-effort delivery, not exactly-once.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "event bus subscriber lagged; events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when no event is
    /// currently buffered.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(dropped = n, "event bus subscriber lagged; events dropped");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}

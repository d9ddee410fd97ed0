/*!
 * Outbound event fanout.
 *
 * Device lifecycle events, device-initiated messages and scan completion all
 * funnel into one ordered stream of protocol messages. The fanout imposes no
 * buffering contract of its own beyond the channel capacity; messages are
 * delivered to each subscriber in publish order.
 */
use tokio::sync::broadcast;
use tracing::trace;

use devrelay_core::message::ServerMessage;

/// Publisher side of the unsolicited-message stream.
#[derive(Debug, Clone)]
pub struct EventFanout {
    sender: broadcast::Sender<ServerMessage>,
}

impl EventFanout {
    /// Create a fanout with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the outbound stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.sender.subscribe()
    }

    /// Publish one outbound message.
    pub fn publish(&self, msg: ServerMessage) {
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(msg);
        } else {
            trace!("no subscriber for outbound message, dropping");
        }
    }
}

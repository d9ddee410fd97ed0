/*!
 * The device contract.
 *
 * A device is owned by the subtype manager that discovered it; the device
 * manager only sees this trait. Command translation happens behind
 * [`Device::parse_message`], device lifecycle and device-initiated protocol
 * messages surface through the broadcast stream returned by
 * [`Device::subscribe`].
 */
use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use devrelay_core::error::Result;
use devrelay_core::message::{AllowedMessages, ClientMessage, ServerMessage};

/// Events a device pushes to its registry entry.
#[derive(Debug, Clone)]
pub enum DeviceNotice {
    /// The physical device went away; the registry entry must be torn down
    Removed,
    /// A device-initiated protocol message (e.g. a sensor reading),
    /// forwarded to the client verbatim
    Message(ServerMessage),
}

/// A hardware device reachable through a subtype manager.
#[async_trait]
pub trait Device: Send + Sync + Debug {
    /// Opaque identifier, stable for this physical device within a session
    /// (typically derived from the hardware address).
    fn identifier(&self) -> &str;

    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Whether the device is currently reachable.
    fn connected(&self) -> bool;

    /// The device-command kinds this device accepts, with per-kind
    /// attributes. Unfiltered; the registry applies spec-version gating.
    fn allowed_messages(&self) -> AllowedMessages;

    /// Translate and execute one protocol message on the device.
    ///
    /// Returns the reply to send to the client. A cancelled token must
    /// surface as [`Error::Cancelled`](devrelay_core::error::Error) without
    /// affecting the device's usability for later messages.
    async fn parse_message(
        &self,
        msg: ClientMessage,
        cancel: CancellationToken,
    ) -> Result<ServerMessage>;

    /// Tear down the connection to the device.
    async fn disconnect(&self) -> Result<()>;

    /// Subscribe to removal and device-initiated message events.
    fn subscribe(&self) -> broadcast::Receiver<DeviceNotice>;
}

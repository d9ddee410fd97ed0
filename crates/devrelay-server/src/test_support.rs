/*!
 * Shared test fixtures: a scriptable device and subtype manager.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use devrelay_core::error::{Error, Result};
use devrelay_core::message::{
    AllowedMessages, ClientMessage, DeviceMessageKind, ErrorCode, MessageAttributes, ServerMessage,
};

use crate::device::{Device, DeviceNotice};
use crate::manager::{ManagerEvent, SubtypeManager};

/// Receive the next outbound message, failing the test after one second.
pub async fn next_event(rx: &mut broadcast::Receiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for an outbound message")
        .expect("outbound stream closed")
}

/// A device that records every parsed message and replies `Ok`, except for
/// an optional scripted `Error` reply to `StopDeviceCmd`.
#[derive(Debug)]
pub struct TestDevice {
    identifier: String,
    name: String,
    connected: AtomicBool,
    allowed: AllowedMessages,
    received: Mutex<Vec<ClientMessage>>,
    stop_error: Option<String>,
    notices: broadcast::Sender<DeviceNotice>,
}

impl TestDevice {
    /// A connected device advertising `StopDeviceCmd` and a one-motor
    /// `VibrateCmd`.
    pub fn new(identifier: &str, name: &str) -> Arc<Self> {
        Self::build(identifier, name, None)
    }

    /// Like [`TestDevice::new`] but replying `Error(message)` to every
    /// `StopDeviceCmd`.
    pub fn failing_stop(identifier: &str, name: &str, message: &str) -> Arc<Self> {
        Self::build(identifier, name, Some(message.to_string()))
    }

    fn build(identifier: &str, name: &str, stop_error: Option<String>) -> Arc<Self> {
        let mut allowed = AllowedMessages::new();
        allowed.insert(DeviceMessageKind::StopDeviceCmd, MessageAttributes::default());
        allowed.insert(
            DeviceMessageKind::VibrateCmd,
            MessageAttributes::with_feature_count(1),
        );
        let (notices, _) = broadcast::channel(32);
        Arc::new(Self {
            identifier: identifier.to_string(),
            name: name.to_string(),
            connected: AtomicBool::new(true),
            allowed,
            received: Mutex::new(Vec::new()),
            stop_error,
            notices,
        })
    }

    /// Messages this device has parsed, in order.
    pub fn received(&self) -> Vec<ClientMessage> {
        self.received.lock().unwrap().clone()
    }

    /// Flip the simulated connection state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Emit a device-initiated protocol message.
    pub fn emit(&self, msg: ServerMessage) {
        let _ = self.notices.send(DeviceNotice::Message(msg));
    }

    /// Simulate the physical device going away.
    pub fn remove(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.notices.send(DeviceNotice::Removed);
    }
}

#[async_trait]
impl Device for TestDevice {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn allowed_messages(&self) -> AllowedMessages {
        self.allowed.clone()
    }

    async fn parse_message(
        &self,
        msg: ClientMessage,
        cancel: CancellationToken,
    ) -> Result<ServerMessage> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let id = msg.id();
        let is_stop = matches!(msg, ClientMessage::StopDeviceCmd { .. });
        self.received.lock().unwrap().push(msg);
        if is_stop {
            if let Some(message) = &self.stop_error {
                return Ok(ServerMessage::error(
                    id,
                    ErrorCode::DeviceError,
                    message.clone(),
                ));
            }
        }
        Ok(ServerMessage::ok(id))
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceNotice> {
        self.notices.subscribe()
    }
}

/// A subtype manager whose discovery and completion are driven by the test.
#[derive(Debug)]
pub struct TestManager {
    kind: &'static str,
    scanning: AtomicBool,
    finish_on_start: bool,
    fail_start: bool,
    events: broadcast::Sender<ManagerEvent>,
}

impl TestManager {
    /// A manager that keeps scanning until the test calls
    /// [`TestManager::finish`] or stops it.
    pub fn new(kind: &'static str) -> Arc<Self> {
        Self::build(kind, false, false)
    }

    /// A manager with nothing to discover: its scan completes inside
    /// `start_scanning`.
    pub fn fast(kind: &'static str) -> Arc<Self> {
        Self::build(kind, true, false)
    }

    /// A manager whose `start_scanning` fails.
    pub fn failing(kind: &'static str) -> Arc<Self> {
        Self::build(kind, false, true)
    }

    fn build(kind: &'static str, finish_on_start: bool, fail_start: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            kind,
            scanning: AtomicBool::new(false),
            finish_on_start,
            fail_start,
            events,
        })
    }

    /// Surface a discovered device.
    pub fn add_device(&self, device: Arc<dyn Device>) {
        let _ = self.events.send(ManagerEvent::DeviceFound(Some(device)));
    }

    /// Surface an empty discovery slot (discovery raced teardown).
    pub fn add_empty_slot(&self) {
        let _ = self.events.send(ManagerEvent::DeviceFound(None));
    }

    /// Complete this manager's scan and announce it.
    pub fn finish(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        let _ = self.events.send(ManagerEvent::ScanningFinished);
    }
}

#[async_trait]
impl SubtypeManager for TestManager {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn start_scanning(&self) -> Result<()> {
        if self.fail_start {
            return Err(Error::device("backend failed to start"));
        }
        self.scanning.store(true, Ordering::SeqCst);
        if self.finish_on_start {
            self.finish();
        }
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<()> {
        self.finish();
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }
}

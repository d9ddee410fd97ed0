//! A minimal in-process session: one simulated backend, one device, a scan,
//! a device list request, and a stop-all.
//!
//! Run with: `cargo run --example scan_session`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use devrelay_core::error::{Error, Result};
use devrelay_core::message::{
    AllowedMessages, ClientMessage, DeviceMessageKind, MessageAttributes, ServerMessage,
};
use devrelay_server::{
    Device, DeviceManager, DeviceNotice, ManagerEvent, SubtypeManager,
};

/// A device that acknowledges every command.
#[derive(Debug)]
struct DemoDevice {
    notices: broadcast::Sender<DeviceNotice>,
}

impl DemoDevice {
    fn new() -> Arc<Self> {
        let (notices, _) = broadcast::channel(16);
        Arc::new(Self { notices })
    }
}

#[async_trait]
impl Device for DemoDevice {
    fn identifier(&self) -> &str {
        "demo:00:11:22:33"
    }

    fn name(&self) -> &str {
        "Demo Wand"
    }

    fn connected(&self) -> bool {
        true
    }

    fn allowed_messages(&self) -> AllowedMessages {
        let mut allowed = AllowedMessages::new();
        allowed.insert(DeviceMessageKind::StopDeviceCmd, MessageAttributes::default());
        allowed.insert(
            DeviceMessageKind::VibrateCmd,
            MessageAttributes::with_feature_count(2),
        );
        allowed
    }

    async fn parse_message(
        &self,
        msg: ClientMessage,
        cancel: CancellationToken,
    ) -> Result<ServerMessage> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        println!("  device received {}", msg.kind_name());
        Ok(ServerMessage::ok(msg.id()))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceNotice> {
        self.notices.subscribe()
    }
}

/// A backend that discovers one demo device and finishes immediately.
#[derive(Debug)]
struct DemoManager {
    scanning: AtomicBool,
    events: broadcast::Sender<ManagerEvent>,
}

impl DemoManager {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            scanning: AtomicBool::new(false),
            events,
        })
    }
}

#[async_trait]
impl SubtypeManager for DemoManager {
    fn kind(&self) -> &'static str {
        "demo"
    }

    async fn start_scanning(&self) -> Result<()> {
        self.scanning.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .send(ManagerEvent::DeviceFound(Some(DemoDevice::new())));
        self.scanning.store(false, Ordering::SeqCst);
        let _ = self.events.send(ManagerEvent::ScanningFinished);
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<()> {
        self.scanning.store(false, Ordering::SeqCst);
        let _ = self.events.send(ManagerEvent::ScanningFinished);
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    devrelay_core::logging::init()?;

    let manager = DeviceManager::builder()
        .register_factory(|| Ok(DemoManager::new() as Arc<dyn SubtypeManager>))
        .build();
    let mut events = manager.subscribe();

    let requests = [
        r#"{"StartScanning":{"Id":1}}"#,
        r#"{"RequestDeviceList":{"Id":2}}"#,
        r#"{"StopAllDevices":{"Id":3}}"#,
    ];
    for json in requests {
        let msg: ClientMessage =
            serde_json::from_str(json).map_err(|e| Error::message(e.to_string()))?;
        let reply = manager.send_message(msg, CancellationToken::new()).await;
        println!(
            "reply: {}",
            serde_json::to_string(&reply).map_err(|e| Error::message(e.to_string()))?
        );
        // Give the discovery pumps a moment before draining events.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        while let Ok(event) = events.try_recv() {
            println!(
                "event: {}",
                serde_json::to_string(&event).map_err(|e| Error::message(e.to_string()))?
            );
        }
    }

    manager.shutdown().await;
    Ok(())
}

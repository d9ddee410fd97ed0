/*!
 * The device manager: message dispatch, backend loading, and lifecycle.
 *
 * One `DeviceManager` serves one logical client session. Inbound protocol
 * messages go through [`DeviceManager::send_message`], which always produces
 * exactly one reply carrying the request id; unsolicited messages flow
 * through the subscription returned by [`DeviceManager::subscribe`].
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use devrelay_core::config::ServerConfig;
use devrelay_core::error::{Error, Result};
use devrelay_core::message::{ClientMessage, ServerMessage};

use crate::fanout::EventFanout;
use crate::manager::{FactoryRegistry, ManagerEvent, ManagerSet, SubtypeManager};
use crate::registry::DeviceRegistry;
use crate::scanning::ScanCoordinator;

/// Builder for a [`DeviceManager`].
#[derive(Debug)]
pub struct DeviceManagerBuilder {
    spec_version: u32,
    event_capacity: usize,
    auto_load: bool,
    factories: FactoryRegistry,
}

impl Default for DeviceManagerBuilder {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl DeviceManagerBuilder {
    /// Builder seeded with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded from a loaded configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            spec_version: config.spec_version,
            event_capacity: config.event_capacity,
            auto_load: config.auto_load,
            factories: FactoryRegistry::new(),
        }
    }

    /// Protocol spec version negotiated with the client; gates which message
    /// kinds devices advertise.
    pub fn with_spec_version(mut self, spec_version: u32) -> Self {
        self.spec_version = spec_version;
        self
    }

    /// Capacity of the outbound event channel.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Allow or forbid lazily constructing registered backends at the first
    /// scan.
    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    /// Use a pre-populated factory registry.
    pub fn with_factories(mut self, factories: FactoryRegistry) -> Self {
        self.factories = factories;
        self
    }

    /// Register one backend factory.
    pub fn register_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn SubtypeManager>> + Send + Sync + 'static,
    {
        self.factories.register(factory);
        self
    }

    /// Build the device manager.
    pub fn build(self) -> Arc<DeviceManager> {
        let fanout = EventFanout::new(self.event_capacity);
        let registry = DeviceRegistry::new(fanout.clone(), self.spec_version);
        let managers = Arc::new(ManagerSet::new());
        let scanner = Arc::new(ScanCoordinator::new(managers.clone(), fanout.clone()));

        Arc::new(DeviceManager {
            registry,
            scanner,
            managers,
            factories: self.factories,
            fanout,
            auto_load: self.auto_load,
            auto_loaded: AtomicBool::new(false),
            pumps: Mutex::new(Vec::new()),
        })
    }
}

/// The server-side device manager core.
pub struct DeviceManager {
    registry: Arc<DeviceRegistry>,
    scanner: Arc<ScanCoordinator>,
    managers: Arc<ManagerSet>,
    factories: FactoryRegistry,
    fanout: EventFanout,
    auto_load: bool,
    auto_loaded: AtomicBool,
    /// Manager event pumps; aborted on shutdown.
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceManager {
    /// Start building a device manager.
    pub fn builder() -> DeviceManagerBuilder {
        DeviceManagerBuilder::new()
    }

    /// Subscribe to the outbound stream of unsolicited messages
    /// (`DeviceAdded`, `DeviceRemoved`, `ScanningFinished`, device-emitted
    /// messages).
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.fanout.subscribe()
    }

    /// Register a subtype manager and wire its events into the registry and
    /// scan coordinator. Adding a second manager of the same kind is logged
    /// and ignored; returns whether the manager was added.
    pub async fn add_manager(&self, manager: Arc<dyn SubtypeManager>) -> bool {
        let events = manager.subscribe();
        if !self.managers.add(manager.clone()).await {
            return false;
        }
        let pump = self.spawn_manager_pump(manager.kind(), events);
        self.pumps.lock().await.push(pump);
        info!(kind = manager.kind(), "scan backend registered");
        true
    }

    /// Construct and register every backend published through the factory
    /// registry. Best-effort: factory failures and duplicate kinds are
    /// logged and skipped.
    pub async fn load_registered(&self) {
        for manager in self.factories.build_all() {
            self.add_manager(manager).await;
        }
        self.auto_loaded.store(true, Ordering::SeqCst);
    }

    /// Dispatch one inbound protocol message and return its reply.
    ///
    /// The reply id always equals the request id. Failures below the
    /// dispatcher are converted into an `Error` reply here; the session
    /// survives every per-message error. `cancel` applies to
    /// device-addressed messages only.
    pub async fn send_message(
        &self,
        msg: ClientMessage,
        cancel: CancellationToken,
    ) -> ServerMessage {
        let id = msg.id();
        match self.dispatch(msg, cancel).await {
            Ok(reply) => reply,
            Err(err) => {
                debug!(id, error = %err, "request failed");
                ServerMessage::from_error(id, &err)
            }
        }
    }

    /// Explicit teardown: stop scanning, detach backends, disconnect every
    /// device. Mandatory before dropping the manager; no `DeviceRemoved`
    /// messages are published on this path. Idempotent.
    pub async fn shutdown(&self) {
        info!("device manager shutting down");
        if let Err(e) = self.scanner.stop().await {
            warn!(error = %e, "stopping scan during shutdown failed");
        }
        for pump in self.pumps.lock().await.drain(..) {
            pump.abort();
        }
        self.registry.remove_all().await;
    }

    async fn dispatch(&self, msg: ClientMessage, cancel: CancellationToken) -> Result<ServerMessage> {
        match msg {
            ClientMessage::StartScanning { id } => self.handle_start_scanning(id).await,
            ClientMessage::StopScanning { id } => {
                self.scanner.stop().await?;
                Ok(ServerMessage::ok(id))
            }
            ClientMessage::StopAllDevices { id } => self.handle_stop_all_devices(id).await,
            ClientMessage::RequestDeviceList { id } => Ok(ServerMessage::DeviceList {
                id,
                devices: self.registry.snapshot_connected().await,
            }),
            other => match other.device_index() {
                Some(index) => self.dispatch_to_device(index, other, cancel).await,
                None => Err(Error::message(format!(
                    "cannot handle message kind {}",
                    other.kind_name()
                ))),
            },
        }
    }

    async fn handle_start_scanning(&self, id: u32) -> Result<ServerMessage> {
        if self.auto_load
            && !self.auto_loaded.load(Ordering::SeqCst)
            && self.managers.is_empty().await
        {
            info!("no scan backends registered, loading published factories");
            self.load_registered().await;
        }
        self.scanner.start().await?;
        Ok(ServerMessage::ok(id))
    }

    async fn handle_stop_all_devices(&self, id: u32) -> Result<ServerMessage> {
        let mut failures = String::new();
        for (index, device) in self.registry.connected_devices().await {
            let stop = ClientMessage::StopDeviceCmd {
                id,
                device_index: index,
            };
            // Global control ignores the caller's cancellation token; each
            // device gets a fresh, never-cancelled one.
            match device.parse_message(stop, CancellationToken::new()).await {
                Ok(ServerMessage::Ok { .. }) => {}
                Ok(ServerMessage::Error { error_message, .. }) => {
                    failures.push_str(&error_message);
                    failures.push_str("; ");
                }
                Ok(_) => {
                    failures.push_str(&format!("unexpected reply from device {index}"));
                    failures.push_str("; ");
                }
                Err(e) => {
                    failures.push_str(&e.to_string());
                    failures.push_str("; ");
                }
            }
        }
        if failures.is_empty() {
            Ok(ServerMessage::ok(id))
        } else {
            Err(Error::device(failures))
        }
    }

    async fn dispatch_to_device(
        &self,
        index: u32,
        msg: ClientMessage,
        cancel: CancellationToken,
    ) -> Result<ServerMessage> {
        let device = self
            .registry
            .device(index)
            .await
            .ok_or(Error::UnknownDevice(index))?;
        device.parse_message(msg, cancel).await
    }

    fn spawn_manager_pump(
        &self,
        kind: &'static str,
        mut events: broadcast::Receiver<ManagerEvent>,
    ) -> JoinHandle<()> {
        let registry = Arc::downgrade(&self.registry);
        let scanner = Arc::downgrade(&self.scanner);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ManagerEvent::DeviceFound(device)) => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.on_device_added(device).await;
                    }
                    Ok(ManagerEvent::ScanningFinished) => {
                        let Some(scanner) = scanner.upgrade() else { break };
                        scanner.on_manager_finished().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(kind, skipped, "scan backend event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("auto_load", &self.auto_load)
            .field("auto_loaded", &self.auto_loaded.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

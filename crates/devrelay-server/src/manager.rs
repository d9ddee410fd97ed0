/*!
 * Subtype manager contract, the registered-manager set, and the plugin
 * factory registry.
 *
 * A subtype manager is a discovery backend (Bluetooth, HID, serial, ...)
 * that finds and owns a class of devices. Plugin units publish factory
 * closures through [`FactoryRegistry::register`]; auto-load constructs one
 * manager per factory instead of probing for subclasses at runtime.
 */
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

use devrelay_core::error::Result;

use crate::device::Device;

/// Events a subtype manager pushes to the device manager.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// Discovery surfaced a device. `None` when discovery raced teardown and
    /// the slot is already empty; receivers drop it silently.
    DeviceFound(Option<Arc<dyn Device>>),
    /// This manager's own scan completed.
    ScanningFinished,
}

/// A discovery backend for one class of devices.
#[async_trait]
pub trait SubtypeManager: Send + Sync + Debug {
    /// Stable name of this backend kind; at most one manager per kind is
    /// registered.
    fn kind(&self) -> &'static str;

    /// Begin discovering devices. A manager with nothing to discover may
    /// emit `ScanningFinished` before this returns.
    async fn start_scanning(&self) -> Result<()>;

    /// Stop an in-progress discovery. Idempotent.
    async fn stop_scanning(&self) -> Result<()>;

    /// Whether this manager is currently scanning.
    fn is_scanning(&self) -> bool;

    /// Subscribe to discovery and completion events.
    fn subscribe(&self) -> broadcast::Receiver<ManagerEvent>;
}

/// The set of registered subtype managers.
///
/// Insertion order is preserved so scans start deterministically; duplicate
/// kinds are rejected.
#[derive(Debug, Default)]
pub struct ManagerSet {
    managers: RwLock<Vec<Arc<dyn SubtypeManager>>>,
}

impl ManagerSet {
    /// Create an empty manager set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a manager. Returns false (and leaves the set untouched) when a
    /// manager of the same kind is already present.
    pub async fn add(&self, manager: Arc<dyn SubtypeManager>) -> bool {
        let mut managers = self.managers.write().await;
        if managers.iter().any(|m| m.kind() == manager.kind()) {
            warn!(kind = manager.kind(), "scan backend already registered, ignoring");
            return false;
        }
        managers.push(manager);
        true
    }

    /// All registered managers, in insertion order.
    pub async fn all(&self) -> Vec<Arc<dyn SubtypeManager>> {
        self.managers.read().await.clone()
    }

    /// Whether no manager is registered.
    pub async fn is_empty(&self) -> bool {
        self.managers.read().await.is_empty()
    }

    /// Number of registered managers.
    pub async fn len(&self) -> usize {
        self.managers.read().await.len()
    }
}

/// A closure constructing one subtype manager.
pub type ManagerFactory = Box<dyn Fn() -> Result<Arc<dyn SubtypeManager>> + Send + Sync>;

/// Registry of manager factories published by plugin units.
///
/// This is the well-known entry point replacing the original runtime
/// subclass probing: a plugin registers how to build its manager, auto-load
/// iterates the factories. Construction failures are logged and skipped;
/// loading is best-effort.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: Vec<ManagerFactory>,
}

impl FactoryRegistry {
    /// Create an empty factory registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager factory.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Result<Arc<dyn SubtypeManager>> + Send + Sync + 'static,
    {
        self.factories.push(Box::new(factory));
    }

    /// Construct every registered manager, skipping factories that fail.
    pub fn build_all(&self) -> Vec<Arc<dyn SubtypeManager>> {
        let mut managers = Vec::with_capacity(self.factories.len());
        for factory in &self.factories {
            match factory() {
                Ok(manager) => managers.push(manager),
                Err(e) => warn!(error = %e, "scan backend factory failed, skipping"),
            }
        }
        managers
    }

    /// Whether no factory is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("factories", &self.factories.len())
            .finish()
    }
}

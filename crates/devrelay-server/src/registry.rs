/*!
 * Device registry for the devrelay device manager.
 *
 * Owns the mapping from client-visible indices to live devices, the
 * session-long memory of identifier-to-index assignments, and the event
 * subscriptions tied to each entry's lifetime.
 */
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use devrelay_core::message::{
    filter_attributes, DeviceListEntry, ServerMessage, SYSTEM_MESSAGE_ID,
};

use crate::device::{Device, DeviceNotice};
use crate::fanout::EventFanout;

/// One live device known to the registry.
///
/// Connection state is always read live from the device handle; a backend
/// may flip it without an accompanying removal event.
#[derive(Debug)]
struct DeviceEntry {
    index: u32,
    identifier: String,
    device: Arc<dyn Device>,
    /// Event pump forwarding this device's notices; aborting it is the
    /// unsubscribe.
    pump: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    devices: HashMap<u32, DeviceEntry>,
    index_of_identifier: HashMap<String, u32>,
}

/// Registry of currently-known devices.
///
/// All mutation is serialized through the inner write lock. Indices are
/// assigned once per identifier and reused across disconnects within a
/// session; the identifier-to-index memory is never dropped.
#[derive(Debug)]
pub struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
    next_index: AtomicU32,
    fanout: EventFanout,
    spec_version: u32,
    /// Handed to device event pumps so they can route removals back here
    /// without keeping the registry alive.
    weak_self: Weak<DeviceRegistry>,
}

impl DeviceRegistry {
    /// Create a registry publishing lifecycle events to `fanout`, filtering
    /// advertised messages at `spec_version`.
    pub fn new(fanout: EventFanout, spec_version: u32) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            inner: RwLock::new(RegistryInner::default()),
            next_index: AtomicU32::new(1),
            fanout,
            spec_version,
            weak_self: weak.clone(),
        })
    }

    /// Install a discovered device.
    ///
    /// An absent device (discovery racing teardown) is dropped silently. A
    /// duplicate discovery for an identifier whose entry is still connected
    /// is a no-op. Otherwise the entry is installed (replacing any stale
    /// one), the identifier keeps or receives its index, and `DeviceAdded`
    /// is published.
    pub async fn on_device_added(&self, device: Option<Arc<dyn Device>>) {
        let Some(device) = device else {
            debug!("discovery surfaced an empty device slot, ignoring");
            return;
        };
        let identifier = device.identifier().to_string();

        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .devices
            .values()
            .find(|entry| entry.identifier == identifier)
        {
            if existing.device.connected() {
                debug!(%identifier, "duplicate discovery for connected device, ignoring");
                return;
            }
        }

        let index = match inner
            .devices
            .values()
            .find(|entry| entry.identifier == identifier)
            .map(|entry| entry.index)
        {
            Some(index) => index,
            None => match inner.index_of_identifier.get(&identifier) {
                Some(index) => *index,
                None => self.next_index.fetch_add(1, Ordering::SeqCst),
            },
        };

        if let Some(stale) = inner.devices.remove(&index) {
            stale.pump.abort();
        }

        let pump = self.spawn_device_pump(index, identifier.clone(), device.subscribe());
        inner.index_of_identifier.insert(identifier.clone(), index);
        inner.devices.insert(
            index,
            DeviceEntry {
                index,
                identifier: identifier.clone(),
                device: device.clone(),
                pump,
            },
        );

        info!(index, %identifier, name = device.name(), "device added");
        self.fanout.publish(ServerMessage::DeviceAdded {
            id: SYSTEM_MESSAGE_ID,
            device_index: index,
            device_name: device.name().to_string(),
            device_messages: filter_attributes(&device.allowed_messages(), self.spec_version),
        });
    }

    /// Tear down the entries matching `identifier` after the device went
    /// away. The identifier keeps its index for the rest of the session.
    pub async fn on_device_removed(&self, identifier: &str) {
        let removed: Vec<DeviceEntry> = {
            let mut inner = self.inner.write().await;
            let indices: Vec<u32> = inner
                .devices
                .values()
                .filter(|entry| entry.identifier == identifier)
                .map(|entry| entry.index)
                .collect();
            if indices.is_empty() {
                debug!(identifier, "removal event for unknown device, ignoring");
            } else if indices.len() > 1 {
                warn!(
                    identifier,
                    count = indices.len(),
                    "multiple registry entries share one identifier"
                );
            }
            indices
                .iter()
                .filter_map(|index| inner.devices.remove(index))
                .collect()
        };

        for entry in removed {
            entry.pump.abort();
            info!(index = entry.index, identifier, "device removed");
            self.fanout.publish(ServerMessage::DeviceRemoved {
                id: SYSTEM_MESSAGE_ID,
                device_index: entry.index,
            });
        }
    }

    /// Drop every entry and disconnect its device. No `DeviceRemoved` is
    /// published on this path; the client infers closure from session
    /// shutdown.
    pub async fn remove_all(&self) {
        let entries: Vec<DeviceEntry> = {
            let mut inner = self.inner.write().await;
            inner.devices.drain().map(|(_, entry)| entry).collect()
        };

        for entry in entries {
            entry.pump.abort();
            if let Err(e) = entry.device.disconnect().await {
                warn!(index = entry.index, error = %e, "device disconnect failed during shutdown");
            }
        }
    }

    /// Look up a device by its client-visible index.
    pub async fn device(&self, index: u32) -> Option<Arc<dyn Device>> {
        self.inner
            .read()
            .await
            .devices
            .get(&index)
            .map(|entry| entry.device.clone())
    }

    /// Currently-connected devices, ordered by index.
    pub async fn connected_devices(&self) -> Vec<(u32, Arc<dyn Device>)> {
        let inner = self.inner.read().await;
        let mut devices: Vec<_> = inner
            .devices
            .values()
            .filter(|entry| entry.device.connected())
            .map(|entry| (entry.index, entry.device.clone()))
            .collect();
        devices.sort_by_key(|(index, _)| *index);
        devices
    }

    /// Snapshot of connected devices for a `DeviceList` reply, ordered by
    /// index, advertised messages filtered by the spec version.
    pub async fn snapshot_connected(&self) -> Vec<DeviceListEntry> {
        let inner = self.inner.read().await;
        let mut entries: Vec<_> = inner
            .devices
            .values()
            .filter(|entry| entry.device.connected())
            .map(|entry| DeviceListEntry {
                device_index: entry.index,
                device_name: entry.device.name().to_string(),
                device_messages: filter_attributes(
                    &entry.device.allowed_messages(),
                    self.spec_version,
                ),
            })
            .collect();
        entries.sort_by_key(|entry| entry.device_index);
        entries
    }

    /// Number of live entries.
    pub async fn device_count(&self) -> usize {
        self.inner.read().await.devices.len()
    }

    fn spawn_device_pump(
        &self,
        index: u32,
        identifier: String,
        mut notices: broadcast::Receiver<DeviceNotice>,
    ) -> JoinHandle<()> {
        let registry = self.weak_self.clone();
        let fanout = self.fanout.clone();
        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(DeviceNotice::Message(msg)) => fanout.publish(msg),
                    Ok(DeviceNotice::Removed) => {
                        if let Some(registry) = registry.upgrade() {
                            registry.on_device_removed(&identifier).await;
                        }
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(index, skipped, "device event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

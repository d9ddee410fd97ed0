/*!
 * devrelay Server
 *
 * The device manager core of the devrelay protocol server: it owns the
 * registry of currently-known devices, multiplexes scanning across pluggable
 * discovery backends, dispatches inbound protocol messages, and fans device
 * lifecycle events out to the client as one ordered message stream.
 */

#![warn(missing_docs)]

// Re-export the wire model the server speaks.
pub use devrelay_core::prelude;

pub mod device;
pub mod fanout;
pub mod manager;
pub mod registry;
pub mod scanning;
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

pub use device::{Device, DeviceNotice};
pub use fanout::EventFanout;
pub use manager::{FactoryRegistry, ManagerEvent, ManagerSet, SubtypeManager};
pub use registry::DeviceRegistry;
pub use scanning::ScanCoordinator;
pub use server::{DeviceManager, DeviceManagerBuilder};

/// devrelay server crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

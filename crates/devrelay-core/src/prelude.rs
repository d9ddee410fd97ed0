/*!
 * Prelude module for devrelay-core.
 *
 * Re-exports the types most embedders need.
 */

pub use crate::error::{Error, Result};

pub use crate::message::{
    filter_attributes, AllowedMessages, ClientMessage, DeviceListEntry, DeviceMessageKind,
    ErrorCode, MessageAttributes, ServerMessage, SYSTEM_MESSAGE_ID,
};

pub use crate::config::{Config, ConfigBuilder};

pub use tracing::{debug, error, info, trace, warn};

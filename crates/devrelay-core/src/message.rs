/*!
 * Wire protocol messages for devrelay.
 *
 * Messages are serde types whose JSON form is the on-wire form: externally
 * tagged enums with PascalCase fields, e.g. `{"StartScanning":{"Id":1}}`.
 * The transport that frames these to the client lives outside this crate.
 */
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Reserved id carried by server-originated unsolicited messages.
pub const SYSTEM_MESSAGE_ID: u32 = 0;

/// Device-command message kinds a device can advertise as supported.
///
/// Each kind records the protocol spec version that introduced it; a device's
/// advertised set is filtered against the client's negotiated version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceMessageKind {
    /// Stop all actuation on the device
    StopDeviceCmd,
    /// Set per-feature vibration speeds
    VibrateCmd,
    /// Set per-feature rotation speed and direction
    RotateCmd,
    /// Move linear actuators to a position over a duration
    LinearCmd,
    /// Request the device battery level
    BatteryLevelCmd,
}

impl DeviceMessageKind {
    /// Protocol spec version this message kind first appeared in.
    pub fn introduced_in(&self) -> u32 {
        match self {
            DeviceMessageKind::StopDeviceCmd => 0,
            DeviceMessageKind::VibrateCmd
            | DeviceMessageKind::RotateCmd
            | DeviceMessageKind::LinearCmd => 1,
            DeviceMessageKind::BatteryLevelCmd => 2,
        }
    }

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMessageKind::StopDeviceCmd => "StopDeviceCmd",
            DeviceMessageKind::VibrateCmd => "VibrateCmd",
            DeviceMessageKind::RotateCmd => "RotateCmd",
            DeviceMessageKind::LinearCmd => "LinearCmd",
            DeviceMessageKind::BatteryLevelCmd => "BatteryLevelCmd",
        }
    }
}

/// Per-kind attributes a device supplies alongside an advertised message kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageAttributes {
    /// Number of addressable features (motors, rotators, axes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<u32>,
    /// Per-feature step resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_count: Option<Vec<u32>>,
}

impl MessageAttributes {
    /// Attributes advertising a feature count only.
    pub fn with_feature_count(count: u32) -> Self {
        Self {
            feature_count: Some(count),
            step_count: None,
        }
    }
}

/// The advertised message set of a device: kind to attributes.
pub type AllowedMessages = HashMap<DeviceMessageKind, MessageAttributes>;

/// Keep only the message kinds visible at the given spec version.
pub fn filter_attributes(allowed: &AllowedMessages, spec_version: u32) -> AllowedMessages {
    allowed
        .iter()
        .filter(|(kind, _)| kind.introduced_in() <= spec_version)
        .map(|(kind, attrs)| (*kind, attrs.clone()))
        .collect()
}

/// A single vibration speed setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VibrateSubcommand {
    /// Feature index on the device
    pub index: u32,
    /// Speed in [0.0, 1.0]
    pub speed: f64,
}

/// A single rotation setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RotateSubcommand {
    /// Feature index on the device
    pub index: u32,
    /// Speed in [0.0, 1.0]
    pub speed: f64,
    /// Rotation direction
    pub clockwise: bool,
}

/// A single linear movement setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinearSubcommand {
    /// Feature index on the device
    pub index: u32,
    /// Movement duration in milliseconds
    pub duration: u32,
    /// Target position in [0.0, 1.0]
    pub position: f64,
}

/// Messages the client sends to the device manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Start a global device scan
    #[serde(rename_all = "PascalCase")]
    StartScanning {
        /// Client-chosen message id, echoed on the reply
        id: u32,
    },
    /// Stop an in-progress global scan
    #[serde(rename_all = "PascalCase")]
    StopScanning {
        /// Client-chosen message id
        id: u32,
    },
    /// Stop actuation on every connected device
    #[serde(rename_all = "PascalCase")]
    StopAllDevices {
        /// Client-chosen message id
        id: u32,
    },
    /// Request the list of connected devices
    #[serde(rename_all = "PascalCase")]
    RequestDeviceList {
        /// Client-chosen message id
        id: u32,
    },
    /// Keepalive, owned by the outer server rather than this core
    #[serde(rename_all = "PascalCase")]
    Ping {
        /// Client-chosen message id
        id: u32,
    },
    /// Set vibration speeds on a device
    #[serde(rename_all = "PascalCase")]
    VibrateCmd {
        /// Client-chosen message id
        id: u32,
        /// Server-assigned device index
        device_index: u32,
        /// Per-feature speeds
        speeds: Vec<VibrateSubcommand>,
    },
    /// Set rotation on a device
    #[serde(rename_all = "PascalCase")]
    RotateCmd {
        /// Client-chosen message id
        id: u32,
        /// Server-assigned device index
        device_index: u32,
        /// Per-feature rotations
        rotations: Vec<RotateSubcommand>,
    },
    /// Move linear actuators on a device
    #[serde(rename_all = "PascalCase")]
    LinearCmd {
        /// Client-chosen message id
        id: u32,
        /// Server-assigned device index
        device_index: u32,
        /// Per-feature movements
        vectors: Vec<LinearSubcommand>,
    },
    /// Stop all actuation on one device
    #[serde(rename_all = "PascalCase")]
    StopDeviceCmd {
        /// Client-chosen message id
        id: u32,
        /// Server-assigned device index
        device_index: u32,
    },
    /// Request the battery level of one device
    #[serde(rename_all = "PascalCase")]
    BatteryLevelCmd {
        /// Client-chosen message id
        id: u32,
        /// Server-assigned device index
        device_index: u32,
    },
}

impl ClientMessage {
    /// The client-supplied message id.
    pub fn id(&self) -> u32 {
        match self {
            ClientMessage::StartScanning { id }
            | ClientMessage::StopScanning { id }
            | ClientMessage::StopAllDevices { id }
            | ClientMessage::RequestDeviceList { id }
            | ClientMessage::Ping { id }
            | ClientMessage::VibrateCmd { id, .. }
            | ClientMessage::RotateCmd { id, .. }
            | ClientMessage::LinearCmd { id, .. }
            | ClientMessage::StopDeviceCmd { id, .. }
            | ClientMessage::BatteryLevelCmd { id, .. } => *id,
        }
    }

    /// The addressed device index, for device-directed messages.
    pub fn device_index(&self) -> Option<u32> {
        match self {
            ClientMessage::VibrateCmd { device_index, .. }
            | ClientMessage::RotateCmd { device_index, .. }
            | ClientMessage::LinearCmd { device_index, .. }
            | ClientMessage::StopDeviceCmd { device_index, .. }
            | ClientMessage::BatteryLevelCmd { device_index, .. } => Some(*device_index),
            _ => None,
        }
    }

    /// The device-command kind, for device-directed messages.
    pub fn device_message_kind(&self) -> Option<DeviceMessageKind> {
        match self {
            ClientMessage::VibrateCmd { .. } => Some(DeviceMessageKind::VibrateCmd),
            ClientMessage::RotateCmd { .. } => Some(DeviceMessageKind::RotateCmd),
            ClientMessage::LinearCmd { .. } => Some(DeviceMessageKind::LinearCmd),
            ClientMessage::StopDeviceCmd { .. } => Some(DeviceMessageKind::StopDeviceCmd),
            ClientMessage::BatteryLevelCmd { .. } => Some(DeviceMessageKind::BatteryLevelCmd),
            _ => None,
        }
    }

    /// Wire name of the message kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ClientMessage::StartScanning { .. } => "StartScanning",
            ClientMessage::StopScanning { .. } => "StopScanning",
            ClientMessage::StopAllDevices { .. } => "StopAllDevices",
            ClientMessage::RequestDeviceList { .. } => "RequestDeviceList",
            ClientMessage::Ping { .. } => "Ping",
            ClientMessage::VibrateCmd { .. } => "VibrateCmd",
            ClientMessage::RotateCmd { .. } => "RotateCmd",
            ClientMessage::LinearCmd { .. } => "LinearCmd",
            ClientMessage::StopDeviceCmd { .. } => "StopDeviceCmd",
            ClientMessage::BatteryLevelCmd { .. } => "BatteryLevelCmd",
        }
    }
}

/// Error classification carried on the wire by `Error` replies.
///
/// Unknown-device lookups classify as `DeviceError`; the finer-grained
/// distinction lives in [`Error`](crate::error::Error) server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Unclassified failure
    Unknown,
    /// Device or scanning failure, including unknown device indices
    DeviceError,
    /// Message kind not handled by this core
    MessageError,
    /// The device call was cancelled
    Cancelled,
}

/// One entry of a `DeviceList` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceListEntry {
    /// Server-assigned device index
    pub device_index: u32,
    /// Human-readable device name
    pub device_name: String,
    /// Advertised message kinds, filtered by the negotiated spec version
    pub device_messages: AllowedMessages,
}

/// Messages the device manager sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Success reply to a control message
    #[serde(rename_all = "PascalCase")]
    Ok {
        /// Echoed request id
        id: u32,
    },
    /// Failure reply
    #[serde(rename_all = "PascalCase")]
    Error {
        /// Echoed request id, or the system id for unsolicited errors
        id: u32,
        /// Failure classification
        error_code: ErrorCode,
        /// Human-readable failure description
        error_message: String,
    },
    /// Reply to `RequestDeviceList`
    #[serde(rename_all = "PascalCase")]
    DeviceList {
        /// Echoed request id
        id: u32,
        /// Connected devices
        devices: Vec<DeviceListEntry>,
    },
    /// Unsolicited: a device appeared
    #[serde(rename_all = "PascalCase")]
    DeviceAdded {
        /// Always the system id
        id: u32,
        /// Server-assigned device index
        device_index: u32,
        /// Human-readable device name
        device_name: String,
        /// Advertised message kinds, filtered by the negotiated spec version
        device_messages: AllowedMessages,
    },
    /// Unsolicited: a device went away
    #[serde(rename_all = "PascalCase")]
    DeviceRemoved {
        /// Always the system id
        id: u32,
        /// Server-assigned device index
        device_index: u32,
    },
    /// Unsolicited: the global scan completed
    #[serde(rename_all = "PascalCase")]
    ScanningFinished {
        /// Always the system id
        id: u32,
    },
    /// Device-emitted battery reading, forwarded verbatim
    #[serde(rename_all = "PascalCase")]
    BatteryLevelReading {
        /// Id of the request that solicited the reading, or the system id
        id: u32,
        /// Server-assigned device index
        device_index: u32,
        /// Battery level in [0.0, 1.0]
        battery_level: f64,
    },
}

impl ServerMessage {
    /// The message id.
    pub fn id(&self) -> u32 {
        match self {
            ServerMessage::Ok { id }
            | ServerMessage::Error { id, .. }
            | ServerMessage::DeviceList { id, .. }
            | ServerMessage::DeviceAdded { id, .. }
            | ServerMessage::DeviceRemoved { id, .. }
            | ServerMessage::ScanningFinished { id }
            | ServerMessage::BatteryLevelReading { id, .. } => *id,
        }
    }

    /// Success reply for the given request id.
    pub fn ok(id: u32) -> Self {
        ServerMessage::Ok { id }
    }

    /// Error reply for the given request id.
    pub fn error<S: Into<String>>(id: u32, code: ErrorCode, message: S) -> Self {
        ServerMessage::Error {
            id,
            error_code: code,
            error_message: message.into(),
        }
    }

    /// Convert a core error into the error reply for the given request id.
    ///
    /// This is the dispatcher-boundary conversion: errors raised below the
    /// dispatcher surface as exactly one reply and never tear down the
    /// session.
    pub fn from_error(id: u32, err: &Error) -> Self {
        let code = match err {
            Error::Device(_) | Error::UnknownDevice(_) => ErrorCode::DeviceError,
            Error::Message(_) => ErrorCode::MessageError,
            Error::Cancelled => ErrorCode::Cancelled,
            Error::Config(_) | Error::Runtime(_) => ErrorCode::Unknown,
        };
        ServerMessage::error(id, code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_from_wire_form() {
        let msg: ClientMessage = serde_json::from_str(r#"{"StartScanning":{"Id":1}}"#).unwrap();
        assert_eq!(msg, ClientMessage::StartScanning { id: 1 });
        assert_eq!(msg.id(), 1);
        assert_eq!(msg.device_index(), None);

        let msg: ClientMessage =
            serde_json::from_str(r#"{"VibrateCmd":{"Id":5,"DeviceIndex":999,"Speeds":[]}}"#)
                .unwrap();
        assert_eq!(msg.id(), 5);
        assert_eq!(msg.device_index(), Some(999));
        assert_eq!(
            msg.device_message_kind(),
            Some(DeviceMessageKind::VibrateCmd)
        );
    }

    #[test]
    fn server_messages_serialize_to_wire_form() {
        let json = serde_json::to_string(&ServerMessage::ok(7)).unwrap();
        assert_eq!(json, r#"{"Ok":{"Id":7}}"#);

        let json = serde_json::to_string(&ServerMessage::ScanningFinished {
            id: SYSTEM_MESSAGE_ID,
        })
        .unwrap();
        assert_eq!(json, r#"{"ScanningFinished":{"Id":0}}"#);

        let json = serde_json::to_string(&ServerMessage::error(
            1,
            ErrorCode::DeviceError,
            "No scan backends available",
        ))
        .unwrap();
        assert_eq!(
            json,
            r#"{"Error":{"Id":1,"ErrorCode":"DeviceError","ErrorMessage":"No scan backends available"}}"#
        );
    }

    #[test]
    fn attributes_round_trip_and_elide_empty_fields() {
        let attrs = MessageAttributes::with_feature_count(2);
        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"FeatureCount":2}"#);

        let parsed: MessageAttributes = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, MessageAttributes::default());
    }

    #[test]
    fn device_list_entry_uses_kind_names_as_keys() {
        let mut allowed = AllowedMessages::new();
        allowed.insert(
            DeviceMessageKind::VibrateCmd,
            MessageAttributes::with_feature_count(1),
        );
        let entry = DeviceListEntry {
            device_index: 1,
            device_name: "DevA".to_string(),
            device_messages: allowed,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["DeviceIndex"], 1);
        assert_eq!(json["DeviceName"], "DevA");
        assert_eq!(json["DeviceMessages"]["VibrateCmd"]["FeatureCount"], 1);
    }

    #[test]
    fn filter_attributes_respects_spec_version() {
        let mut allowed = AllowedMessages::new();
        allowed.insert(DeviceMessageKind::StopDeviceCmd, MessageAttributes::default());
        allowed.insert(
            DeviceMessageKind::VibrateCmd,
            MessageAttributes::with_feature_count(2),
        );
        allowed.insert(DeviceMessageKind::BatteryLevelCmd, MessageAttributes::default());

        let v0 = filter_attributes(&allowed, 0);
        assert_eq!(v0.len(), 1);
        assert!(v0.contains_key(&DeviceMessageKind::StopDeviceCmd));

        let v1 = filter_attributes(&allowed, 1);
        assert_eq!(v1.len(), 2);
        assert!(!v1.contains_key(&DeviceMessageKind::BatteryLevelCmd));

        let v2 = filter_attributes(&allowed, 2);
        assert_eq!(v2.len(), 3);
    }

    #[test]
    fn error_reply_preserves_id_and_classifies() {
        let reply = ServerMessage::from_error(5, &Error::unknown_device(999));
        assert_eq!(
            reply,
            ServerMessage::error(5, ErrorCode::DeviceError, "unknown device index 999")
        );

        let reply = ServerMessage::from_error(3, &Error::Cancelled);
        assert_eq!(reply.id(), 3);
        assert!(matches!(
            reply,
            ServerMessage::Error {
                error_code: ErrorCode::Cancelled,
                ..
            }
        ));
    }
}

//! Interfaces the platform layer implements for the workflow
//!
//! The workflow never talks to a Bluetooth stack directly. It queries and
//! issues requests through these traits; results of requests arrive later as
//! [`WorkflowEvent`](crate::workflow::WorkflowEvent)s.

use thiserror::Error;

use crate::address::{DeviceAddress, DeviceId};

/// Power state of the local adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    On,
    Off,
}

/// Pairing state of a remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

/// Audio profile connection state of a remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Playing,
}

impl ProfileState {
    /// Every state other than `Disconnected`
    pub const CONNECTED_STATES: [ProfileState; 4] = [
        ProfileState::Connecting,
        ProfileState::Connected,
        ProfileState::Disconnecting,
        ProfileState::Playing,
    ];

    pub const ALL: [ProfileState; 5] = [
        ProfileState::Disconnected,
        ProfileState::Connecting,
        ProfileState::Connected,
        ProfileState::Disconnecting,
        ProfileState::Playing,
    ];

    /// Audio can be routed to the device
    pub fn is_connected(self) -> bool {
        matches!(self, ProfileState::Connected | ProfileState::Playing)
    }

    /// A link exists, even if it is going away
    pub fn is_present(self) -> bool {
        matches!(
            self,
            ProfileState::Disconnecting | ProfileState::Connected | ProfileState::Playing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileState::Disconnected => "disconnected",
            ProfileState::Connecting => "connecting",
            ProfileState::Connected => "connected",
            ProfileState::Disconnecting => "disconnecting",
            ProfileState::Playing => "playing",
        }
    }
}

impl std::fmt::Display for ProfileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Local Bluetooth adapter
pub trait BluetoothHost: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Ask for the adapter to be powered on. `false` means the request was
    /// refused outright; otherwise the outcome arrives as an adapter event.
    fn request_enable(&self) -> bool;

    fn is_bonded(&self, address: &DeviceAddress) -> bool;

    /// Start pairing. `false` means the request was refused outright.
    fn request_bond(&self, address: &DeviceAddress) -> bool;

    /// Name advertised by the device itself
    fn device_name(&self, address: &DeviceAddress) -> Option<String>;
}

/// Connects the workflow to the device-management service
pub trait ServiceBinder: Send + Sync {
    /// Ask for the service. The bound handles arrive as
    /// [`WorkflowEvent::ServiceBound`](crate::workflow::WorkflowEvent::ServiceBound).
    fn request_bind(&self) -> bool;
}

/// Errors persisting registry changes
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode registry: {0}")]
    Encode(String),
}

/// Per-device name and visibility overrides
pub trait DeviceRegistry: Send + Sync {
    /// Custom name for the device, or `fallback` when none is set
    fn display_name(&self, id: DeviceId, fallback: &str) -> String;

    /// Store a custom name. An empty name clears the override.
    fn set_display_name(&self, id: DeviceId, name: &str) -> Result<(), RegistryError>;

    fn is_visible(&self, id: DeviceId) -> bool;

    fn set_visible(&self, id: DeviceId, visible: bool) -> Result<(), RegistryError>;
}

/// Audio sink profile of the local stack
pub trait AudioProfileProxy: Send + Sync {
    /// `false` means the request was refused outright
    fn connect(&self, address: &DeviceAddress) -> bool;

    fn disconnect(&self, address: &DeviceAddress) -> bool;

    fn connection_state(&self, address: &DeviceAddress) -> ProfileState;

    /// Devices whose profile state is one of `states`
    fn devices_matching(&self, states: &[ProfileState]) -> Vec<DeviceAddress>;
}

/// Stored overrides for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub custom_name: Option<String>,
    pub hidden: bool,
}

impl DeviceRecord {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            custom_name: None,
            hidden: false,
        }
    }

    pub fn is_visible(&self) -> bool {
        !self.hidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_states() {
        assert!(ProfileState::Connected.is_connected());
        assert!(ProfileState::Playing.is_connected());
        assert!(!ProfileState::Connecting.is_connected());
        assert!(!ProfileState::Disconnecting.is_connected());

        assert!(!ProfileState::CONNECTED_STATES.contains(&ProfileState::Disconnected));
        assert_eq!(ProfileState::ALL.len(), ProfileState::CONNECTED_STATES.len() + 1);
    }

    #[test]
    fn test_present_states() {
        assert!(ProfileState::Disconnecting.is_present());
        assert!(!ProfileState::Connecting.is_present());
        assert!(!ProfileState::Disconnected.is_present());
    }

    #[test]
    fn test_new_record_is_visible() {
        let record = DeviceRecord::new(DeviceId(7));
        assert!(record.is_visible());
        assert_eq!(record.custom_name, None);
    }
}

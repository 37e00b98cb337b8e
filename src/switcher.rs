//! Device switching outside a connection workflow
//!
//! Listing, toggling and renaming audio sinks, the one-line status summary,
//! and building tag payloads for known devices.

use a2dp_switcher_core::{DeviceAddress, DeviceRegistry, ProfileState, TagPayload};
use anyhow::{anyhow, Result};
use std::fmt;
use tracing::{info, warn};

use crate::bluez::{BluezHost, DeviceInfo};

/// One audio sink as the user sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub address: DeviceAddress,
    /// Custom name, else the device's own name, else the address
    pub display_name: String,
    pub real_name: Option<String>,
    pub visible: bool,
    pub state: ProfileState,
}

/// What `toggle` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Connected,
    Disconnected,
}

/// Summary of the audio routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    NoAdapter,
    BluetoothDisabled,
    AudioUnavailable,
    Connected(String),
    NoDevice,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NoAdapter => f.write_str("No Bluetooth adapter"),
            Status::BluetoothDisabled => f.write_str("Bluetooth is disabled"),
            Status::AudioUnavailable => f.write_str("Bluetooth audio is not available"),
            Status::Connected(name) => f.write_str(name),
            Status::NoDevice => f.write_str("No device"),
        }
    }
}

pub struct Switcher {
    host: BluezHost,
}

impl Switcher {
    pub fn new(host: BluezHost) -> Self {
        Self { host }
    }

    /// Known audio sinks; hidden ones only with `show_all`
    pub fn list(&self, show_all: bool) -> Vec<DeviceEntry> {
        let snapshot = self.host.snapshot();
        snapshot
            .audio_sinks()
            .into_iter()
            .filter(|d| ProfileState::ALL.contains(&d.profile))
            .map(|d| self.entry(d))
            .filter(|e| show_all || e.visible)
            .collect()
    }

    /// Connect a disconnected sink, otherwise disconnect it
    pub async fn toggle(&self, address: &DeviceAddress) -> Result<ToggleAction> {
        let state = self.host.snapshot().profile_state(address);

        if state == ProfileState::Disconnected {
            info!("[BT] Connecting {}", address);
            self.host.connect_device(address).await?;
            Ok(ToggleAction::Connected)
        } else {
            info!("[BT] Disconnecting {} ({})", address, state);
            self.host.disconnect_device(address).await?;
            Ok(ToggleAction::Disconnected)
        }
    }

    /// Disconnect every sink that is not already disconnected.
    /// Returns how many were disconnected.
    pub async fn disconnect_all(&self) -> Result<usize> {
        let addresses: Vec<DeviceAddress> = self
            .host
            .snapshot()
            .audio_sinks()
            .into_iter()
            .filter(|d| ProfileState::CONNECTED_STATES.contains(&d.profile))
            .map(|d| d.address.clone())
            .collect();

        let mut disconnected = 0;
        for address in &addresses {
            match self.host.disconnect_device(address).await {
                Ok(()) => disconnected += 1,
                Err(e) => warn!("[BT] {:#}", e),
            }
        }

        if disconnected < addresses.len() {
            return Err(anyhow!(
                "Disconnected {} of {} devices",
                disconnected,
                addresses.len()
            ));
        }
        Ok(disconnected)
    }

    pub fn status(&self) -> Status {
        let snapshot = self.host.snapshot();

        if !snapshot.powered {
            return Status::BluetoothDisabled;
        }
        if snapshot.audio_unavailable {
            return Status::AudioUnavailable;
        }

        snapshot
            .audio_sinks()
            .into_iter()
            .find(|d| ProfileState::CONNECTED_STATES.contains(&d.profile))
            .map(|d| Status::Connected(self.entry(d).display_name))
            .unwrap_or(Status::NoDevice)
    }

    /// Set a custom name; empty restores the device's own name
    pub fn rename(&self, address: &DeviceAddress, name: &str) -> Result<()> {
        self.host
            .registry()
            .set_display_name(address.device_id(), name)?;
        Ok(())
    }

    pub fn hide(&self, address: &DeviceAddress) -> Result<()> {
        self.host
            .registry()
            .set_visible(address.device_id(), false)?;
        Ok(())
    }

    pub fn show(&self, address: &DeviceAddress) -> Result<()> {
        self.host
            .registry()
            .set_visible(address.device_id(), true)?;
        Ok(())
    }

    /// Tag payload for a device.
    ///
    /// Without `name` the device must be known and its display name is used.
    /// With `name` an unknown device is fine: its real name is then unknown
    /// and the name is always stored.
    pub fn tag_for(&self, address: &DeviceAddress, name: Option<&str>) -> Result<TagPayload> {
        let snapshot = self.host.snapshot();
        let device = snapshot.device(address);

        match (name, device) {
            (Some(name), device) => Ok(TagPayload::for_device(
                address.clone(),
                name,
                device.and_then(|d| d.real_name()),
            )),
            (None, Some(device)) => {
                let entry = self.entry(device);
                Ok(TagPayload::for_device(
                    device.address.clone(),
                    &entry.display_name,
                    entry.real_name.as_deref(),
                ))
            }
            (None, None) => Err(anyhow!("Unknown device {}", address)),
        }
    }

    fn entry(&self, device: &DeviceInfo) -> DeviceEntry {
        let registry = self.host.registry();
        let id = device.address.device_id();
        let fallback = device
            .real_name()
            .unwrap_or_else(|| device.address.as_str());

        DeviceEntry {
            address: device.address.clone(),
            display_name: registry.display_name(id, fallback),
            real_name: device.real_name().map(str::to_string),
            visible: registry.is_visible(id),
            state: device.profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluez::fake::{sink, FakeBackend};
    use crate::registry::DeviceStore;
    use a2dp_switcher_core::TagVersion;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const KITCHEN: &str = "AA:BB:CC:DD:EE:01";
    const DESK: &str = "AA:BB:CC:DD:EE:02";

    fn addr(s: &str) -> DeviceAddress {
        DeviceAddress::parse(s).unwrap()
    }

    async fn open_switcher(backend: FakeBackend) -> (Switcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DeviceStore::open(dir.path()).unwrap());
        let (tx, _rx) = mpsc::channel(16);
        let host = BluezHost::open(Arc::new(backend), registry, tx).await.unwrap();
        (Switcher::new(host), dir)
    }

    fn two_sinks(powered: bool) -> FakeBackend {
        let connected = DeviceInfo {
            connected: true,
            ..sink(DESK, "Desk Speaker")
        };
        FakeBackend::new(powered, vec![sink(KITCHEN, "JBL Flip"), connected])
    }

    #[tokio::test]
    async fn test_list_hides_hidden_devices() {
        let (switcher, _dir) = open_switcher(two_sinks(true)).await;
        assert_eq!(switcher.list(false).len(), 2);

        switcher.hide(&addr(KITCHEN)).unwrap();
        let visible = switcher.list(false);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].address, addr(DESK));
        assert_eq!(visible[0].state, ProfileState::Connected);

        let all = switcher.list(true);
        assert_eq!(all.len(), 2);
        assert!(!all[0].visible);

        switcher.show(&addr(KITCHEN)).unwrap();
        assert_eq!(switcher.list(false).len(), 2);
    }

    #[tokio::test]
    async fn test_rename_changes_display_name() {
        let (switcher, _dir) = open_switcher(two_sinks(true)).await;
        switcher.rename(&addr(KITCHEN), "Kitchen").unwrap();

        let entry = &switcher.list(false)[0];
        assert_eq!(entry.display_name, "Kitchen");
        assert_eq!(entry.real_name.as_deref(), Some("JBL Flip"));

        switcher.rename(&addr(KITCHEN), "").unwrap();
        assert_eq!(switcher.list(false)[0].display_name, "JBL Flip");
    }

    #[tokio::test]
    async fn test_status() {
        let (switcher, _dir) = open_switcher(two_sinks(false)).await;
        assert_eq!(switcher.status(), Status::BluetoothDisabled);

        let (switcher, _dir) = open_switcher(two_sinks(true)).await;
        assert_eq!(switcher.status(), Status::Connected("Desk Speaker".into()));

        let (switcher, _dir) =
            open_switcher(FakeBackend::new(true, vec![sink(KITCHEN, "JBL Flip")])).await;
        assert_eq!(switcher.status(), Status::NoDevice);
        assert_eq!(switcher.status().to_string(), "No device");
    }

    #[tokio::test]
    async fn test_toggle() {
        let (switcher, _dir) = open_switcher(two_sinks(true)).await;

        assert_eq!(
            switcher.toggle(&addr(KITCHEN)).await.unwrap(),
            ToggleAction::Connected
        );
        assert_eq!(
            switcher.toggle(&addr(DESK)).await.unwrap(),
            ToggleAction::Disconnected
        );

        let states: Vec<_> = switcher.list(true).into_iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![ProfileState::Connected, ProfileState::Disconnected]
        );
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let (switcher, _dir) = open_switcher(two_sinks(true)).await;
        assert_eq!(switcher.disconnect_all().await.unwrap(), 1);
        assert_eq!(switcher.status(), Status::NoDevice);
        assert_eq!(switcher.disconnect_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tag_for_uses_name_rule() {
        let (switcher, _dir) = open_switcher(two_sinks(true)).await;

        let payload = switcher.tag_for(&addr(KITCHEN), None).unwrap();
        assert_eq!(payload.name, None);
        assert_eq!(payload.version, TagVersion::Query);

        switcher.rename(&addr(KITCHEN), "Kitchen").unwrap();
        let payload = switcher.tag_for(&addr(KITCHEN), None).unwrap();
        assert_eq!(payload.name.as_deref(), Some("Kitchen"));

        assert!(switcher.tag_for(&addr("00:00:00:00:00:09"), None).is_err());
    }

    #[tokio::test]
    async fn test_tag_for_with_name_override() {
        let (switcher, _dir) = open_switcher(two_sinks(true)).await;

        let payload = switcher.tag_for(&addr(KITCHEN), Some("JBL Flip")).unwrap();
        assert_eq!(payload.name, None);

        let payload = switcher.tag_for(&addr(KITCHEN), Some("Porch")).unwrap();
        assert_eq!(payload.name.as_deref(), Some("Porch"));

        // Unknown device: real name unknown, so the name is kept
        let unknown = addr("00:00:00:00:00:09");
        let payload = switcher.tag_for(&unknown, Some("Garage")).unwrap();
        assert_eq!(payload.address, unknown);
        assert_eq!(payload.name.as_deref(), Some("Garage"));
    }

    #[tokio::test]
    async fn test_disconnect_all_without_listener_does_not_block() {
        let sinks: Vec<DeviceInfo> = (1..=5)
            .map(|i| DeviceInfo {
                connected: true,
                ..sink(&format!("AA:BB:CC:DD:EE:{:02X}", i), "Speaker")
            })
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DeviceStore::open(dir.path()).unwrap());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let host = BluezHost::open(Arc::new(FakeBackend::new(true, sinks)), registry, tx)
            .await
            .unwrap();
        let switcher = Switcher::new(host);

        let count = tokio::time::timeout(Duration::from_secs(5), switcher.disconnect_all())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 5);
        assert_eq!(switcher.status(), Status::NoDevice);
    }
}

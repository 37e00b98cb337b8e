//! Async access to the Bluetooth stack

use a2dp_switcher_core::DeviceAddress;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bluer::{Adapter, Address, Device, Session, Uuid};
use tracing::debug;

use super::snapshot::{DeviceInfo, HostSnapshot};

/// A2DP audio sink service class
pub const A2DP_SINK_UUID: Uuid = Uuid::from_u128(0x0000110b_0000_1000_8000_00805f9b34fb);

/// A2DP audio source service class, offered by the local adapter
pub const A2DP_SOURCE_UUID: Uuid = Uuid::from_u128(0x0000110a_0000_1000_8000_00805f9b34fb);

/// Operations the host forwards to the Bluetooth stack
#[async_trait]
pub trait BluetoothBackend: Send + Sync + 'static {
    /// Read adapter power and every known device
    async fn load(&self) -> Result<HostSnapshot>;

    async fn set_powered(&self, powered: bool) -> Result<()>;

    async fn pair(&self, address: &DeviceAddress) -> Result<()>;

    async fn connect_sink(&self, address: &DeviceAddress) -> Result<()>;

    async fn disconnect_sink(&self, address: &DeviceAddress) -> Result<()>;

    /// Human-readable adapter name
    fn name(&self) -> String;
}

pub fn to_bluer(address: &DeviceAddress) -> Address {
    Address(address.octets())
}

pub fn from_bluer(address: Address) -> DeviceAddress {
    DeviceAddress::from_octets(address.0)
}

/// BlueZ over D-Bus
pub struct BluerBackend {
    _session: Session,
    adapter: Adapter,
}

impl BluerBackend {
    /// Open the named adapter, or the default one
    pub async fn open(adapter_name: Option<&str>) -> Result<Self> {
        let session = Session::new()
            .await
            .context("Failed to connect to bluetoothd")?;

        let adapter = match adapter_name {
            Some(name) => session
                .adapter(name)
                .with_context(|| format!("No Bluetooth adapter {}", name))?,
            None => session
                .default_adapter()
                .await
                .context("No Bluetooth adapter")?,
        };

        Ok(Self {
            _session: session,
            adapter,
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn device(&self, address: &DeviceAddress) -> Result<Device> {
        self.adapter
            .device(to_bluer(address))
            .with_context(|| format!("Unknown device {}", address))
    }
}

/// Read the properties of one device
pub async fn device_info(device: &Device) -> Result<DeviceInfo> {
    let uuids = device.uuids().await?.unwrap_or_default();
    let alias = device.alias().await?;

    Ok(DeviceInfo {
        name: device.name().await?,
        alias: Some(alias).filter(|a| !a.is_empty()),
        paired: device.is_paired().await?,
        connected: device.is_connected().await?,
        audio_sink: uuids.contains(&A2DP_SINK_UUID),
        ..DeviceInfo::new(from_bluer(device.address()))
    })
}

#[async_trait]
impl BluetoothBackend for BluerBackend {
    async fn load(&self) -> Result<HostSnapshot> {
        let powered = self.adapter.is_powered().await?;

        let mut devices = Vec::new();
        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            devices.push(device_info(&device).await?);
        }

        // Unknown service list means bluetoothd has not published it yet
        let audio_unavailable = match self.adapter.uuids().await? {
            Some(uuids) => !uuids.contains(&A2DP_SOURCE_UUID),
            None => false,
        };

        debug!(
            "[BT] Loaded {} devices, powered={}, audio={}",
            devices.len(),
            powered,
            !audio_unavailable
        );
        Ok(HostSnapshot {
            audio_unavailable,
            ..HostSnapshot::new(powered, devices)
        })
    }

    async fn set_powered(&self, powered: bool) -> Result<()> {
        self.adapter.set_powered(powered).await?;
        Ok(())
    }

    async fn pair(&self, address: &DeviceAddress) -> Result<()> {
        self.device(address)?
            .pair()
            .await
            .with_context(|| format!("Pairing with {} failed", address))
    }

    async fn connect_sink(&self, address: &DeviceAddress) -> Result<()> {
        self.device(address)?
            .connect_profile(&A2DP_SINK_UUID)
            .await
            .with_context(|| format!("Connecting audio sink {} failed", address))
    }

    async fn disconnect_sink(&self, address: &DeviceAddress) -> Result<()> {
        self.device(address)?
            .disconnect_profile(&A2DP_SINK_UUID)
            .await
            .with_context(|| format!("Disconnecting audio sink {} failed", address))
    }

    fn name(&self) -> String {
        self.adapter.name().to_string()
    }
}

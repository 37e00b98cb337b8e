//! In-memory backend for tests

use a2dp_switcher_core::DeviceAddress;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::backend::BluetoothBackend;
use super::snapshot::{DeviceInfo, HostSnapshot};

pub struct FakeBackend {
    pub powered: bool,
    pub devices: Vec<DeviceInfo>,
    pub succeed: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(powered: bool, devices: Vec<DeviceInfo>) -> Self {
        Self {
            powered,
            devices,
            succeed: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(self) -> Self {
        self.succeed.store(false, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn call(&self, call: String) -> Result<()> {
        self.calls.lock().push(call);
        if self.succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("refused by fake backend"))
        }
    }
}

/// A sink device with the given advertised name
pub fn sink(address: &str, name: &str) -> DeviceInfo {
    DeviceInfo {
        name: Some(name.to_string()),
        paired: true,
        audio_sink: true,
        ..DeviceInfo::new(DeviceAddress::parse(address).expect("test address"))
    }
}

#[async_trait]
impl BluetoothBackend for FakeBackend {
    async fn load(&self) -> Result<HostSnapshot> {
        Ok(HostSnapshot::new(self.powered, self.devices.clone()))
    }

    async fn set_powered(&self, powered: bool) -> Result<()> {
        self.call(format!("power {}", powered))
    }

    async fn pair(&self, address: &DeviceAddress) -> Result<()> {
        self.call(format!("pair {}", address))
    }

    async fn connect_sink(&self, address: &DeviceAddress) -> Result<()> {
        self.call(format!("connect {}", address))
    }

    async fn disconnect_sink(&self, address: &DeviceAddress) -> Result<()> {
        self.call(format!("disconnect {}", address))
    }

    fn name(&self) -> String {
        "hci-test".into()
    }
}

//! Cached view of the adapter and its devices
//!
//! The workflow queries the host synchronously, so the host answers from this
//! snapshot. Property changes are applied here before the matching workflow
//! event is sent, so a workflow resuming on an event sees the new state.

use a2dp_switcher_core::{AdapterState, BondState, DeviceAddress, ProfileState, WorkflowEvent};
use std::collections::HashMap;

/// One remote device as last seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub address: DeviceAddress,
    /// Name advertised by the device
    pub name: Option<String>,
    /// Local alias, which BlueZ defaults to the name or address
    pub alias: Option<String>,
    pub paired: bool,
    pub connected: bool,
    /// Advertises the A2DP sink service
    pub audio_sink: bool,
    pub profile: ProfileState,
}

impl DeviceInfo {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            name: None,
            alias: None,
            paired: false,
            connected: false,
            audio_sink: false,
            profile: ProfileState::Disconnected,
        }
    }

    /// Best name the device is known by, without registry overrides
    pub fn real_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.alias.as_deref())
    }

    fn link_profile(&self) -> ProfileState {
        if self.connected && self.audio_sink {
            ProfileState::Connected
        } else {
            ProfileState::Disconnected
        }
    }
}

/// A change observed on the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostChange {
    Powered(bool),
    DeviceAdded(DeviceInfo),
    DeviceRemoved(DeviceAddress),
    Name {
        address: DeviceAddress,
        name: String,
    },
    Alias {
        address: DeviceAddress,
        alias: String,
    },
    Paired {
        address: DeviceAddress,
        paired: bool,
    },
    Connected {
        address: DeviceAddress,
        connected: bool,
    },
    AudioSink {
        address: DeviceAddress,
        audio_sink: bool,
    },
    /// Local bookkeeping while a profile request is in flight
    Profile {
        address: DeviceAddress,
        state: ProfileState,
    },
}

#[derive(Debug, Clone, Default)]
pub struct HostSnapshot {
    pub powered: bool,
    /// Adapter does not offer the A2DP source role
    pub audio_unavailable: bool,
    pub devices: HashMap<DeviceAddress, DeviceInfo>,
}

impl HostSnapshot {
    /// Build from loaded devices; profile states follow each device's link
    pub fn new(powered: bool, devices: impl IntoIterator<Item = DeviceInfo>) -> Self {
        Self {
            powered,
            audio_unavailable: false,
            devices: devices
                .into_iter()
                .map(|mut d| {
                    d.profile = d.link_profile();
                    (d.address.clone(), d)
                })
                .collect(),
        }
    }

    pub fn device(&self, address: &DeviceAddress) -> Option<&DeviceInfo> {
        self.devices.get(address)
    }

    pub fn profile_state(&self, address: &DeviceAddress) -> ProfileState {
        self.device(address)
            .map(|d| d.profile)
            .unwrap_or(ProfileState::Disconnected)
    }

    /// Audio sinks, sorted by address
    pub fn audio_sinks(&self) -> Vec<&DeviceInfo> {
        let mut sinks: Vec<_> = self.devices.values().filter(|d| d.audio_sink).collect();
        sinks.sort_by_key(|d| d.address.as_u64());
        sinks
    }

    /// Apply a change, returning the workflow event it implies
    pub fn apply(&mut self, change: HostChange) -> Option<WorkflowEvent> {
        match change {
            HostChange::Powered(powered) => {
                if self.powered == powered {
                    return None;
                }
                self.powered = powered;
                Some(WorkflowEvent::AdapterStateChanged(if powered {
                    AdapterState::On
                } else {
                    AdapterState::Off
                }))
            }
            HostChange::DeviceAdded(mut info) => {
                info.profile = info.link_profile();
                self.devices.insert(info.address.clone(), info);
                None
            }
            HostChange::DeviceRemoved(address) => {
                self.devices.remove(&address);
                None
            }
            HostChange::Name { address, name } => {
                self.entry(&address).name = Some(name);
                None
            }
            HostChange::Alias { address, alias } => {
                self.entry(&address).alias = Some(alias);
                None
            }
            HostChange::Paired { address, paired } => {
                let device = self.entry(&address);
                if device.paired == paired {
                    return None;
                }
                device.paired = paired;
                Some(WorkflowEvent::BondStateChanged {
                    address,
                    state: if paired { BondState::Bonded } else { BondState::None },
                })
            }
            HostChange::Connected { address, connected } => {
                let device = self.entry(&address);
                device.connected = connected;
                self.sync_profile(address)
            }
            HostChange::AudioSink {
                address,
                audio_sink,
            } => {
                self.entry(&address).audio_sink = audio_sink;
                self.sync_profile(address)
            }
            HostChange::Profile { address, state } => {
                let device = self.entry(&address);
                if device.profile == state {
                    return None;
                }
                device.profile = state;
                device.audio_sink = true;
                if state.is_connected() {
                    device.connected = true;
                }
                Some(WorkflowEvent::ProfileConnectionStateChanged { address, state })
            }
        }
    }

    fn sync_profile(&mut self, address: DeviceAddress) -> Option<WorkflowEvent> {
        let device = self.entry(&address);
        // A pending profile request is settled by its own result, not the link bit
        if device.profile == ProfileState::Connecting {
            return None;
        }
        let state = device.link_profile();
        if device.profile == state || !device.audio_sink {
            device.profile = state;
            return None;
        }
        device.profile = state;
        Some(WorkflowEvent::ProfileConnectionStateChanged { address, state })
    }

    fn entry(&mut self, address: &DeviceAddress) -> &mut DeviceInfo {
        self.devices
            .entry(address.clone())
            .or_insert_with(|| DeviceInfo::new(address.clone()))
    }
}

//! Adapter and device property monitor
//!
//! Merges the adapter stream and one stream per device into a single ordered
//! sequence of snapshot changes.

use anyhow::Result;
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty};
use futures::stream::{SelectAll, Stream, StreamExt};
use std::pin::Pin;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{device_info, from_bluer, A2DP_SINK_UUID};
use super::host::BluezHost;
use super::snapshot::{DeviceInfo, HostChange};

type DeviceStream = Pin<Box<dyn Stream<Item = (Address, DeviceEvent)> + Send>>;

pub struct Monitor {
    adapter: Adapter,
    host: BluezHost,
}

impl Monitor {
    pub fn new(adapter: Adapter, host: BluezHost) -> Self {
        Self { adapter, host }
    }

    /// Run until the event channel closes or the adapter goes away
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("[BT] Monitor stopped: {:#}", e);
            }
        })
    }

    async fn run(self) -> Result<()> {
        let mut adapter_events = Box::pin(self.adapter.events().await?);
        let mut device_events: SelectAll<DeviceStream> = SelectAll::new();

        for address in self.adapter.device_addresses().await? {
            device_events.push(self.device_stream(address).await?);
        }

        info!(
            "[BT] Monitoring {} ({} devices)",
            self.adapter.name(),
            device_events.len()
        );

        loop {
            tokio::select! {
                event = adapter_events.next() => {
                    let Some(event) = event else { break };
                    if !self.adapter_event(event, &mut device_events).await? {
                        break;
                    }
                }
                Some((address, event)) = device_events.next(), if !device_events.is_empty() => {
                    if let Some(change) = device_change(address, event) {
                        if !self.host.observe(change).await {
                            break;
                        }
                    }
                }
            }
        }

        debug!("[BT] Monitor finished");
        Ok(())
    }

    async fn adapter_event(
        &self,
        event: AdapterEvent,
        device_events: &mut SelectAll<DeviceStream>,
    ) -> Result<bool> {
        let change = match event {
            AdapterEvent::DeviceAdded(address) => match self.added_device(address).await {
                Ok((info, stream)) => {
                    device_events.push(stream);
                    debug!("[BT] Device added: {}", address);
                    HostChange::DeviceAdded(info)
                }
                Err(e) => {
                    warn!("[BT] Skipping device {}: {:#}", address, e);
                    return Ok(true);
                }
            },
            AdapterEvent::DeviceRemoved(address) => {
                debug!("[BT] Device removed: {}", address);
                HostChange::DeviceRemoved(from_bluer(address))
            }
            AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
                info!("[BT] Adapter powered: {}", powered);
                HostChange::Powered(powered)
            }
            _ => return Ok(true),
        };

        Ok(self.host.observe(change).await)
    }

    async fn added_device(&self, address: Address) -> Result<(DeviceInfo, DeviceStream)> {
        let device = self.adapter.device(address)?;
        let info = device_info(&device).await?;
        Ok((info, self.device_stream(address).await?))
    }

    async fn device_stream(&self, address: Address) -> Result<DeviceStream> {
        let device = self.adapter.device(address)?;
        let events = device.events().await?;
        Ok(Box::pin(events.map(move |event| (address, event))))
    }
}

/// Snapshot change implied by a device property event
pub fn device_change(address: Address, event: DeviceEvent) -> Option<HostChange> {
    let address = from_bluer(address);

    let property = match event {
        DeviceEvent::PropertyChanged(property) => property,
        #[allow(unreachable_patterns)]
        _ => return None,
    };

    match property {
        DeviceProperty::Name(name) => Some(HostChange::Name { address, name }),
        DeviceProperty::Alias(alias) => Some(HostChange::Alias { address, alias }),
        DeviceProperty::Paired(paired) => Some(HostChange::Paired { address, paired }),
        DeviceProperty::Connected(connected) => Some(HostChange::Connected { address, connected }),
        DeviceProperty::Uuids(uuids) => Some(HostChange::AudioSink {
            address,
            audio_sink: uuids.contains(&A2DP_SINK_UUID),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn address() -> Address {
        Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
    }

    #[test]
    fn test_paired_property() {
        let change = device_change(
            address(),
            DeviceEvent::PropertyChanged(DeviceProperty::Paired(true)),
        );
        assert_eq!(
            change,
            Some(HostChange::Paired {
                address: from_bluer(address()),
                paired: true,
            })
        );
    }

    #[test]
    fn test_uuids_property_marks_sink() {
        let uuids: HashSet<_> = [A2DP_SINK_UUID].into_iter().collect();
        let change = device_change(
            address(),
            DeviceEvent::PropertyChanged(DeviceProperty::Uuids(uuids)),
        );
        assert!(matches!(
            change,
            Some(HostChange::AudioSink {
                audio_sink: true,
                ..
            })
        ));
    }

    #[test]
    fn test_irrelevant_property() {
        let change = device_change(
            address(),
            DeviceEvent::PropertyChanged(DeviceProperty::Trusted(true)),
        );
        assert_eq!(change, None);
    }
}

//! BlueZ-backed workflow collaborators
//!
//! Queries answer from the snapshot. Requests return at once and run on the
//! runtime; their outcome is reported through the workflow event channel.

use a2dp_switcher_core::{
    AdapterState, AudioProfileProxy, BluetoothHost, BondState, BoundService, DeviceAddress,
    DeviceRegistry, ProfileState, ServiceBinder, WorkflowEvent,
};
use anyhow::Result;
use parking_lot::{RwLock, RwLockReadGuard};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::backend::BluetoothBackend;
use super::snapshot::{HostChange, HostSnapshot};

#[derive(Clone)]
pub struct BluezHost {
    backend: Arc<dyn BluetoothBackend>,
    snapshot: Arc<RwLock<HostSnapshot>>,
    events: mpsc::Sender<WorkflowEvent>,
    registry: Arc<dyn DeviceRegistry>,
    runtime: Handle,
}

impl BluezHost {
    /// Load the initial snapshot. Must be called from within a tokio runtime.
    pub async fn open(
        backend: Arc<dyn BluetoothBackend>,
        registry: Arc<dyn DeviceRegistry>,
        events: mpsc::Sender<WorkflowEvent>,
    ) -> Result<Self> {
        let snapshot = backend.load().await?;

        Ok(Self {
            backend,
            snapshot: Arc::new(RwLock::new(snapshot)),
            events,
            registry,
            runtime: Handle::current(),
        })
    }

    pub fn snapshot(&self) -> RwLockReadGuard<'_, HostSnapshot> {
        self.snapshot.read()
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    pub fn adapter_name(&self) -> String {
        self.backend.name()
    }

    /// Handles delivered by a bind
    pub fn service(&self) -> BoundService {
        BoundService {
            registry: self.registry.clone(),
            proxy: Arc::new(self.clone()),
        }
    }

    /// Apply an observed change and forward the event it implies.
    /// Returns `false` once nobody is listening.
    pub async fn observe(&self, change: HostChange) -> bool {
        let event = self.snapshot.write().apply(change);
        match event {
            Some(event) => self.forward(event).await,
            None => !self.events.is_closed(),
        }
    }

    /// Connect the audio sink and wait for the result
    pub async fn connect_device(&self, address: &DeviceAddress) -> Result<()> {
        self.mark(address, ProfileState::Connecting);

        match self.backend.connect_sink(address).await {
            Ok(()) => {
                self.observe(HostChange::Profile {
                    address: address.clone(),
                    state: ProfileState::Connected,
                })
                .await;
                Ok(())
            }
            Err(e) => {
                self.observe(HostChange::Profile {
                    address: address.clone(),
                    state: ProfileState::Disconnected,
                })
                .await;
                Err(e)
            }
        }
    }

    /// Disconnect the audio sink and wait for the result
    pub async fn disconnect_device(&self, address: &DeviceAddress) -> Result<()> {
        let before = self.snapshot.read().profile_state(address);
        self.mark(address, ProfileState::Disconnecting);

        match self.backend.disconnect_sink(address).await {
            Ok(()) => {
                self.observe(HostChange::Profile {
                    address: address.clone(),
                    state: ProfileState::Disconnected,
                })
                .await;
                Ok(())
            }
            Err(e) => {
                self.mark(address, before);
                Err(e)
            }
        }
    }

    /// Pair and wait for the result
    pub async fn pair_device(&self, address: &DeviceAddress) -> Result<()> {
        match self.backend.pair(address).await {
            Ok(()) => {
                self.observe(HostChange::Paired {
                    address: address.clone(),
                    paired: true,
                })
                .await;
                Ok(())
            }
            Err(e) => {
                self.forward(WorkflowEvent::BondStateChanged {
                    address: address.clone(),
                    state: BondState::None,
                })
                .await;
                Err(e)
            }
        }
    }

    /// Power the adapter on and wait for the result
    pub async fn power_on(&self) -> Result<()> {
        match self.backend.set_powered(true).await {
            Ok(()) => {
                self.observe(HostChange::Powered(true)).await;
                Ok(())
            }
            Err(e) => {
                self.forward(WorkflowEvent::AdapterStateChanged(AdapterState::Off))
                    .await;
                Err(e)
            }
        }
    }

    /// Record a pending profile state without reporting it
    fn mark(&self, address: &DeviceAddress, state: ProfileState) {
        self.snapshot.write().apply(HostChange::Profile {
            address: address.clone(),
            state,
        });
    }

    async fn forward(&self, event: WorkflowEvent) -> bool {
        if self.events.send(event).await.is_err() {
            debug!("[BT] Event channel closed");
            return false;
        }
        true
    }

    /// Run a request in the background. Refused when nobody would hear the outcome.
    fn spawn_request<F>(&self, request: &'static str, task: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.events.is_closed() {
            warn!("[BT] Refusing {} request: event channel closed", request);
            return false;
        }

        self.runtime.spawn(async move {
            if let Err(e) = task.await {
                warn!("[BT] {} request failed: {:#}", request, e);
            }
        });
        true
    }
}

impl BluetoothHost for BluezHost {
    fn is_enabled(&self) -> bool {
        self.snapshot.read().powered
    }

    fn request_enable(&self) -> bool {
        let host = self.clone();
        self.spawn_request("enable", async move { host.power_on().await })
    }

    fn is_bonded(&self, address: &DeviceAddress) -> bool {
        self.snapshot
            .read()
            .device(address)
            .map(|d| d.paired)
            .unwrap_or(false)
    }

    fn request_bond(&self, address: &DeviceAddress) -> bool {
        let host = self.clone();
        let address = address.clone();
        self.spawn_request("bond", async move { host.pair_device(&address).await })
    }

    fn device_name(&self, address: &DeviceAddress) -> Option<String> {
        self.snapshot
            .read()
            .device(address)
            .and_then(|d| d.real_name().map(str::to_string))
    }
}

impl ServiceBinder for BluezHost {
    fn request_bind(&self) -> bool {
        let host = self.clone();
        self.spawn_request("bind", async move {
            host.forward(WorkflowEvent::ServiceBound(host.service())).await;
            Ok(())
        })
    }
}

impl AudioProfileProxy for BluezHost {
    fn connect(&self, address: &DeviceAddress) -> bool {
        let host = self.clone();
        let address = address.clone();
        self.spawn_request("connect", async move { host.connect_device(&address).await })
    }

    fn disconnect(&self, address: &DeviceAddress) -> bool {
        let host = self.clone();
        let address = address.clone();
        self.spawn_request("disconnect", async move {
            host.disconnect_device(&address).await
        })
    }

    fn connection_state(&self, address: &DeviceAddress) -> ProfileState {
        self.snapshot.read().profile_state(address)
    }

    fn devices_matching(&self, states: &[ProfileState]) -> Vec<DeviceAddress> {
        self.snapshot
            .read()
            .audio_sinks()
            .into_iter()
            .filter(|d| states.contains(&d.profile))
            .map(|d| d.address.clone())
            .collect()
    }
}

//! Connection workflow state machine
//!
//! Brings a target device to a connected audio profile in four steps:
//! ```text
//! adapter enabled -> service bound -> device bonded -> profile connected
//! ```
//! Each step is checked synchronously on every resume. A missing step is
//! requested and the workflow waits for the matching event. Transitions are
//! run-to-completion and the workflow never blocks or times out on its own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::address::DeviceAddress;
use crate::collaborators::{
    AdapterState, AudioProfileProxy, BluetoothHost, BondState, DeviceRegistry, ProfileState,
    ServiceBinder,
};
use crate::tag::TagPayload;
use crate::timing;

/// Why a workflow failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Adapter was switched off while the workflow was running
    BluetoothDisabled,
    EnableRequestRejected,
    BondRequestRejected,
    BondFailed,
    ConnectRequestRejected,
    ConnectFailed,
}

impl FailureReason {
    /// Message shown to the user
    pub fn message(self) -> &'static str {
        match self {
            FailureReason::BluetoothDisabled => "Bluetooth was turned off",
            FailureReason::EnableRequestRejected => "Could not enable Bluetooth",
            FailureReason::BondRequestRejected | FailureReason::BondFailed => {
                "Could not pair with the device"
            }
            FailureReason::ConnectRequestRejected | FailureReason::ConnectFailed => {
                "Could not connect to the device"
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Workflow states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    AwaitingAdapterEnable,
    AwaitingServiceBind,
    AwaitingBond,
    AwaitingProfileConnect,
    Success,
    Failed(FailureReason),
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Success | WorkflowState::Failed(_))
    }

    /// How long the caller keeps a finished workflow on screen
    pub fn dismiss_delay(&self) -> Option<Duration> {
        match self {
            WorkflowState::Success => Some(timing::SUCCESS_DISMISS_DELAY),
            WorkflowState::Failed(_) => Some(timing::FAILURE_DISMISS_DELAY),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::AwaitingAdapterEnable => f.write_str("Enabling Bluetooth"),
            WorkflowState::AwaitingServiceBind => f.write_str("Connecting to the audio service"),
            WorkflowState::AwaitingBond => f.write_str("Pairing with the device"),
            WorkflowState::AwaitingProfileConnect => f.write_str("Connecting to the device"),
            WorkflowState::Success => f.write_str("Connected"),
            WorkflowState::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Handles delivered once the device-management service is bound
#[derive(Clone)]
pub struct BoundService {
    pub registry: Arc<dyn DeviceRegistry>,
    pub proxy: Arc<dyn AudioProfileProxy>,
}

impl fmt::Debug for BoundService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundService").finish_non_exhaustive()
    }
}

/// Notifications from the platform, delivered in the order they were observed
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    AdapterStateChanged(AdapterState),
    BondStateChanged {
        address: DeviceAddress,
        state: BondState,
    },
    ProfileConnectionStateChanged {
        address: DeviceAddress,
        state: ProfileState,
    },
    ServiceBound(BoundService),
}

impl WorkflowEvent {
    /// Device the event is about, if any
    pub fn address(&self) -> Option<&DeviceAddress> {
        match self {
            WorkflowEvent::BondStateChanged { address, .. }
            | WorkflowEvent::ProfileConnectionStateChanged { address, .. } => Some(address),
            _ => None,
        }
    }
}

/// Platform handles a workflow runs against
#[derive(Clone)]
pub struct Collaborators {
    pub host: Arc<dyn BluetoothHost>,
    pub binder: Arc<dyn ServiceBinder>,
    /// Already-bound service, if the caller holds one
    pub service: Option<BoundService>,
}

impl Collaborators {
    pub fn new(host: Arc<dyn BluetoothHost>, binder: Arc<dyn ServiceBinder>) -> Self {
        Self {
            host,
            binder,
            service: None,
        }
    }

    pub fn with_service(mut self, service: BoundService) -> Self {
        self.service = Some(service);
        self
    }
}

/// Treatment of a `Connecting` report while waiting for the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectingPolicy {
    /// Keep waiting
    #[default]
    Ignore,
    /// Fail with `ConnectFailed`
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkflowPolicy {
    pub connecting: ConnectingPolicy,
}

/// Outcome of delivering an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed to another non-terminal state
    Moved {
        from: WorkflowState,
        to: WorkflowState,
    },
    /// Event was relevant but the state is the same
    Unchanged(WorkflowState),
    /// Event was for another device, or the workflow had already finished
    Ignored,
    /// Workflow reached a terminal state
    Finished(WorkflowState),
}

/// One connection attempt for one device
pub struct ConnectionWorkflow {
    target_address: DeviceAddress,
    target_name: Option<String>,
    state: WorkflowState,
    collaborators: Collaborators,
    policy: WorkflowPolicy,
    bind_rejected: bool,
}

impl ConnectionWorkflow {
    /// Create a workflow and run the first resume evaluation
    pub fn start(
        target_address: DeviceAddress,
        target_name: Option<String>,
        collaborators: Collaborators,
        policy: WorkflowPolicy,
    ) -> Self {
        let mut workflow = Self {
            target_address,
            target_name,
            state: WorkflowState::AwaitingAdapterEnable,
            collaborators,
            policy,
            bind_rejected: false,
        };

        info!(
            "[WORKFLOW] Connecting {} ({})",
            workflow.target_address,
            workflow.target_name.as_deref().unwrap_or("no name override")
        );
        workflow.evaluate();
        workflow
    }

    /// Start a workflow for a decoded tag
    pub fn for_tag(
        payload: &TagPayload,
        collaborators: Collaborators,
        policy: WorkflowPolicy,
    ) -> Self {
        Self::start(
            payload.address.clone(),
            payload.name.clone(),
            collaborators,
            policy,
        )
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn target_address(&self) -> &DeviceAddress {
        &self.target_address
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the most recent bind request was refused. The workflow stays
    /// in `AwaitingServiceBind`; [`resume`](Self::resume) asks again.
    pub fn bind_rejected(&self) -> bool {
        self.bind_rejected
    }

    /// Re-run the step checks from the top
    pub fn resume(&mut self) -> Transition {
        if self.state.is_terminal() {
            return Transition::Ignored;
        }

        let from = self.state;
        self.evaluate();
        self.transition_from(from)
    }

    /// Process one platform event
    pub fn handle_event(&mut self, event: WorkflowEvent) -> Transition {
        if self.state.is_terminal() {
            return Transition::Ignored;
        }

        if let Some(address) = event.address() {
            if *address != self.target_address {
                return Transition::Ignored;
            }
        }

        let from = self.state;

        // Resuming is limited to the state waiting for the event. From any
        // other state the step it unblocks is already done, and resuming would
        // repeat the request of the current step.
        match event {
            WorkflowEvent::AdapterStateChanged(AdapterState::On) => {
                if from == WorkflowState::AwaitingAdapterEnable {
                    self.evaluate();
                }
            }
            WorkflowEvent::AdapterStateChanged(AdapterState::Off) => {
                self.fail(FailureReason::BluetoothDisabled);
            }
            WorkflowEvent::BondStateChanged { state, .. } => match state {
                BondState::Bonded => {
                    if from == WorkflowState::AwaitingBond {
                        self.evaluate();
                    }
                }
                BondState::None => self.fail(FailureReason::BondFailed),
                BondState::Bonding => {}
            },
            WorkflowEvent::ProfileConnectionStateChanged { state, .. } => {
                self.profile_state_changed(state);
            }
            WorkflowEvent::ServiceBound(service) => {
                self.collaborators.service = Some(service);
                if from == WorkflowState::AwaitingServiceBind {
                    self.evaluate();
                }
            }
        }

        self.transition_from(from)
    }

    fn evaluate(&mut self) {
        let host = self.collaborators.host.clone();

        if !host.is_enabled() {
            if host.request_enable() {
                self.enter(WorkflowState::AwaitingAdapterEnable);
            } else {
                warn!("[WORKFLOW] Enable request rejected");
                self.fail(FailureReason::EnableRequestRejected);
            }
            return;
        }

        let service = match &self.collaborators.service {
            Some(service) => service.clone(),
            None => {
                self.bind_rejected = !self.collaborators.binder.request_bind();
                if self.bind_rejected {
                    warn!("[WORKFLOW] Bind request rejected, waiting for a retry");
                }
                self.enter(WorkflowState::AwaitingServiceBind);
                return;
            }
        };
        self.bind_rejected = false;

        if !host.is_bonded(&self.target_address) {
            if host.request_bond(&self.target_address) {
                self.enter(WorkflowState::AwaitingBond);
            } else {
                warn!("[WORKFLOW] Bond request rejected for {}", self.target_address);
                self.fail(FailureReason::BondRequestRejected);
            }
            return;
        }

        if let Some(name) = &self.target_name {
            let id = self.target_address.device_id();
            if let Err(e) = service.registry.set_display_name(id, name) {
                warn!("[WORKFLOW] Failed to store name {:?} for {}: {}", name, id, e);
            }
        }

        let state = service.proxy.connection_state(&self.target_address);
        if state.is_connected() {
            self.enter(WorkflowState::Success);
        } else if service.proxy.connect(&self.target_address) {
            self.enter(WorkflowState::AwaitingProfileConnect);
        } else {
            warn!("[WORKFLOW] Connect request rejected for {}", self.target_address);
            self.fail(FailureReason::ConnectRequestRejected);
        }
    }

    fn profile_state_changed(&mut self, state: ProfileState) {
        match state {
            ProfileState::Connected | ProfileState::Playing => self.enter(WorkflowState::Success),
            ProfileState::Connecting => match self.policy.connecting {
                ConnectingPolicy::Ignore => {}
                ConnectingPolicy::Fail => self.fail(FailureReason::ConnectFailed),
            },
            // Transient on the way down, the final report follows
            ProfileState::Disconnecting => {}
            ProfileState::Disconnected => self.fail(FailureReason::ConnectFailed),
        }
    }

    fn fail(&mut self, reason: FailureReason) {
        self.enter(WorkflowState::Failed(reason));
    }

    fn enter(&mut self, to: WorkflowState) {
        if self.state != to {
            debug!("[WORKFLOW] {:?} -> {:?}", self.state, to);
        }
        self.state = to;

        match to {
            WorkflowState::Success => info!("[WORKFLOW] Connected to {}", self.target_address),
            WorkflowState::Failed(reason) => {
                warn!("[WORKFLOW] {} failed: {:?}", self.target_address, reason)
            }
            _ => {}
        }
    }

    fn transition_from(&self, from: WorkflowState) -> Transition {
        let to = self.state;
        if to.is_terminal() {
            Transition::Finished(to)
        } else if to != from {
            Transition::Moved { from, to }
        } else {
            Transition::Unchanged(to)
        }
    }
}

impl fmt::Debug for ConnectionWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionWorkflow")
            .field("target_address", &self.target_address)
            .field("target_name", &self.target_name)
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("bind_rejected", &self.bind_rejected)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::DeviceId;
    use crate::collaborators::RegistryError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const TARGET: &str = "AA:BB:CC:DD:EE:FF";

    struct Host {
        enabled: AtomicBool,
        bonded: AtomicBool,
        accept: bool,
    }

    impl BluetoothHost for Host {
        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
        fn request_enable(&self) -> bool {
            self.accept
        }
        fn is_bonded(&self, _address: &DeviceAddress) -> bool {
            self.bonded.load(Ordering::SeqCst)
        }
        fn request_bond(&self, _address: &DeviceAddress) -> bool {
            self.accept
        }
        fn device_name(&self, _address: &DeviceAddress) -> Option<String> {
            None
        }
    }

    struct Binder {
        accept: AtomicBool,
        requests: AtomicUsize,
    }

    impl ServiceBinder for Binder {
        fn request_bind(&self) -> bool {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.accept.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct Registry {
        names: Mutex<Vec<(DeviceId, String)>>,
    }

    impl DeviceRegistry for Registry {
        fn display_name(&self, _id: DeviceId, fallback: &str) -> String {
            fallback.to_string()
        }
        fn set_display_name(&self, id: DeviceId, name: &str) -> Result<(), RegistryError> {
            self.names.lock().unwrap().push((id, name.to_string()));
            Ok(())
        }
        fn is_visible(&self, _id: DeviceId) -> bool {
            true
        }
        fn set_visible(&self, _id: DeviceId, _visible: bool) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    struct Proxy {
        state: Mutex<ProfileState>,
        accept: bool,
    }

    impl AudioProfileProxy for Proxy {
        fn connect(&self, _address: &DeviceAddress) -> bool {
            self.accept
        }
        fn disconnect(&self, _address: &DeviceAddress) -> bool {
            true
        }
        fn connection_state(&self, _address: &DeviceAddress) -> ProfileState {
            *self.state.lock().unwrap()
        }
        fn devices_matching(&self, _states: &[ProfileState]) -> Vec<DeviceAddress> {
            Vec::new()
        }
    }

    fn target() -> DeviceAddress {
        DeviceAddress::parse(TARGET).unwrap()
    }

    fn host(enabled: bool, bonded: bool, accept: bool) -> Arc<Host> {
        Arc::new(Host {
            enabled: AtomicBool::new(enabled),
            bonded: AtomicBool::new(bonded),
            accept,
        })
    }

    fn binder(accept: bool) -> Arc<Binder> {
        Arc::new(Binder {
            accept: AtomicBool::new(accept),
            requests: AtomicUsize::new(0),
        })
    }

    fn service(state: ProfileState, accept: bool) -> (BoundService, Arc<Registry>) {
        let registry = Arc::new(Registry::default());
        let service = BoundService {
            registry: registry.clone(),
            proxy: Arc::new(Proxy {
                state: Mutex::new(state),
                accept,
            }),
        };
        (service, registry)
    }

    fn ready_workflow(policy: WorkflowPolicy) -> ConnectionWorkflow {
        let (service, _) = service(ProfileState::Disconnected, true);
        let collaborators =
            Collaborators::new(host(true, true, true), binder(true)).with_service(service);
        ConnectionWorkflow::start(target(), None, collaborators, policy)
    }

    fn profile(state: ProfileState) -> WorkflowEvent {
        WorkflowEvent::ProfileConnectionStateChanged {
            address: target(),
            state,
        }
    }

    #[test]
    fn test_enable_rejected() {
        let collaborators = Collaborators::new(host(false, true, false), binder(true));
        let workflow = ConnectionWorkflow::start(target(), None, collaborators, Default::default());
        assert_eq!(
            workflow.state(),
            WorkflowState::Failed(FailureReason::EnableRequestRejected)
        );
    }

    #[test]
    fn test_already_connected_succeeds_immediately() {
        let (service, _) = service(ProfileState::Playing, true);
        let collaborators =
            Collaborators::new(host(true, true, true), binder(true)).with_service(service);
        let workflow = ConnectionWorkflow::start(target(), None, collaborators, Default::default());
        assert_eq!(workflow.state(), WorkflowState::Success);
        assert!(workflow.is_finished());
    }

    #[test]
    fn test_connect_rejected() {
        let (service, _) = service(ProfileState::Disconnected, false);
        let collaborators =
            Collaborators::new(host(true, true, true), binder(true)).with_service(service);
        let workflow = ConnectionWorkflow::start(target(), None, collaborators, Default::default());
        assert_eq!(
            workflow.state(),
            WorkflowState::Failed(FailureReason::ConnectRequestRejected)
        );
    }

    #[test]
    fn test_bind_rejection_stalls_until_resumed() {
        let binder = binder(false);
        let collaborators = Collaborators::new(host(true, true, true), binder.clone());
        let mut workflow =
            ConnectionWorkflow::start(target(), None, collaborators, Default::default());

        assert_eq!(workflow.state(), WorkflowState::AwaitingServiceBind);
        assert!(workflow.bind_rejected());

        binder.accept.store(true, Ordering::SeqCst);
        assert_eq!(
            workflow.resume(),
            Transition::Unchanged(WorkflowState::AwaitingServiceBind)
        );
        assert!(!workflow.bind_rejected());
        assert_eq!(binder.requests.load(Ordering::SeqCst), 2);

        let (service, _) = service(ProfileState::Disconnected, true);
        assert_eq!(
            workflow.handle_event(WorkflowEvent::ServiceBound(service)),
            Transition::Moved {
                from: WorkflowState::AwaitingServiceBind,
                to: WorkflowState::AwaitingProfileConnect,
            }
        );
    }

    #[test]
    fn test_name_override_pushed_to_registry() {
        let (service, registry) = service(ProfileState::Disconnected, true);
        let collaborators =
            Collaborators::new(host(true, true, true), binder(true)).with_service(service);
        let workflow = ConnectionWorkflow::start(
            target(),
            Some("Kitchen".to_string()),
            collaborators,
            Default::default(),
        );

        assert_eq!(workflow.state(), WorkflowState::AwaitingProfileConnect);
        assert_eq!(
            *registry.names.lock().unwrap(),
            vec![(target().device_id(), "Kitchen".to_string())]
        );
    }

    #[test]
    fn test_connecting_policy() {
        let mut ignoring = ready_workflow(WorkflowPolicy::default());
        assert_eq!(
            ignoring.handle_event(profile(ProfileState::Connecting)),
            Transition::Unchanged(WorkflowState::AwaitingProfileConnect)
        );

        let mut failing = ready_workflow(WorkflowPolicy {
            connecting: ConnectingPolicy::Fail,
        });
        assert_eq!(
            failing.handle_event(profile(ProfileState::Connecting)),
            Transition::Finished(WorkflowState::Failed(FailureReason::ConnectFailed))
        );
    }

    #[test]
    fn test_disconnecting_is_transient() {
        let mut workflow = ready_workflow(WorkflowPolicy::default());
        assert_eq!(
            workflow.handle_event(profile(ProfileState::Disconnecting)),
            Transition::Unchanged(WorkflowState::AwaitingProfileConnect)
        );
        assert_eq!(
            workflow.handle_event(profile(ProfileState::Disconnected)),
            Transition::Finished(WorkflowState::Failed(FailureReason::ConnectFailed))
        );
    }

    #[test]
    fn test_adapter_off_fails() {
        let mut workflow = ready_workflow(WorkflowPolicy::default());
        assert_eq!(
            workflow.handle_event(WorkflowEvent::AdapterStateChanged(AdapterState::Off)),
            Transition::Finished(WorkflowState::Failed(FailureReason::BluetoothDisabled))
        );
    }

    #[test]
    fn test_terminal_state_ignores_events() {
        let mut workflow = ready_workflow(WorkflowPolicy::default());
        workflow.handle_event(profile(ProfileState::Connected));
        assert_eq!(workflow.state(), WorkflowState::Success);

        assert_eq!(
            workflow.handle_event(profile(ProfileState::Disconnected)),
            Transition::Ignored
        );
        assert_eq!(workflow.resume(), Transition::Ignored);
        assert_eq!(workflow.state(), WorkflowState::Success);
    }

    #[test]
    fn test_bond_loss_fails_any_waiting_state() {
        let mut workflow = ready_workflow(WorkflowPolicy::default());
        assert_eq!(
            workflow.handle_event(WorkflowEvent::BondStateChanged {
                address: target(),
                state: BondState::None,
            }),
            Transition::Finished(WorkflowState::Failed(FailureReason::BondFailed))
        );
    }

    #[test]
    fn test_bonded_outside_bond_step_is_unchanged() {
        let mut workflow = ready_workflow(WorkflowPolicy::default());
        assert_eq!(
            workflow.handle_event(WorkflowEvent::BondStateChanged {
                address: target(),
                state: BondState::Bonded,
            }),
            Transition::Unchanged(WorkflowState::AwaitingProfileConnect)
        );
    }

    #[test]
    fn test_profile_connected_while_awaiting_bond_succeeds() {
        let (service, _) = service(ProfileState::Disconnected, true);
        let collaborators =
            Collaborators::new(host(true, false, true), binder(true)).with_service(service);
        let mut workflow =
            ConnectionWorkflow::start(target(), None, collaborators, Default::default());
        assert_eq!(workflow.state(), WorkflowState::AwaitingBond);

        assert_eq!(
            workflow.handle_event(profile(ProfileState::Playing)),
            Transition::Finished(WorkflowState::Success)
        );
    }

    #[test]
    fn test_dismiss_delays() {
        assert_eq!(
            WorkflowState::Success.dismiss_delay(),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(
            WorkflowState::Failed(FailureReason::BondFailed).dismiss_delay(),
            Some(Duration::from_millis(2000))
        );
        assert_eq!(WorkflowState::AwaitingBond.dismiss_delay(), None);
    }
}

//! a2dp-switcher core
//!
//! Platform-free pieces of the switcher: hardware address handling, the tag
//! URI and NDEF codecs, the collaborator traits the platform layer implements,
//! and the connection workflow state machine driven by their events.

pub mod address;
pub mod collaborators;
pub mod ndef;
pub mod tag;
pub mod workflow;

// Re-export commonly used types at crate root
pub use address::{device_id, is_valid_address, AddressError, DeviceAddress, DeviceId};
pub use collaborators::{
    AdapterState, AudioProfileProxy, BluetoothHost, BondState, DeviceRecord, DeviceRegistry,
    ProfileState, RegistryError, ServiceBinder,
};
pub use ndef::{NdefError, NdefMessage, NdefRecord, Tnf};
pub use tag::{encode_uri, ParseError, TagPayload, TagReadError, TagVersion};
pub use workflow::{
    BoundService, Collaborators, ConnectingPolicy, ConnectionWorkflow, FailureReason,
    Transition, WorkflowEvent, WorkflowPolicy, WorkflowState,
};

/// Presentation timing for finished workflows
pub mod timing {
    use std::time::Duration;

    /// How long a successful connection stays on screen before the caller tears it down
    pub const SUCCESS_DISMISS_DELAY_MS: u64 = 1000;

    /// How long a failure stays on screen before the caller tears it down
    pub const FAILURE_DISMISS_DELAY_MS: u64 = 2000;

    pub const SUCCESS_DISMISS_DELAY: Duration = Duration::from_millis(SUCCESS_DISMISS_DELAY_MS);
    pub const FAILURE_DISMISS_DELAY: Duration = Duration::from_millis(FAILURE_DISMISS_DELAY_MS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_lingers_longer_than_success() {
        assert!(timing::FAILURE_DISMISS_DELAY > timing::SUCCESS_DISMISS_DELAY);
        assert_eq!(timing::SUCCESS_DISMISS_DELAY.as_millis(), 1000);
    }

    #[test]
    fn test_reexports_resolve() {
        let payload = TagPayload::parse("a2dp://connect/00:11:22:33:44:55").unwrap();
        assert_eq!(payload.address.device_id(), DeviceId(0x2233_4455));
    }
}

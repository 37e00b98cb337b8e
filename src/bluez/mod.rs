//! BlueZ integration
//!
//! Implements the workflow collaborators on top of bluetoothd:
//! - `backend`: async D-Bus operations behind a trait
//! - `snapshot`: cached adapter and device state
//! - `host`: synchronous collaborator traits over the snapshot
//! - `monitor`: property streams feeding the snapshot and the event channel

mod backend;
#[cfg(test)]
pub(crate) mod fake;
mod host;
mod monitor;
mod snapshot;

pub use backend::BluerBackend;
pub use host::BluezHost;
pub use monitor::Monitor;
pub use snapshot::DeviceInfo;

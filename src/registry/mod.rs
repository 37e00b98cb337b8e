//! Persistent per-device overrides
//!
//! Custom display names and the hidden-device set, keyed by device id.

mod store;

pub use store::DeviceStore;

//! Bluetooth hardware addresses and the device ids derived from them
//!
//! Addresses are written as six colon-separated hex octets:
//! ```text
//! AA:BB:CC:DD:EE:FF
//! ```
//! Parsing is case-insensitive. The device id used as the key for persisted
//! per-device overrides is the low 32 bits of the 48-bit address.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// Length of a textual address (`XX:XX:XX:XX:XX:XX`)
pub const ADDRESS_LENGTH: usize = 17;

/// Errors produced when an address string is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address length: {0} characters (expected {ADDRESS_LENGTH})")]
    InvalidLength(usize),

    #[error("Missing ':' separator at position {0}")]
    MissingSeparator(usize),

    #[error("Invalid hex octet at position {0}")]
    InvalidOctet(usize),
}

/// A validated Bluetooth hardware address.
///
/// Equality and hashing compare the octets, so `aa:bb:cc:dd:ee:ff` and
/// `AA:BB:CC:DD:EE:FF` are the same device. The text form supplied at parse
/// time is kept verbatim and returned by [`DeviceAddress::as_str`].
#[derive(Debug, Clone)]
pub struct DeviceAddress {
    octets: [u8; 6],
    text: String,
}

impl DeviceAddress {
    /// Parse and validate an address string
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let octets = parse_octets(text)?;
        Ok(Self {
            octets,
            text: text.to_string(),
        })
    }

    /// Build an address from raw octets (most significant first)
    pub fn from_octets(octets: [u8; 6]) -> Self {
        let text = octets
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        Self { octets, text }
    }

    /// The address text as originally supplied
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The six address octets, most significant first
    pub fn octets(&self) -> [u8; 6] {
        self.octets
    }

    /// The address as a 48-bit integer
    pub fn as_u64(&self) -> u64 {
        self.octets
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    }

    /// Canonical upper-case form
    pub fn to_canonical(&self) -> String {
        self.text.to_ascii_uppercase()
    }

    /// Stable key for persisted per-device overrides
    pub fn device_id(&self) -> DeviceId {
        DeviceId::from(self)
    }
}

impl PartialEq for DeviceAddress {
    fn eq(&self, other: &Self) -> bool {
        self.octets == other.octets
    }
}

impl Eq for DeviceAddress {}

impl Hash for DeviceAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.octets.hash(state);
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Check whether a string is a well-formed address
pub fn is_valid_address(text: &str) -> bool {
    parse_octets(text).is_ok()
}

fn parse_octets(text: &str) -> Result<[u8; 6], AddressError> {
    let bytes = text.as_bytes();
    if bytes.len() != ADDRESS_LENGTH {
        return Err(AddressError::InvalidLength(bytes.len()));
    }

    let mut octets = [0u8; 6];
    for (i, octet) in octets.iter_mut().enumerate() {
        let start = i * 3;
        if i > 0 && bytes[start - 1] != b':' {
            return Err(AddressError::MissingSeparator(start - 1));
        }

        let hi = hex_value(bytes[start]).ok_or(AddressError::InvalidOctet(start))?;
        let lo = hex_value(bytes[start + 1]).ok_or(AddressError::InvalidOctet(start))?;
        *octet = (hi << 4) | lo;
    }

    Ok(octets)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Key under which a device's custom name and visibility are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl From<&DeviceAddress> for DeviceId {
    fn from(address: &DeviceAddress) -> Self {
        // Truncation to the low 32 bits is the persisted key format
        DeviceId(address.as_u64() as u32)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the device id for an address string, `None` if the address is invalid
pub fn device_id(address: &str) -> Option<DeviceId> {
    DeviceAddress::parse(address).ok().map(|a| a.device_id())
}

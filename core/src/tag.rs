//! Tag URI codec
//!
//! Tags carry a single URI naming the device to connect to. Two encodings
//! exist:
//! ```text
//! version 0:  a2dp://connect/<address>
//! version 1:  a2dp://connect?version=1&address=<address>&name=<optional-name>
//! ```
//! New tags are always written as version 1.

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::{form_urlencoded, Url};

use crate::address::DeviceAddress;
use crate::ndef::{NdefError, NdefMessage};

pub const SCHEME: &str = "a2dp";
pub const AUTHORITY: &str = "connect";

pub const QUERY_VERSION: &str = "version";
pub const QUERY_ADDRESS: &str = "address";
pub const QUERY_NAME: &str = "name";

/// Version written by [`TagPayload::to_uri`]
pub const TAG_VERSION: u8 = 1;

/// Errors that can occur while decoding a tag URI
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid tag URI: {0}")]
    InvalidUri(String),

    #[error("Unsupported tag version: {0:?}")]
    UnsupportedVersion(String),

    #[error("Invalid or missing device address")]
    InvalidAddress,
}

/// Encoding used by a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagVersion {
    /// Address stored as the URI path
    Legacy = 0,
    /// Address and name stored as query parameters
    Query = 1,
}

impl TagVersion {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded contents of a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPayload {
    pub address: DeviceAddress,
    /// Display name override, never set for legacy tags
    pub name: Option<String>,
    pub version: TagVersion,
}

impl TagPayload {
    /// Decode a tag URI.
    ///
    /// Either the whole payload is returned or an error; an address that fails
    /// validation never yields a partial result.
    pub fn parse(uri: &str) -> Result<Self, ParseError> {
        let url = Url::parse(uri).map_err(|e| ParseError::InvalidUri(e.to_string()))?;

        if !url.scheme().eq_ignore_ascii_case(SCHEME) {
            return Err(ParseError::InvalidUri(format!(
                "unexpected scheme {:?}",
                url.scheme()
            )));
        }

        match url.host_str() {
            Some(host) if host.eq_ignore_ascii_case(AUTHORITY) => {}
            other => {
                return Err(ParseError::InvalidUri(format!(
                    "unexpected authority {:?}",
                    other.unwrap_or_default()
                )));
            }
        }

        let version = match query_value(&url, QUERY_VERSION) {
            None => return Self::parse_legacy(&url),
            Some(version) => version,
        };

        match version.parse::<i32>() {
            Ok(0) => Self::parse_legacy(&url),
            Ok(1) => Self::parse_query(&url),
            _ => Err(ParseError::UnsupportedVersion(version)),
        }
    }

    /// Version 0: the path minus its leading separator is the address
    fn parse_legacy(url: &Url) -> Result<Self, ParseError> {
        let path = percent_decode_str(url.path()).decode_utf8_lossy();
        let mut chars = path.chars();
        chars.next();
        let address = chars.as_str();

        if address.is_empty() {
            return Err(ParseError::InvalidAddress);
        }

        let address = DeviceAddress::parse(address).map_err(|_| ParseError::InvalidAddress)?;

        Ok(Self {
            address,
            name: None,
            version: TagVersion::Legacy,
        })
    }

    /// Version 1: address and optional name are query parameters
    fn parse_query(url: &Url) -> Result<Self, ParseError> {
        let address = query_value(url, QUERY_ADDRESS).ok_or(ParseError::InvalidAddress)?;
        let address = DeviceAddress::parse(&address).map_err(|_| ParseError::InvalidAddress)?;

        let name = query_value(url, QUERY_NAME).filter(|n| !n.is_empty());

        Ok(Self {
            address,
            name,
            version: TagVersion::Query,
        })
    }

    /// Build the payload to write for a device.
    ///
    /// The name is stored only when the display name differs from the
    /// device's own advertised name, or when that name is unknown.
    pub fn for_device(
        address: DeviceAddress,
        display_name: &str,
        real_name: Option<&str>,
    ) -> Self {
        let name = match real_name {
            Some(real) if real == display_name => None,
            _ => Some(display_name.to_string()),
        };

        Self {
            address,
            name,
            version: TagVersion::Query,
        }
    }

    /// Render as a version 1 URI
    pub fn to_uri(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair(QUERY_VERSION, &TAG_VERSION.to_string());
        query.append_pair(QUERY_ADDRESS, self.address.as_str());
        if let Some(name) = &self.name {
            query.append_pair(QUERY_NAME, name);
        }

        format!("{}://{}?{}", SCHEME, AUTHORITY, query.finish())
    }

    /// Decode the payload from raw NDEF message bytes read off a tag
    pub fn from_ndef(data: &[u8]) -> Result<Self, TagReadError> {
        let message = NdefMessage::decode(data)?;
        let uri = message.first_uri()?.ok_or(TagReadError::NoUriRecord)?;
        Ok(Self::parse(&uri)?)
    }
}

/// Errors reading a payload out of NDEF bytes
#[derive(Error, Debug)]
pub enum TagReadError {
    #[error("NDEF decode error: {0}")]
    Ndef(#[from] NdefError),

    #[error("Tag contains no URI record")]
    NoUriRecord,

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Encode `(address, display name, real name)` as a version 1 tag URI
pub fn encode_uri(address: &DeviceAddress, display_name: &str, real_name: Option<&str>) -> String {
    TagPayload::for_device(address.clone(), display_name, real_name).to_uri()
}

/// First value of a query parameter
fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

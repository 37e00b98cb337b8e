//! NDEF message codec
//!
//! Tags store an NDEF message: a sequence of records, each framed as:
//! ```text
//! [ 1 byte: MB ME CF SR IL TNF(3) ][ 1 byte: type length ]
//! [ 1 or 4 bytes: payload length (SR selects 1) ][ 0 or 1 byte: id length (IL) ]
//! [ type ][ id ][ payload ]
//! ```
//! A switcher tag holds a URI record and, optionally, an Android Application
//! Record naming the package that should handle it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::tag::TagPayload;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

/// Well-known record type for URIs
pub const RTD_URI: &[u8] = b"U";

/// External record type for Android Application Records
pub const RTD_ANDROID_APP: &[u8] = b"android.com:pkg";

/// URI identifier codes from the NFC Forum URI record type definition.
/// Index 0 means "no abbreviation".
const URI_PREFIX_MAP: [&str; 35] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
];

/// Errors that can occur during NDEF encoding/decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NdefError {
    #[error("Not enough data: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("NDEF message contains no records")]
    EmptyMessage,

    #[error("First record is missing the message-begin flag")]
    MissingMessageBegin,

    #[error("Chunked records are not supported")]
    ChunkedRecord,

    #[error("Unknown URI identifier code: {0:#04x}")]
    InvalidUriPrefix(u8),

    #[error("URI record is not valid UTF-8")]
    InvalidUtf8,

    #[error("URI is empty")]
    EmptyUri,

    #[error("Package name is empty")]
    EmptyPackage,

    #[error("Record {field} too long: {len} bytes")]
    FieldTooLong { field: &'static str, len: usize },
}

/// Type name format of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tnf {
    Empty = 0,
    WellKnown = 1,
    MimeMedia = 2,
    AbsoluteUri = 3,
    External = 4,
    Unknown = 5,
    Unchanged = 6,
    Reserved = 7,
}

impl Tnf {
    fn from_bits(bits: u8) -> Self {
        match bits & TNF_MASK {
            0 => Tnf::Empty,
            1 => Tnf::WellKnown,
            2 => Tnf::MimeMedia,
            3 => Tnf::AbsoluteUri,
            4 => Tnf::External,
            5 => Tnf::Unknown,
            6 => Tnf::Unchanged,
            _ => Tnf::Reserved,
        }
    }
}

/// A single NDEF record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: Tnf,
    pub record_type: Bytes,
    pub id: Bytes,
    pub payload: Bytes,
}

impl NdefRecord {
    /// Create a record with no id
    pub fn new(tnf: Tnf, record_type: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            tnf,
            record_type: record_type.into(),
            id: Bytes::new(),
            payload: payload.into(),
        }
    }

    /// Create a well-known URI record, abbreviating the first prefix in table
    /// order that matches. `urn:` therefore wins over the longer `urn:epc:` forms.
    ///
    /// The scheme is lower-cased first so that intent filtering on the
    /// reading side matches.
    pub fn uri(uri: &str) -> Result<Self, NdefError> {
        if uri.is_empty() {
            return Err(NdefError::EmptyUri);
        }

        let normalized = normalize_scheme(uri);
        let (code, rest) = URI_PREFIX_MAP
            .iter()
            .enumerate()
            .skip(1)
            .find_map(|(code, prefix)| {
                normalized
                    .strip_prefix(prefix)
                    .map(|rest| (code as u8, rest))
            })
            .unwrap_or((0, normalized.as_str()));

        let mut payload = BytesMut::with_capacity(1 + rest.len());
        payload.put_u8(code);
        payload.put_slice(rest.as_bytes());

        Ok(Self::new(Tnf::WellKnown, RTD_URI, payload.freeze()))
    }

    /// Create an Android Application Record for a package
    pub fn application(package: &str) -> Result<Self, NdefError> {
        if package.is_empty() {
            return Err(NdefError::EmptyPackage);
        }

        Ok(Self::new(
            Tnf::External,
            RTD_ANDROID_APP,
            Bytes::copy_from_slice(package.as_bytes()),
        ))
    }

    /// Decode the URI carried by this record, if it is a URI record
    pub fn to_uri(&self) -> Result<Option<String>, NdefError> {
        match self.tnf {
            Tnf::WellKnown if self.record_type.as_ref() == RTD_URI => {
                let (&code, rest) = self.payload.split_first().ok_or(NdefError::EmptyUri)?;
                let prefix = URI_PREFIX_MAP
                    .get(code as usize)
                    .ok_or(NdefError::InvalidUriPrefix(code))?;
                let rest = std::str::from_utf8(rest).map_err(|_| NdefError::InvalidUtf8)?;
                Ok(Some(format!("{}{}", prefix, rest)))
            }
            Tnf::AbsoluteUri => {
                let uri = std::str::from_utf8(&self.record_type)
                    .map_err(|_| NdefError::InvalidUtf8)?;
                Ok(Some(uri.to_string()))
            }
            _ => Ok(None),
        }
    }

    /// The package named by an Android Application Record
    pub fn application_package(&self) -> Option<&str> {
        if self.tnf == Tnf::External && self.record_type.as_ref() == RTD_ANDROID_APP {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }

    fn encode_into(&self, buf: &mut BytesMut, first: bool, last: bool) -> Result<(), NdefError> {
        check_len("type", self.record_type.len(), u8::MAX as usize)?;
        check_len("id", self.id.len(), u8::MAX as usize)?;
        check_len("payload", self.payload.len(), u32::MAX as usize)?;

        let short = self.payload.len() <= u8::MAX as usize;

        let mut header = self.tnf as u8;
        if first {
            header |= FLAG_MB;
        }
        if last {
            header |= FLAG_ME;
        }
        if short {
            header |= FLAG_SR;
        }
        if !self.id.is_empty() {
            header |= FLAG_IL;
        }

        buf.put_u8(header);
        buf.put_u8(self.record_type.len() as u8);
        if short {
            buf.put_u8(self.payload.len() as u8);
        } else {
            buf.put_u32(self.payload.len() as u32);
        }
        if !self.id.is_empty() {
            buf.put_u8(self.id.len() as u8);
        }
        buf.put_slice(&self.record_type);
        buf.put_slice(&self.id);
        buf.put_slice(&self.payload);

        Ok(())
    }
}

/// An ordered list of records as stored on a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefMessage {
    pub records: Vec<NdefRecord>,
}

impl NdefMessage {
    pub fn new(records: Vec<NdefRecord>) -> Self {
        Self { records }
    }

    /// Message written to a switcher tag: the URI record, then an optional
    /// application record
    pub fn for_tag(payload: &TagPayload, app_package: Option<&str>) -> Result<Self, NdefError> {
        let mut records = vec![NdefRecord::uri(&payload.to_uri())?];
        if let Some(package) = app_package {
            records.push(NdefRecord::application(package)?);
        }
        Ok(Self::new(records))
    }

    /// Encode all records with message-begin/end flags set on the ends
    pub fn encode(&self) -> Result<Bytes, NdefError> {
        if self.records.is_empty() {
            return Err(NdefError::EmptyMessage);
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        let last = self.records.len() - 1;
        for (i, record) in self.records.iter().enumerate() {
            record.encode_into(&mut buf, i == 0, i == last)?;
        }

        Ok(buf.freeze())
    }

    /// Decode a message. Bytes after the message-end record are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, NdefError> {
        let mut buf = data;
        let mut records = Vec::new();

        if !buf.has_remaining() {
            return Err(NdefError::EmptyMessage);
        }

        loop {
            need(buf, 2)?;
            let header = buf.get_u8();
            let type_len = buf.get_u8() as usize;

            if records.is_empty() && header & FLAG_MB == 0 {
                return Err(NdefError::MissingMessageBegin);
            }
            if header & FLAG_CF != 0 {
                return Err(NdefError::ChunkedRecord);
            }

            let payload_len = if header & FLAG_SR != 0 {
                need(buf, 1)?;
                buf.get_u8() as usize
            } else {
                need(buf, 4)?;
                buf.get_u32() as usize
            };

            let id_len = if header & FLAG_IL != 0 {
                need(buf, 1)?;
                buf.get_u8() as usize
            } else {
                0
            };

            need(buf, type_len + id_len + payload_len)?;
            let record_type = buf.copy_to_bytes(type_len);
            let id = buf.copy_to_bytes(id_len);
            let payload = buf.copy_to_bytes(payload_len);

            records.push(NdefRecord {
                tnf: Tnf::from_bits(header),
                record_type,
                id,
                payload,
            });

            if header & FLAG_ME != 0 {
                break;
            }
        }

        Ok(Self { records })
    }

    /// URI of the first URI-carrying record
    pub fn first_uri(&self) -> Result<Option<String>, NdefError> {
        for record in &self.records {
            if let Some(uri) = record.to_uri()? {
                return Ok(Some(uri));
            }
        }
        Ok(None)
    }

    fn encoded_len_hint(&self) -> usize {
        self.records
            .iter()
            .map(|r| 7 + r.record_type.len() + r.id.len() + r.payload.len())
            .sum()
    }
}

fn need(buf: &[u8], needed: usize) -> Result<(), NdefError> {
    if buf.len() < needed {
        return Err(NdefError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), NdefError> {
    if len > max {
        return Err(NdefError::FieldTooLong { field, len });
    }
    Ok(())
}

fn normalize_scheme(uri: &str) -> String {
    match uri.split_once(':') {
        Some((scheme, rest)) => format!("{}:{}", scheme.to_ascii_lowercase(), rest),
        None => uri.to_string(),
    }
}

//! HPACK header block coding (RFC 7541), backed by `fluke-hpack`.
//!
//! Each connection owns one encoder and one decoder. Both carry a dynamic
//! table, so every header block must pass through them in wire order, even
//! blocks for streams the connection no longer tracks.

use bytes::Bytes;

use crate::error::{Error, ErrorCode, Result};

/// Per-entry overhead counted by SETTINGS_MAX_HEADER_LIST_SIZE.
const HEADER_ENTRY_OVERHEAD: usize = 32;

/// A single header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }

    /// Size of this field as counted against SETTINGS_MAX_HEADER_LIST_SIZE.
    pub fn list_size(&self) -> usize {
        self.name.len() + self.value.len() + HEADER_ENTRY_OVERHEAD
    }
}

/// Total SETTINGS_MAX_HEADER_LIST_SIZE cost of a header list.
pub fn header_list_size(headers: &[Header]) -> usize {
    headers.iter().map(Header::list_size).sum()
}

/// Value of the `:status` pseudo-header, if present and numeric.
pub fn status_code(headers: &[Header]) -> Option<u16> {
    headers
        .iter()
        .find(|h| h.name == ":status")
        .and_then(|h| h.value.parse().ok())
}

pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Decoder::new(),
        }
    }

    /// Decode a complete header block.
    ///
    /// A malformed block leaves the dynamic table in an unknown state, so
    /// failure is a connection-level COMPRESSION_ERROR.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<Header>> {
        let pairs = self.inner.decode(block).map_err(|e| {
            Error::connection(ErrorCode::CompressionError, format!("HPACK decode error: {:?}", e))
        })?;
        Ok(pairs
            .into_iter()
            .map(|(name, value)| {
                Header::new(
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }
}

pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Encode a header list into one header block. The caller splits the
    /// block across HEADERS and CONTINUATION frames.
    pub fn encode(&mut self, headers: &[Header]) -> Bytes {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|h| (h.name.as_bytes(), h.value.as_bytes()))
            .collect();
        Bytes::from(self.inner.encode(pairs))
    }
}

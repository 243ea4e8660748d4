//! HTTP/2 frame types and payload parsing.
//!
//! Every frame starts with a fixed 9-byte header (RFC 9113 Section 4.1):
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! |                   Frame Payload (0...)                      ...
//! +---------------------------------------------------------------+
//! ```
//!
//! [`parse_frame`] turns a header plus its payload into a typed [`Frame`],
//! applying the structural checks each frame type carries. Reading from and
//! writing to a transport lives in [`crate::framer`].

use bytes::{Buf, Bytes};

use crate::error::{Error, ErrorCode, Result};

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Initial SETTINGS_MAX_FRAME_SIZE for both endpoints.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest frame payload the 24-bit length field can express.
pub const MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

/// Largest legal flow-control window.
pub const MAX_WINDOW_SIZE: u32 = (1 << 31) - 1;

/// Initial flow-control window for streams and the connection.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Client connection preface.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// HTTP/2 frame types (RFC 9113 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(t: FrameType) -> u8 {
        match t {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => v,
        }
    }
}

/// HTTP/2 frame flags. Meaning depends on the frame type.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 9113 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub flags: u8,
    /// Payload length, 24 bits.
    pub length: u32,
    /// 31 bits, reserved bit always cleared.
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, flags: u8, stream_id: u32) -> Self {
        Self {
            frame_type,
            flags,
            length: 0,
            stream_id: stream_id & STREAM_ID_MASK,
        }
    }

    /// Parse a 9-byte frame header. Returns `None` if `data` is too short.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = (data[0] as u32) << 16 | (data[1] as u32) << 8 | data[2] as u32;
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & STREAM_ID_MASK;
        Some(Self {
            frame_type: FrameType::from(data[3]),
            flags: data[4],
            length,
            stream_id,
        })
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let len = self.length.to_be_bytes();
        let id = (self.stream_id & STREAM_ID_MASK).to_be_bytes();
        [
            len[1],
            len[2],
            len[3],
            self.frame_type.into(),
            self.flags,
            id[0],
            id[1],
            id[2],
            id[3],
        ]
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn is_end_stream(&self) -> bool {
        self.has_flag(flags::END_STREAM)
    }

    pub fn is_end_headers(&self) -> bool {
        self.has_flag(flags::END_HEADERS)
    }

    pub fn is_ack(&self) -> bool {
        self.has_flag(flags::ACK)
    }

    pub fn is_padded(&self) -> bool {
        self.has_flag(flags::PADDED)
    }
}

/// One SETTINGS parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub id: u16,
    pub value: u32,
}

impl Setting {
    pub fn new(id: u16, value: u32) -> Self {
        Self { id, value }
    }

    /// Checks the value range of known settings. Unknown ids are always valid.
    pub fn valid(&self) -> Result<()> {
        match self.id {
            settings_id::ENABLE_PUSH if self.value > 1 => Err(Error::protocol(format!(
                "invalid SETTINGS_ENABLE_PUSH value {}",
                self.value
            ))),
            settings_id::INITIAL_WINDOW_SIZE if self.value > MAX_WINDOW_SIZE => {
                Err(Error::connection(
                    ErrorCode::FlowControlError,
                    format!("invalid SETTINGS_INITIAL_WINDOW_SIZE value {}", self.value),
                ))
            }
            settings_id::MAX_FRAME_SIZE
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&self.value) =>
            {
                Err(Error::protocol(format!(
                    "invalid SETTINGS_MAX_FRAME_SIZE value {}",
                    self.value
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Stream dependency carried by PRIORITY frames and prioritized HEADERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriorityParam {
    pub stream_dep: u32,
    pub exclusive: bool,
    /// Wire weight; the effective weight is `weight + 1`.
    pub weight: u8,
}

impl PriorityParam {
    pub fn is_zero(&self) -> bool {
        *self == PriorityParam::default()
    }

    fn parse(buf: &mut Bytes) -> Self {
        let v = buf.get_u32();
        let weight = buf.get_u8();
        PriorityParam {
            stream_dep: v & STREAM_ID_MASK,
            exclusive: v & !STREAM_ID_MASK != 0,
            weight,
        }
    }

    pub(crate) fn encode(&self) -> [u8; 5] {
        let mut v = self.stream_dep & STREAM_ID_MASK;
        if self.exclusive {
            v |= !STREAM_ID_MASK;
        }
        let b = v.to_be_bytes();
        [b[0], b[1], b[2], b[3], self.weight]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub header: FrameHeader,
    /// Payload with padding removed.
    pub data: Bytes,
}

impl DataFrame {
    pub fn stream_ends(&self) -> bool {
        self.header.is_end_stream()
    }

    /// Bytes of the frame that count against flow control but are not data.
    pub fn padding_len(&self) -> u32 {
        self.header.length - self.data.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub header: FrameHeader,
    /// Present when the PRIORITY flag is set.
    pub priority: Option<PriorityParam>,
    pub header_block: Bytes,
}

impl HeadersFrame {
    pub fn stream_ends(&self) -> bool {
        self.header.is_end_stream()
    }

    pub fn headers_ended(&self) -> bool {
        self.header.is_end_headers()
    }

    pub fn depends_on_itself(&self) -> bool {
        self.priority.is_some_and(|p| p.stream_dep == self.header.stream_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityFrame {
    pub header: FrameHeader,
    pub priority: PriorityParam,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub header: FrameHeader,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    pub header: FrameHeader,
    pub settings: Vec<Setting>,
}

impl SettingsFrame {
    pub fn is_ack(&self) -> bool {
        self.header.is_ack()
    }

    /// Value of the last occurrence of `id` in the frame.
    pub fn value(&self, id: u16) -> Option<u32> {
        self.settings.iter().rev().find(|s| s.id == id).map(|s| s.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.settings.iter()
    }

    pub fn has_duplicates(&self) -> bool {
        self.settings
            .iter()
            .enumerate()
            .any(|(i, s)| self.settings[i + 1..].iter().any(|o| o.id == s.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    pub header: FrameHeader,
    pub promise_id: u32,
    pub header_block: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFrame {
    pub header: FrameHeader,
    pub data: [u8; 8],
}

impl PingFrame {
    pub fn is_ack(&self) -> bool {
        self.header.is_ack()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoAwayFrame {
    pub header: FrameHeader,
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
    pub debug_data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    pub header: FrameHeader,
    pub increment: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    pub header: FrameHeader,
    pub header_block: Bytes,
}

impl ContinuationFrame {
    pub fn headers_ended(&self) -> bool {
        self.header.is_end_headers()
    }
}

/// A frame of a type this crate does not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

/// A parsed HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    GoAway(GoAwayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    Unknown(UnknownFrame),
}

impl Frame {
    pub fn header(&self) -> &FrameHeader {
        match self {
            Frame::Data(f) => &f.header,
            Frame::Headers(f) => &f.header,
            Frame::Priority(f) => &f.header,
            Frame::RstStream(f) => &f.header,
            Frame::Settings(f) => &f.header,
            Frame::PushPromise(f) => &f.header,
            Frame::Ping(f) => &f.header,
            Frame::GoAway(f) => &f.header,
            Frame::WindowUpdate(f) => &f.header,
            Frame::Continuation(f) => &f.header,
            Frame::Unknown(f) => &f.header,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.header().stream_id
    }

    pub fn frame_type(&self) -> FrameType {
        self.header().frame_type
    }
}

/// Parse a frame payload according to its header.
///
/// `payload` must hold exactly `header.length` bytes. Structural violations
/// are connection errors, except the ones RFC 9113 scopes to a stream
/// (zero WINDOW_UPDATE increment on a stream, self-dependent priority).
pub fn parse_frame(header: FrameHeader, payload: Bytes) -> Result<Frame> {
    debug_assert_eq!(header.length as usize, payload.len());
    match header.frame_type {
        FrameType::Data => parse_data(header, payload),
        FrameType::Headers => parse_headers(header, payload),
        FrameType::Priority => parse_priority(header, payload),
        FrameType::RstStream => parse_rst_stream(header, payload),
        FrameType::Settings => parse_settings(header, payload),
        FrameType::PushPromise => parse_push_promise(header, payload),
        FrameType::Ping => parse_ping(header, payload),
        FrameType::GoAway => parse_goaway(header, payload),
        FrameType::WindowUpdate => parse_window_update(header, payload),
        FrameType::Continuation => parse_continuation(header, payload),
        FrameType::Unknown(_) => Ok(Frame::Unknown(UnknownFrame { header, payload })),
    }
}

fn require_stream(header: &FrameHeader, name: &str) -> Result<()> {
    if header.stream_id == 0 {
        return Err(Error::protocol(format!("{} frame with stream ID 0", name)));
    }
    Ok(())
}

fn require_connection(header: &FrameHeader, name: &str) -> Result<()> {
    if header.stream_id != 0 {
        return Err(Error::protocol(format!(
            "{} frame with stream ID {}",
            name, header.stream_id
        )));
    }
    Ok(())
}

/// Reads the pad length byte if PADDED is set. Returns the pad length.
fn read_pad_length(header: &FrameHeader, payload: &mut Bytes) -> Result<usize> {
    if !header.is_padded() {
        return Ok(0);
    }
    if payload.is_empty() {
        return Err(Error::frame_size("padded frame too short"));
    }
    Ok(payload.get_u8() as usize)
}

fn strip_padding(mut payload: Bytes, pad: usize) -> Result<Bytes> {
    if pad > payload.len() {
        return Err(Error::protocol("pad length too large"));
    }
    payload.truncate(payload.len() - pad);
    Ok(payload)
}

fn parse_data(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
    // Stream 0 DATA would otherwise be charged to no stream's window.
    require_stream(&header, "DATA")?;
    let pad = read_pad_length(&header, &mut payload)?;
    let data = strip_padding(payload, pad)?;
    Ok(Frame::Data(DataFrame { header, data }))
}

fn parse_headers(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
    require_stream(&header, "HEADERS")?;
    let pad = read_pad_length(&header, &mut payload)?;
    let priority = if header.has_flag(flags::PRIORITY) {
        if payload.len() < 5 {
            return Err(Error::frame_size("HEADERS priority fields truncated"));
        }
        // A self-dependency is reported after the block is decoded.
        Some(PriorityParam::parse(&mut payload))
    } else {
        None
    };
    let header_block = strip_padding(payload, pad)?;
    Ok(Frame::Headers(HeadersFrame {
        header,
        priority,
        header_block,
    }))
}

fn parse_priority(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
    require_stream(&header, "PRIORITY")?;
    if payload.len() != 5 {
        return Err(Error::frame_size(format!(
            "PRIORITY frame payload size was {}; want 5",
            payload.len()
        )));
    }
    let priority = PriorityParam::parse(&mut payload);
    if priority.stream_dep == header.stream_id {
        return Err(Error::stream(
            header.stream_id,
            ErrorCode::ProtocolError,
            "PRIORITY stream depends on itself",
        ));
    }
    Ok(Frame::Priority(PriorityFrame { header, priority }))
}

fn parse_rst_stream(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
    if payload.len() != 4 {
        return Err(Error::frame_size("RST_STREAM payload must be 4 bytes"));
    }
    require_stream(&header, "RST_STREAM")?;
    let error_code = ErrorCode::from_u32(payload.get_u32());
    Ok(Frame::RstStream(RstStreamFrame { header, error_code }))
}

fn parse_settings(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
    if header.is_ack() && !payload.is_empty() {
        return Err(Error::frame_size("SETTINGS ACK with non-empty payload"));
    }
    require_connection(&header, "SETTINGS")?;
    if payload.len() % 6 != 0 {
        return Err(Error::frame_size(format!(
            "SETTINGS payload length {} not a multiple of 6",
            payload.len()
        )));
    }
    let mut settings = Vec::with_capacity(payload.len() / 6);
    while payload.has_remaining() {
        let id = payload.get_u16();
        let value = payload.get_u32();
        settings.push(Setting { id, value });
    }
    Ok(Frame::Settings(SettingsFrame { header, settings }))
}

fn parse_push_promise(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
    require_stream(&header, "PUSH_PROMISE")?;
    let pad = read_pad_length(&header, &mut payload)?;
    if payload.len() < 4 {
        return Err(Error::frame_size("PUSH_PROMISE promised stream ID truncated"));
    }
    let promise_id = payload.get_u32() & STREAM_ID_MASK;
    let header_block = strip_padding(payload, pad)?;
    Ok(Frame::PushPromise(PushPromiseFrame {
        header,
        promise_id,
        header_block,
    }))
}

fn parse_ping(header: FrameHeader, payload: Bytes) -> Result<Frame> {
    if payload.len() != 8 {
        return Err(Error::frame_size(format!(
            "PING payload size was {}; want 8",
            payload.len()
        )));
    }
    require_connection(&header, "PING")?;
    let mut data = [0u8; 8];
    data.copy_from_slice(&payload);
    Ok(Frame::Ping(PingFrame { header, data }))
}

fn parse_goaway(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
    require_connection(&header, "GOAWAY")?;
    if payload.len() < 8 {
        return Err(Error::frame_size("GOAWAY payload shorter than 8 bytes"));
    }
    let last_stream_id = payload.get_u32() & STREAM_ID_MASK;
    let error_code = ErrorCode::from_u32(payload.get_u32());
    Ok(Frame::GoAway(GoAwayFrame {
        header,
        last_stream_id,
        error_code,
        debug_data: payload,
    }))
}

fn parse_window_update(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
    if payload.len() != 4 {
        return Err(Error::frame_size(format!(
            "WINDOW_UPDATE payload size was {}; want 4",
            payload.len()
        )));
    }
    let increment = payload.get_u32() & STREAM_ID_MASK;
    if increment == 0 {
        if header.stream_id == 0 {
            return Err(Error::protocol("WINDOW_UPDATE with zero increment"));
        }
        return Err(Error::stream(
            header.stream_id,
            ErrorCode::ProtocolError,
            "WINDOW_UPDATE with zero increment",
        ));
    }
    Ok(Frame::WindowUpdate(WindowUpdateFrame { header, increment }))
}

fn parse_continuation(header: FrameHeader, payload: Bytes) -> Result<Frame> {
    require_stream(&header, "CONTINUATION")?;
    Ok(Frame::Continuation(ContinuationFrame {
        header,
        header_block: payload,
    }))
}

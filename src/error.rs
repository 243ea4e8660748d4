//! Error types for the HTTP/2 framer and connection.

use std::fmt;
use std::io;
use std::sync::Arc;

/// HTTP/2 error codes (RFC 9113 Section 7).
///
/// Codes outside the registry are kept verbatim in `Unknown`; RFC 9113
/// treats them like INTERNAL_ERROR but the peer's value is not lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    Unknown(u32),
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::NoError => 0x0,
            Self::ProtocolError => 0x1,
            Self::InternalError => 0x2,
            Self::FlowControlError => 0x3,
            Self::SettingsTimeout => 0x4,
            Self::StreamClosed => 0x5,
            Self::FrameSizeError => 0x6,
            Self::RefusedStream => 0x7,
            Self::Cancel => 0x8,
            Self::CompressionError => 0x9,
            Self::ConnectError => 0xa,
            Self::EnhanceYourCalm => 0xb,
            Self::InadequateSecurity => 0xc,
            Self::Http11Required => 0xd,
            Self::Unknown(v) => v,
        }
    }

    /// Known codes as themselves; unknown ones as INTERNAL_ERROR.
    pub fn effective(self) -> Self {
        match self {
            Self::Unknown(_) => Self::InternalError,
            known => known,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
            Self::Unknown(v) => return write!(f, "UNKNOWN_ERROR(0x{:x})", v),
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the framer, the connection and request streams.
///
/// `Clone` so a single terminal error can be delivered to every waiter
/// when a connection dies.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Connection-fatal error. A GOAWAY carrying `code` is sent if possible.
    #[error("connection error {code}: {reason}")]
    Connection { code: ErrorCode, reason: String },

    /// Error confined to a single stream, answered with RST_STREAM.
    #[error("stream {stream_id} error {code}: {reason}")]
    Stream {
        stream_id: u32,
        code: ErrorCode,
        reason: String,
    },

    /// The peer reset the stream.
    #[error("stream {stream_id} reset by peer: {code}")]
    Reset { stream_id: u32, code: ErrorCode },

    /// The stream was above the peer's GOAWAY watermark and was not processed.
    #[error("stream {stream_id} refused: peer is going away after stream {last_stream_id}")]
    StreamRefused { stream_id: u32, last_stream_id: u32 },

    /// New streams cannot be opened after the peer sent GOAWAY.
    #[error("connection going away (last stream {last_stream_id}, {code})")]
    GoingAway { last_stream_id: u32, code: ErrorCode },

    #[error("stream ids exhausted")]
    StreamIdsExhausted,

    /// Local cancellation.
    #[error("canceled")]
    Canceled,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("illegal write: {0}")]
    IllegalWrite(&'static str),

    #[error("io error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Connection {
            code,
            reason: reason.into(),
        }
    }

    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::ProtocolError, reason)
    }

    pub(crate) fn frame_size(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::FrameSizeError, reason)
    }

    /// Coarse error code for this error, if it maps to one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Connection { code, .. }
            | Error::Stream { code, .. }
            | Error::Reset { code, .. }
            | Error::GoingAway { code, .. } => Some(*code),
            Error::StreamRefused { .. } => Some(ErrorCode::RefusedStream),
            Error::Canceled => Some(ErrorCode::Cancel),
            _ => None,
        }
    }

    /// True if the error tears down the whole connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Io(_) | Error::ConnectionClosed
        )
    }

    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Error::Stream { stream_id, .. }
            | Error::Reset { stream_id, .. }
            | Error::StreamRefused { stream_id, .. } => Some(*stream_id),
            _ => None,
        }
    }

    /// True when the request was never processed by the peer and may be
    /// retried on another connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StreamRefused { .. } | Error::GoingAway { .. })
            || matches!(self, Error::Reset { code: ErrorCode::RefusedStream, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

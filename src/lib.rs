//! h2-framer: HTTP/2 framing and client stream multiplexing on tokio
//!
//! The crate is layered, leaves first:
//!
//! - [`frame`]: typed frames and bit-exact payload parsing
//! - [`order`]: header block contiguity checks
//! - [`framer`]: async frame reader and writer over any byte stream
//! - [`flow`]: connection and stream flow-control windows
//! - [`stream`]: per-stream state machine
//! - [`connection`]: the client connection that owns the framer, runs the
//!   read loop and serializes writes
//!
//! Header compression is delegated to `fluke-hpack` through [`hpack`].
//!
//! # Quick Start
//!
//! ```no_run
//! use bytes::Bytes;
//! use h2_framer::{Config, Connection, Header};
//!
//! # async fn run() -> h2_framer::Result<()> {
//! let tcp = tokio::net::TcpStream::connect("127.0.0.1:8080").await?;
//! let conn = Connection::handshake(tcp, Config::default()).await?;
//!
//! let req = conn
//!     .send_request(
//!         &[
//!             Header::new(":method", "POST"),
//!             Header::new(":scheme", "http"),
//!             Header::new(":authority", "localhost"),
//!             Header::new(":path", "/upload"),
//!         ],
//!         false,
//!     )
//!     .await?;
//! req.send_data(Bytes::from_static(b"hello"), true).await?;
//!
//! let response = req.response().await?;
//! println!("{:?}", response);
//! while let Some(chunk) = req.data().await? {
//!     println!("{} bytes", chunk.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Frame-level use
//!
//! [`Framer`] can be used on its own, for example to script the peer side
//! of a connection in tests:
//!
//! ```
//! use h2_framer::{Frame, FrameReader, FrameWriter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> h2_framer::Result<()> {
//! let mut out = FrameWriter::new(Vec::new());
//! out.write_ping(false, *b"12345678").await?;
//! let bytes = out.into_inner();
//!
//! let mut reader = FrameReader::new(&bytes[..]);
//! match reader.read_frame().await? {
//!     Frame::Ping(ping) => assert_eq!(&ping.data, b"12345678"),
//!     other => panic!("unexpected frame {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod flow;
pub mod frame;
pub mod framer;
pub mod hpack;
pub mod order;
pub mod request;
pub mod settings;
pub mod stream;

pub use config::Config;
pub use connection::Connection;
pub use error::{Error, ErrorCode, Result};
pub use flow::{FlowControl, FlowError};
pub use frame::{
    flags, parse_frame, settings_id, ContinuationFrame, DataFrame, Frame, FrameHeader, FrameType,
    GoAwayFrame, HeadersFrame, PingFrame, PriorityFrame, PriorityParam, PushPromiseFrame,
    RstStreamFrame, Setting, SettingsFrame, UnknownFrame, WindowUpdateFrame, CONNECTION_PREFACE,
};
pub use framer::{
    read_frame_header, FrameReader, FrameWriter, Framer, HeadersFrameParam, PushPromiseParam,
};
pub use hpack::{Header, HpackDecoder, HpackEncoder};
pub use order::HeaderBlockValidator;
pub use request::RequestStream;
pub use settings::Settings;
pub use stream::StreamState;

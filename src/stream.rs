//! Per-stream state machine (RFC 9113 Section 5.1), client side.
//!
//! ```text
//!                      send HEADERS
//!               Idle ----------------> Open
//!                 |                   /    \
//!   send HEADERS  |        send ES   /      \  recv ES
//!   + END_STREAM  v                 v        v
//!        HalfClosedLocal <--------+          HalfClosedRemote
//!                 \                           /
//!          recv ES \                         / send ES
//!                   v                       v
//!                   +-----> Closed <-------+
//!
//!   RST_STREAM (either direction) or connection teardown: any -> Closed
//! ```
//!
//! Push is never enabled, so reserved states do not exist here.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::{Error, ErrorCode, Result};
use crate::flow::{FlowControl, PendingRefund};
use crate::hpack::Header;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// We sent END_STREAM; the peer may still send.
    HalfClosedLocal,
    /// The peer sent END_STREAM; we may still send.
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Whether DATA may still be sent.
    #[must_use]
    pub fn can_send(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Whether the peer may still send frames carrying content.
    #[must_use]
    pub fn can_recv(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    #[must_use]
    pub fn is_closed(self) -> bool {
        self == StreamState::Closed
    }
}

/// Bookkeeping for one request stream. Owned by the connection state and
/// only touched under the state lock.
#[derive(Debug)]
pub(crate) struct Stream {
    pub id: u32,
    pub state: StreamState,
    pub send_flow: FlowControl,
    pub recv_flow: FlowControl,
    pub refund: PendingRefund,
    /// Reset received from the peer and its code.
    pub reset: Option<ErrorCode>,
    /// We already sent RST_STREAM.
    pub did_reset: bool,
    /// Final (non-informational) response headers arrived.
    pub headers_received: bool,
    pub trailers_received: bool,
    pub response: Option<Vec<Header>>,
    pub trailers: Option<Vec<Header>>,
    pub data: VecDeque<Bytes>,
    /// Bytes in `data` not yet returned to the peer's send window.
    pub buffered: u32,
    pub error: Option<Error>,
    pub notify: Arc<Notify>,
}

impl Stream {
    pub fn new(id: u32, send_window: u32, recv_window: u32, refund_threshold: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_flow: FlowControl::new(send_window),
            recv_flow: FlowControl::new(recv_window),
            refund: PendingRefund::new(refund_threshold),
            reset: None,
            did_reset: false,
            headers_received: false,
            trailers_received: false,
            response: None,
            trailers: None,
            data: VecDeque::new(),
            buffered: 0,
            error: None,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn send_headers(&mut self, end_stream: bool) {
        if self.state == StreamState::Idle {
            self.state = if end_stream {
                StreamState::HalfClosedLocal
            } else {
                StreamState::Open
            };
        } else if end_stream {
            self.send_end_stream();
        }
    }

    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote | StreamState::Closed => StreamState::Closed,
            StreamState::HalfClosedLocal => StreamState::HalfClosedLocal,
        };
    }

    pub fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal | StreamState::Closed => StreamState::Closed,
            StreamState::HalfClosedRemote => StreamState::HalfClosedRemote,
        };
    }

    /// Accept a decoded header block. 1xx responses are discarded.
    pub fn recv_headers(&mut self, headers: Vec<Header>, end_stream: bool) -> Result<()> {
        if !self.state.can_recv() {
            return Err(Error::stream(
                self.id,
                ErrorCode::StreamClosed,
                "HEADERS on half-closed stream",
            ));
        }
        let informational = matches!(crate::hpack::status_code(&headers), Some(100..=199));
        if !self.headers_received {
            if informational {
                if end_stream {
                    return Err(Error::stream(
                        self.id,
                        ErrorCode::ProtocolError,
                        "informational response with END_STREAM",
                    ));
                }
                return Ok(());
            }
            self.headers_received = true;
            self.response = Some(headers);
        } else {
            if !end_stream {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::ProtocolError,
                    "trailers without END_STREAM",
                ));
            }
            self.trailers_received = true;
            self.trailers = Some(headers);
        }
        if end_stream {
            self.recv_end_stream();
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Charge a DATA frame of `frame_len` bytes (padding included) against
    /// the stream window and queue its payload.
    pub fn recv_data(&mut self, frame_len: u32, data: Bytes, end_stream: bool) -> Result<()> {
        if !self.state.can_recv() {
            return Err(Error::stream(
                self.id,
                ErrorCode::StreamClosed,
                "DATA on half-closed stream",
            ));
        }
        if !self.headers_received {
            return Err(Error::stream(
                self.id,
                ErrorCode::ProtocolError,
                "DATA before response HEADERS",
            ));
        }
        if self.recv_flow.consume(frame_len).is_err() {
            return Err(Error::stream(
                self.id,
                ErrorCode::FlowControlError,
                "peer overran stream receive window",
            ));
        }
        if !data.is_empty() {
            self.buffered += data.len() as u32;
            self.data.push_back(data);
        }
        if end_stream {
            self.recv_end_stream();
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Pop the next buffered chunk, crediting it to the receive window.
    /// Returns the chunk and the stream WINDOW_UPDATE increment now due.
    pub fn take_data(&mut self) -> Option<(Bytes, Option<u32>)> {
        let chunk = self.data.pop_front()?;
        let n = chunk.len() as u32;
        self.buffered -= n;
        // Nothing more will arrive once the peer ended the stream.
        let increment = if self.state.can_recv() {
            self.refund.add(n)
        } else {
            None
        };
        if let Some(inc) = increment {
            self.recv_flow.release(inc);
        }
        Some((chunk, increment))
    }

    /// Drop buffered data. Returns the byte count for connection refund.
    pub fn discard_data(&mut self) -> u32 {
        self.data.clear();
        std::mem::take(&mut self.buffered)
    }

    /// Apply a peer RST_STREAM. Returns the number of buffered bytes dropped.
    pub fn recv_reset(&mut self, code: ErrorCode) -> u32 {
        self.reset = Some(code);
        if code == ErrorCode::NoError && !self.state.can_recv() {
            // Response is complete; the peer only asks us to stop sending.
            self.state = StreamState::Closed;
            self.notify.notify_waiters();
            return 0;
        }
        let dropped = self.discard_data();
        self.fail(Error::Reset {
            stream_id: self.id,
            code,
        });
        dropped
    }

    /// Marks RST_STREAM as sent. True only the first time.
    pub fn mark_reset_sent(&mut self) -> bool {
        if self.did_reset {
            return false;
        }
        self.did_reset = true;
        true
    }

    /// Close the stream with a terminal error and wake its waiters.
    pub fn fail(&mut self, err: Error) {
        self.state = StreamState::Closed;
        if self.error.is_none() {
            self.error = Some(err);
        }
        self.notify.notify_waiters();
    }

    pub fn is_done(&self) -> bool {
        self.state.is_closed()
    }

    /// Terminal error, if the stream ended abnormally.
    pub fn check(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

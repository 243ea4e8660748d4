//! Client connection: handshake, read loop and write serialization.
//!
//! Two locks guard a connection:
//!
//! * the state lock (`std::sync::Mutex<ConnState>`) covers the stream map,
//!   flow-control windows, settings, pings and the close reason. It is
//!   never held across an `.await`.
//! * the write lock (`tokio::sync::Mutex<Outbound>`) covers the frame
//!   writer and the HPACK encoder, so header blocks hit the wire in the
//!   order they were encoded.
//!
//! When both are needed the write lock is taken first and the state lock
//! briefly inside it. Nothing waits for the write lock while holding the
//! state lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, error, trace, warn};

use crate::config::Config;
use crate::error::{Error, ErrorCode, Result};
use crate::flow::{FlowControl, PendingRefund};
use crate::frame::{
    DataFrame, Frame, GoAwayFrame, PingFrame, RstStreamFrame, SettingsFrame, WindowUpdateFrame,
    DEFAULT_INITIAL_WINDOW_SIZE,
};
use crate::framer::{FrameReader, FrameWriter, HeadersFrameParam};
use crate::hpack::{header_list_size, Header, HpackDecoder, HpackEncoder};
use crate::request::RequestStream;
use crate::settings::Settings;
use crate::stream::{Stream, StreamState};

pub(crate) type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on an accumulated (still compressed) header block.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

const MAX_STREAM_ID: u32 = (1 << 31) - 1;

/// Everything behind the write lock.
pub(crate) struct Outbound {
    pub framer: FrameWriter<BufWriter<BoxedWrite>>,
    pub encoder: HpackEncoder,
}

/// Everything behind the state lock.
#[derive(Debug)]
pub(crate) struct ConnState {
    pub next_stream_id: u32,
    pub streams: HashMap<u32, Stream>,
    pub send_flow: FlowControl,
    pub recv_flow: FlowControl,
    refund: PendingRefund,
    pub local: Settings,
    pub peer: Settings,
    stream_refund_threshold: u32,
    pending_settings_acks: u32,
    pings: HashMap<[u8; 8], oneshot::Sender<Result<()>>>,
    ping_seq: u64,
    goaway: Option<(u32, ErrorCode)>,
    shutting_down: bool,
    pub closed: Option<Error>,
}

impl ConnState {
    fn new(config: &Config) -> Self {
        Self {
            next_stream_id: 1,
            streams: HashMap::new(),
            send_flow: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE),
            recv_flow: FlowControl::new(config.connection_window()),
            refund: PendingRefund::new(config.conn_update_threshold()),
            local: config.local_settings().clone(),
            peer: Settings::default(),
            stream_refund_threshold: config.stream_update_threshold(),
            pending_settings_acks: 1,
            pings: HashMap::new(),
            ping_seq: 0,
            goaway: None,
            shutting_down: false,
            closed: None,
        }
    }

    pub fn check_open(&self) -> Result<()> {
        match &self.closed {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn check_can_open_stream(&self) -> Result<()> {
        self.check_open()?;
        if let Some((last_stream_id, code)) = self.goaway {
            return Err(Error::GoingAway {
                last_stream_id,
                code,
            });
        }
        if self.shutting_down {
            return Err(Error::ConnectionClosed);
        }
        if self.next_stream_id > MAX_STREAM_ID {
            return Err(Error::StreamIdsExhausted);
        }
        Ok(())
    }

    /// Whether `id` is a stream this client opened at some point.
    fn was_opened(&self, id: u32) -> bool {
        id % 2 == 1 && id < self.next_stream_id
    }

    pub fn active_streams(&self) -> usize {
        self.streams.values().filter(|s| !s.is_done()).count()
    }

    fn has_slot(&self) -> bool {
        self.peer
            .max_concurrent_streams
            .map_or(true, |max| self.active_streams() < max as usize)
    }

    /// Credit bytes the application consumed; batched.
    pub fn credit_conn(&mut self, n: u32) -> Option<u32> {
        if n == 0 {
            return None;
        }
        let inc = self.refund.add(n)?;
        self.recv_flow.release(inc);
        Some(inc)
    }

    /// Return bytes the application will never see; immediate.
    pub fn return_conn_now(&mut self, n: u32) -> Option<u32> {
        if n == 0 || self.closed.is_some() {
            return None;
        }
        self.recv_flow.release(n);
        Some(n)
    }

    /// Error to report to a caller whose stream can no longer be used.
    pub fn stream_error(&self, id: u32) -> Error {
        match self.streams.get(&id) {
            Some(s) => match &s.error {
                Some(err) => err.clone(),
                None => Error::stream(id, ErrorCode::StreamClosed, "stream is closed for sending"),
            },
            None => self.closed.clone().unwrap_or(Error::Canceled),
        }
    }
}

/// Header block being reassembled from HEADERS and CONTINUATION frames.
struct HeaderBlock {
    stream_id: u32,
    end_stream: bool,
    self_dependent: bool,
    buf: BytesMut,
}

pub(crate) struct Inner {
    state: Mutex<ConnState>,
    pub out: AsyncMutex<Outbound>,
    /// Signalled whenever send capacity, stream slots or liveness change.
    pub capacity: Notify,
    read_task: Mutex<Option<AbortHandle>>,
}

impl Inner {
    pub fn state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the connection closed and fail every waiter with `err`.
    /// Returns false if it was already closed.
    pub fn close_with(&self, err: Error) -> bool {
        {
            let mut st = self.state();
            if st.closed.is_some() {
                return false;
            }
            st.closed = Some(err.clone());
            for s in st.streams.values_mut() {
                if !s.is_done() {
                    s.fail(err.clone());
                }
            }
            for (_, tx) in st.pings.drain() {
                let _ = tx.send(Err(err.clone()));
            }
        }
        self.capacity.notify_waiters();
        true
    }

    pub async fn write_rst(&self, stream_id: u32, code: ErrorCode) -> Result<()> {
        debug!(stream_id, %code, "sending RST_STREAM");
        let mut out = self.out.lock().await;
        out.framer.write_rst_stream(stream_id, code).await?;
        out.framer.flush().await
    }

    pub async fn write_window_updates(
        &self,
        stream: Option<(u32, u32)>,
        conn: Option<u32>,
    ) -> Result<()> {
        if stream.is_none() && conn.is_none() {
            return Ok(());
        }
        let mut out = self.out.lock().await;
        if let Some((id, inc)) = stream {
            trace!(stream_id = id, increment = inc, "sending WINDOW_UPDATE");
            out.framer.write_window_update(id, inc).await?;
        }
        if let Some(inc) = conn {
            trace!(increment = inc, "sending connection WINDOW_UPDATE");
            out.framer.write_window_update(0, inc).await?;
        }
        out.framer.flush().await
    }

    /// Fail one stream and tell the peer with RST_STREAM.
    async fn reset_stream(&self, stream_id: u32, code: ErrorCode, reason: String) -> Result<()> {
        debug!(stream_id, %code, %reason, "stream error");
        let (send_rst, conn_inc) = {
            let mut guard = self.state();
            let st = &mut *guard;
            match st.streams.get_mut(&stream_id) {
                Some(s) => {
                    let dropped = s.discard_data();
                    s.fail(Error::stream(stream_id, code, reason));
                    let send_rst = s.mark_reset_sent();
                    (send_rst, st.return_conn_now(dropped))
                }
                None => (false, None),
            }
        };
        self.capacity.notify_waiters();
        if send_rst {
            self.write_rst(stream_id, code).await?;
        }
        self.write_window_updates(None, conn_inc).await
    }

    async fn teardown(&self, err: Error) {
        let err = match err {
            Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            other => other,
        };
        match &err {
            Error::ConnectionClosed => debug!("connection closed by peer"),
            Error::Connection { code, reason } => warn!(%code, %reason, "connection error"),
            other => error!(error = %other, "connection failed"),
        }
        if !self.close_with(err.clone()) {
            return;
        }
        if let Error::Connection { code, reason } = &err {
            let mut out = self.out.lock().await;
            if let Err(e) = send_goaway(&mut out, *code, reason.as_bytes()).await {
                debug!(error = %e, "failed to send GOAWAY");
            }
        }
    }

    async fn dispatch(
        &self,
        frame: Frame,
        decoder: &mut HpackDecoder,
        block: &mut Option<HeaderBlock>,
    ) -> Result<()> {
        trace!(frame_type = ?frame.frame_type(), stream_id = frame.stream_id(), "dispatch");
        match frame {
            Frame::Data(f) => self.on_data(f).await,
            Frame::Headers(f) => {
                if f.header_block.len() > MAX_HEADER_BLOCK_SIZE {
                    return Err(Error::protocol("header block too large"));
                }
                let hb = HeaderBlock {
                    stream_id: f.header.stream_id,
                    end_stream: f.stream_ends(),
                    self_dependent: f.depends_on_itself(),
                    buf: BytesMut::from(&f.header_block[..]),
                };
                if f.headers_ended() {
                    self.on_header_block(hb, decoder)
                } else {
                    *block = Some(hb);
                    Ok(())
                }
            }
            Frame::Continuation(f) => {
                let mut hb = match block.take() {
                    Some(hb) if hb.stream_id == f.header.stream_id => hb,
                    _ => return Err(Error::protocol("CONTINUATION without matching HEADERS")),
                };
                if hb.buf.len() + f.header_block.len() > MAX_HEADER_BLOCK_SIZE {
                    return Err(Error::protocol("header block too large"));
                }
                hb.buf.extend_from_slice(&f.header_block);
                if f.headers_ended() {
                    self.on_header_block(hb, decoder)
                } else {
                    *block = Some(hb);
                    Ok(())
                }
            }
            Frame::RstStream(f) => self.on_rst_stream(f).await,
            Frame::Settings(f) => self.on_settings(f).await,
            Frame::PushPromise(_) => Err(Error::protocol("received PUSH_PROMISE with push disabled")),
            Frame::Ping(f) => self.on_ping(f).await,
            Frame::GoAway(f) => self.on_goaway(f).await,
            Frame::WindowUpdate(f) => self.on_window_update(f),
            Frame::Priority(_) | Frame::Unknown(_) => Ok(()),
        }
    }

    async fn on_data(&self, f: DataFrame) -> Result<()> {
        enum Outcome {
            Ignored,
            Accepted { done: bool },
            Rejected(Error),
        }

        let id = f.header.stream_id;
        let len = f.header.length;
        let pad = f.padding_len();
        let end_stream = f.stream_ends();

        let (stream_inc, conn_inc, done, result) = {
            let mut guard = self.state();
            let st = &mut *guard;
            if st.recv_flow.consume(len).is_err() {
                return Err(Error::connection(
                    ErrorCode::FlowControlError,
                    "peer overran connection receive window",
                ));
            }
            let was_opened = st.was_opened(id);
            let outcome = match st.streams.get_mut(&id) {
                None if was_opened => Outcome::Ignored,
                None => return Err(Error::protocol(format!("DATA on unopened stream {}", id))),
                Some(s) if s.did_reset || s.reset.is_some() => Outcome::Ignored,
                Some(s) => match s.recv_data(len, f.data, end_stream) {
                    Ok(()) => {
                        if pad > 0 {
                            s.recv_flow.release(pad);
                        }
                        Outcome::Accepted { done: s.is_done() }
                    }
                    Err(err) => Outcome::Rejected(err),
                },
            };
            match outcome {
                Outcome::Ignored => {
                    trace!(stream_id = id, len, "ignoring DATA for closed stream");
                    (None, st.return_conn_now(len), false, Ok(()))
                }
                Outcome::Accepted { done } => {
                    // Padding never reaches the application; hand it back now.
                    let stream_inc = (pad > 0 && !end_stream).then_some((id, pad));
                    (stream_inc, st.return_conn_now(pad), done, Ok(()))
                }
                Outcome::Rejected(err) => (None, st.return_conn_now(len), false, Err(err)),
            }
        };
        if done {
            self.capacity.notify_waiters();
        }
        self.write_window_updates(stream_inc, conn_inc).await?;
        result
    }

    fn on_header_block(&self, hb: HeaderBlock, decoder: &mut HpackDecoder) -> Result<()> {
        // Decode unconditionally to keep the dynamic table in sync.
        let headers = decoder.decode(&hb.buf)?;
        let id = hb.stream_id;
        let done = {
            let mut guard = self.state();
            let st = &mut *guard;
            let limit = st.local.max_header_list_size;
            let was_opened = st.was_opened(id);
            let s = match st.streams.get_mut(&id) {
                Some(s) => s,
                None if was_opened => {
                    trace!(stream_id = id, "ignoring HEADERS for closed stream");
                    return Ok(());
                }
                None => {
                    return Err(Error::protocol(format!("HEADERS on unopened stream {}", id)));
                }
            };
            if s.did_reset || s.reset.is_some() {
                return Ok(());
            }
            if hb.self_dependent {
                return Err(Error::stream(
                    id,
                    ErrorCode::ProtocolError,
                    "HEADERS stream depends on itself",
                ));
            }
            if limit.is_some_and(|l| header_list_size(&headers) > l as usize) {
                return Err(Error::stream(
                    id,
                    ErrorCode::ProtocolError,
                    "header list exceeds SETTINGS_MAX_HEADER_LIST_SIZE",
                ));
            }
            debug!(stream_id = id, end_stream = hb.end_stream, "received headers");
            s.recv_headers(headers, hb.end_stream)?;
            s.is_done()
        };
        if done {
            self.capacity.notify_waiters();
        }
        Ok(())
    }

    async fn on_rst_stream(&self, f: RstStreamFrame) -> Result<()> {
        let id = f.header.stream_id;
        let conn_inc = {
            let mut guard = self.state();
            let st = &mut *guard;
            let was_opened = st.was_opened(id);
            let dropped = match st.streams.get_mut(&id) {
                Some(s) if s.is_done() => 0,
                Some(s) => {
                    debug!(stream_id = id, code = %f.error_code, "stream reset by peer");
                    s.recv_reset(f.error_code)
                }
                None if was_opened => 0,
                None => {
                    return Err(Error::protocol(format!("RST_STREAM on idle stream {}", id)));
                }
            };
            st.return_conn_now(dropped)
        };
        self.capacity.notify_waiters();
        self.write_window_updates(None, conn_inc).await
    }

    async fn on_settings(&self, f: SettingsFrame) -> Result<()> {
        if f.is_ack() {
            let mut st = self.state();
            if st.pending_settings_acks == 0 {
                return Err(Error::protocol("unexpected SETTINGS ACK"));
            }
            st.pending_settings_acks -= 1;
            debug!("settings acknowledged by peer");
            return Ok(());
        }
        {
            let mut guard = self.state();
            let st = &mut *guard;
            let old = st.peer.initial_window_size;
            for setting in f.iter() {
                st.peer.apply(setting)?;
            }
            let delta = i64::from(st.peer.initial_window_size) - i64::from(old);
            if delta != 0 {
                for s in st.streams.values_mut().filter(|s| !s.is_done()) {
                    if s.send_flow.adjust(delta).is_err() {
                        return Err(Error::connection(
                            ErrorCode::FlowControlError,
                            "SETTINGS_INITIAL_WINDOW_SIZE overflows a stream window",
                        ));
                    }
                }
            }
            debug!(peer = ?st.peer, "applied peer settings");
        }
        {
            let mut out = self.out.lock().await;
            out.framer.write_settings_ack().await?;
            out.framer.flush().await?;
        }
        self.capacity.notify_waiters();
        Ok(())
    }

    async fn on_ping(&self, f: PingFrame) -> Result<()> {
        if f.is_ack() {
            let waiter = self.state().pings.remove(&f.data);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(Ok(()));
                }
                None => debug!("unsolicited PING ACK"),
            }
            return Ok(());
        }
        let mut out = self.out.lock().await;
        out.framer.write_ping(true, f.data).await?;
        out.framer.flush().await
    }

    async fn on_goaway(&self, f: GoAwayFrame) -> Result<()> {
        let last = f.last_stream_id;
        if f.error_code == ErrorCode::NoError {
            debug!(last_stream_id = last, "received GOAWAY");
        } else {
            warn!(
                last_stream_id = last,
                code = %f.error_code,
                debug_data = %String::from_utf8_lossy(&f.debug_data),
                "received GOAWAY"
            );
        }
        let conn_inc = {
            let mut guard = self.state();
            let st = &mut *guard;
            // The watermark may only shrink.
            let last = st.goaway.map_or(last, |(prev, _)| prev.min(last));
            st.goaway = Some((last, f.error_code));
            let mut dropped = 0u32;
            for s in st.streams.values_mut() {
                if s.id > last && !s.is_done() {
                    dropped = dropped.saturating_add(s.discard_data());
                    s.fail(Error::StreamRefused {
                        stream_id: s.id,
                        last_stream_id: last,
                    });
                }
            }
            st.return_conn_now(dropped)
        };
        self.capacity.notify_waiters();
        self.write_window_updates(None, conn_inc).await
    }

    fn on_window_update(&self, f: WindowUpdateFrame) -> Result<()> {
        let id = f.header.stream_id;
        {
            let mut guard = self.state();
            let st = &mut *guard;
            if id == 0 {
                st.send_flow.increase(f.increment).map_err(|_| {
                    Error::connection(ErrorCode::FlowControlError, "connection window overflow")
                })?;
            } else {
                let was_opened = st.was_opened(id);
                match st.streams.get_mut(&id) {
                    Some(s) if s.is_done() => {}
                    Some(s) => {
                        if s.send_flow.increase(f.increment).is_err() {
                            return Err(Error::stream(
                                id,
                                ErrorCode::FlowControlError,
                                "stream window overflow",
                            ));
                        }
                    }
                    None if was_opened => {}
                    None => {
                        return Err(Error::protocol(format!(
                            "WINDOW_UPDATE on idle stream {}",
                            id
                        )));
                    }
                }
            }
        }
        self.capacity.notify_waiters();
        Ok(())
    }
}

async fn send_goaway(out: &mut Outbound, code: ErrorCode, debug_data: &[u8]) -> Result<()> {
    // Client connections never accept peer-initiated streams.
    out.framer.write_goaway(0, code, debug_data).await?;
    out.framer.flush().await?;
    out.framer.shutdown().await
}

/// Write a header block as HEADERS plus CONTINUATION frames of at most
/// `max_frame` bytes each.
pub(crate) async fn write_header_block(
    framer: &mut FrameWriter<BufWriter<BoxedWrite>>,
    stream_id: u32,
    mut block: Bytes,
    end_stream: bool,
    max_frame: u32,
) -> Result<()> {
    let max = max_frame as usize;
    let first = block.split_to(block.len().min(max));
    framer
        .write_headers(HeadersFrameParam {
            stream_id,
            block_fragment: first,
            end_stream,
            end_headers: block.is_empty(),
            ..Default::default()
        })
        .await?;
    while !block.is_empty() {
        let chunk = block.split_to(block.len().min(max));
        framer
            .write_continuation(stream_id, block.is_empty(), &chunk)
            .await?;
    }
    framer.flush().await
}

async fn read_loop<R>(weak: Weak<Inner>, mut reader: FrameReader<R>)
where
    R: AsyncRead + Unpin + Send,
{
    let mut decoder = HpackDecoder::new();
    let mut block: Option<HeaderBlock> = None;
    loop {
        let res = reader.read_frame().await;
        let Some(inner) = weak.upgrade() else {
            debug!("connection dropped, stopping read loop");
            return;
        };
        let res = match res {
            Ok(frame) => inner.dispatch(frame, &mut decoder, &mut block).await,
            Err(err) => Err(err),
        };
        match res {
            Ok(()) => {}
            Err(Error::Stream {
                stream_id,
                code,
                reason,
            }) => {
                if let Err(err) = inner.reset_stream(stream_id, code, reason).await {
                    inner.teardown(err).await;
                    return;
                }
            }
            Err(err) => {
                inner.teardown(err).await;
                return;
            }
        }
    }
}

/// Handle to a client HTTP/2 connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state();
        f.debug_struct("Connection")
            .field("next_stream_id", &st.next_stream_id)
            .field("active_streams", &st.active_streams())
            .field("closed", &st.closed)
            .finish()
    }
}

impl Connection {
    /// Send the connection preface and initial SETTINGS over `io`, then
    /// start the read loop on the current tokio runtime.
    pub async fn handshake<T>(io: T, config: Config) -> Result<Connection>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (r, w) = tokio::io::split(io);

        let mut writer = FrameWriter::new(BufWriter::new(Box::new(w) as BoxedWrite));
        writer.set_allow_illegal_writes(config.illegal_writes());
        writer.write_preface().await?;
        writer
            .write_settings(&config.local_settings().to_settings())
            .await?;
        let conn_window = config.connection_window();
        if conn_window > DEFAULT_INITIAL_WINDOW_SIZE {
            writer
                .write_window_update(0, conn_window - DEFAULT_INITIAL_WINDOW_SIZE)
                .await?;
        }
        writer.flush().await?;
        debug!(settings = ?config.local_settings(), "sent connection preface");

        let mut reader = FrameReader::new(BufReader::new(r));
        reader.set_max_read_frame_size(config.local_settings().max_frame_size);
        reader.set_allow_illegal_reads(config.illegal_reads());
        reader.set_reuse_frames(config.reuses_frames());

        let inner = Arc::new(Inner {
            state: Mutex::new(ConnState::new(&config)),
            out: AsyncMutex::new(Outbound {
                framer: writer,
                encoder: HpackEncoder::new(),
            }),
            capacity: Notify::new(),
            read_task: Mutex::new(None),
        });
        let task = tokio::spawn(read_loop(Arc::downgrade(&inner), reader));
        *inner
            .read_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());

        Ok(Connection { inner })
    }

    /// Open a new stream by sending `headers`.
    ///
    /// Waits while the peer's SETTINGS_MAX_CONCURRENT_STREAMS limit is
    /// reached. Fails with [`Error::GoingAway`] once the peer sent GOAWAY.
    pub async fn send_request(&self, headers: &[Header], end_stream: bool) -> Result<RequestStream> {
        loop {
            self.wait_for_slot().await?;

            let mut out = self.inner.out.lock().await;
            let opened = {
                let mut st = self.inner.state();
                st.check_can_open_stream()?;
                if st.has_slot() {
                    if let Some(limit) = st.peer.max_header_list_size {
                        if header_list_size(headers) > limit as usize {
                            return Err(Error::IllegalWrite(
                                "header list exceeds peer SETTINGS_MAX_HEADER_LIST_SIZE",
                            ));
                        }
                    }
                    let id = st.next_stream_id;
                    st.next_stream_id = id + 2;
                    let mut s = Stream::new(
                        id,
                        st.peer.initial_window_size,
                        st.local.initial_window_size,
                        st.stream_refund_threshold,
                    );
                    s.send_headers(end_stream);
                    let notify = s.notify.clone();
                    st.streams.insert(id, s);
                    Some((id, notify, st.peer.max_frame_size))
                } else {
                    None
                }
            };
            // Another caller took the last slot while we waited for the lock.
            let Some((id, notify, max_frame)) = opened else {
                continue;
            };

            let block = out.encoder.encode(headers);
            debug!(stream_id = id, end_stream, "opening stream");
            if let Err(err) = write_header_block(&mut out.framer, id, block, end_stream, max_frame).await {
                drop(out);
                self.inner.close_with(err.clone());
                return Err(err);
            }
            return Ok(RequestStream::new(self.clone(), id, notify));
        }
    }

    async fn wait_for_slot(&self) -> Result<()> {
        loop {
            let notified = self.inner.capacity.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let st = self.inner.state();
                st.check_can_open_stream()?;
                if st.has_slot() {
                    return Ok(());
                }
            }
            trace!("waiting for a stream slot");
            notified.await;
        }
    }

    /// Send a PING and wait for the peer's acknowledgement.
    pub async fn ping(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let nonce = {
            let mut st = self.inner.state();
            st.check_open()?;
            let nonce = loop {
                st.ping_seq = st.ping_seq.wrapping_add(1);
                let nonce = st.ping_seq.to_be_bytes();
                if !st.pings.contains_key(&nonce) {
                    break nonce;
                }
            };
            st.pings.insert(nonce, tx);
            nonce
        };
        let written = {
            let mut out = self.inner.out.lock().await;
            match out.framer.write_ping(false, nonce).await {
                Ok(()) => out.framer.flush().await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = written {
            self.inner.state().pings.remove(&nonce);
            self.inner.close_with(err.clone());
            return Err(err);
        }
        match rx.await {
            Ok(res) => res,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Announce a graceful shutdown with GOAWAY. Open streams continue;
    /// new requests are refused.
    pub async fn shutdown(&self, code: ErrorCode, debug_data: &[u8]) -> Result<()> {
        {
            let mut st = self.inner.state();
            st.check_open()?;
            st.shutting_down = true;
        }
        debug!(%code, "sending GOAWAY");
        let mut out = self.inner.out.lock().await;
        out.framer.write_goaway(0, code, debug_data).await?;
        out.framer.flush().await
    }

    /// Close the connection immediately, failing all pending streams.
    pub async fn close(&self) -> Result<()> {
        let first = self.inner.close_with(Error::ConnectionClosed);
        if let Some(task) = self
            .inner
            .read_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if first {
            let mut out = self.inner.out.lock().await;
            send_goaway(&mut out, ErrorCode::NoError, b"").await?;
        }
        Ok(())
    }

    pub fn peer_settings(&self) -> Settings {
        self.inner.state().peer.clone()
    }

    /// Streams that have not reached the closed state.
    pub fn active_streams(&self) -> usize {
        self.inner.state().active_streams()
    }

    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.inner.state().streams.get(&stream_id).map(|s| s.state)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state().closed.is_some()
    }

    /// Terminal error of a closed connection.
    pub fn close_reason(&self) -> Option<Error> {
        self.inner.state().closed.clone()
    }

    /// Last stream id announced by a peer GOAWAY.
    pub fn goaway_received(&self) -> Option<u32> {
        self.inner.state().goaway.map(|(last, _)| last)
    }
}

//! Caller-side handle for one request stream.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::connection::{write_header_block, Connection};
use crate::error::{Error, ErrorCode, Result};
use crate::hpack::Header;
use crate::stream::{Stream, StreamState};

/// A stream opened with [`Connection::send_request`].
///
/// Dropping the handle before the stream finished resets it with
/// RST_STREAM(CANCEL).
pub struct RequestStream {
    conn: Connection,
    id: u32,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for RequestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStream")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl RequestStream {
    pub(crate) fn new(conn: Connection, id: u32, notify: Arc<Notify>) -> Self {
        Self { conn, id, notify }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.conn
            .inner
            .state()
            .streams
            .get(&self.id)
            .map_or(StreamState::Closed, |s| s.state)
    }

    /// Run `check` under the state lock until it yields a result, sleeping
    /// on the stream's wake handle in between.
    async fn wait_for<T>(&self, mut check: impl FnMut(&mut Stream) -> Option<Result<T>>) -> Result<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.conn.inner.state();
                let closed = st.closed.clone();
                let s = match st.streams.get_mut(&self.id) {
                    Some(s) => s,
                    None => return Err(closed.unwrap_or(Error::Canceled)),
                };
                if let Some(res) = check(s) {
                    return res;
                }
            }
            notified.await;
        }
    }

    /// Wait until both flow-control windows allow sending, then reserve up
    /// to `want` bytes from each.
    async fn reserve(&self, want: usize) -> Result<u32> {
        let inner = &self.conn.inner;
        loop {
            let notified = inner.capacity.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut guard = inner.state();
                let st = &mut *guard;
                st.check_open()?;
                let max_frame = st.peer.max_frame_size;
                let conn_avail = st.send_flow.available();
                let s = st.streams.get_mut(&self.id).ok_or(Error::Canceled)?;
                s.check()?;
                if !s.state.can_send() {
                    return Err(Error::stream(
                        self.id,
                        ErrorCode::StreamClosed,
                        "stream is closed for sending",
                    ));
                }
                if want == 0 {
                    return Ok(0);
                }
                let n = (want.min(max_frame as usize) as u32)
                    .min(conn_avail)
                    .min(s.send_flow.available());
                if n > 0 && s.send_flow.consume(n).is_ok() && st.send_flow.consume(n).is_ok() {
                    return Ok(n);
                }
                trace!(
                    stream_id = self.id,
                    stream_window = s.send_flow.window(),
                    conn_window = conn_avail,
                    "waiting for send window"
                );
            }
            notified.await;
        }
    }

    /// Send `data` as one or more DATA frames.
    ///
    /// Suspends whenever the stream or connection window is exhausted and
    /// resumes when the peer grants more with WINDOW_UPDATE or SETTINGS.
    pub async fn send_data(&self, mut data: Bytes, end_stream: bool) -> Result<()> {
        if data.is_empty() && !end_stream {
            return Ok(());
        }
        let inner = &self.conn.inner;
        loop {
            let n = self.reserve(data.len()).await?;
            let chunk = data.split_to(n as usize);
            let last = end_stream && data.is_empty();

            let mut out = inner.out.lock().await;
            {
                let mut st = inner.state();
                let writable = match st.streams.get_mut(&self.id) {
                    Some(s) if s.error.is_none() && s.state.can_send() => {
                        if last {
                            s.send_end_stream();
                        }
                        true
                    }
                    _ => false,
                };
                if !writable {
                    // Reset while we waited for the write lock.
                    st.send_flow.release(n);
                    let err = st.stream_error(self.id);
                    drop(st);
                    inner.capacity.notify_waiters();
                    return Err(err);
                }
            }
            trace!(stream_id = self.id, len = n, end_stream = last, "sending DATA");
            let written = match out.framer.write_data(self.id, last, &chunk).await {
                Ok(()) => out.framer.flush().await,
                Err(err) => Err(err),
            };
            drop(out);
            if let Err(err) = written {
                inner.close_with(err.clone());
                return Err(err);
            }
            if data.is_empty() {
                if last {
                    inner.capacity.notify_waiters();
                }
                return Ok(());
            }
        }
    }

    /// Send trailing headers, ending the request.
    pub async fn send_trailers(&self, trailers: &[Header]) -> Result<()> {
        let inner = &self.conn.inner;
        let mut out = inner.out.lock().await;
        let max_frame = {
            let mut st = inner.state();
            st.check_open()?;
            let err = st.stream_error(self.id);
            match st.streams.get_mut(&self.id) {
                Some(s) if s.error.is_none() && s.state.can_send() => s.send_end_stream(),
                _ => return Err(err),
            }
            st.peer.max_frame_size
        };
        let block = out.encoder.encode(trailers);
        let written = write_header_block(&mut out.framer, self.id, block, true, max_frame).await;
        drop(out);
        if let Err(err) = written {
            inner.close_with(err.clone());
            return Err(err);
        }
        inner.capacity.notify_waiters();
        Ok(())
    }

    /// Wait for the final response headers. Informational (1xx) responses
    /// are skipped.
    pub async fn response(&self) -> Result<Vec<Header>> {
        let id = self.id;
        self.wait_for(|s| {
            if let Some(headers) = &s.response {
                return Some(Ok(headers.clone()));
            }
            if let Err(err) = s.check() {
                return Some(Err(err));
            }
            if !s.state.can_recv() {
                return Some(Err(Error::stream(
                    id,
                    ErrorCode::ProtocolError,
                    "stream ended without response headers",
                )));
            }
            None
        })
        .await
    }

    /// Next chunk of the response body, or `None` once the peer ended the
    /// stream. Consumed bytes are returned to the peer's send window.
    pub async fn data(&self) -> Result<Option<Bytes>> {
        let next = self
            .wait_for(|s| {
                if let Some(taken) = s.take_data() {
                    return Some(Ok(Some(taken)));
                }
                if let Err(err) = s.check() {
                    return Some(Err(err));
                }
                if !s.state.can_recv() {
                    return Some(Ok(None));
                }
                None
            })
            .await?;
        let Some((chunk, stream_inc)) = next else {
            return Ok(None);
        };
        let conn_inc = self.conn.inner.state().credit_conn(chunk.len() as u32);
        if let Err(err) = self
            .conn
            .inner
            .write_window_updates(stream_inc.map(|inc| (self.id, inc)), conn_inc)
            .await
        {
            debug!(stream_id = self.id, error = %err, "failed to send WINDOW_UPDATE");
        }
        Ok(Some(chunk))
    }

    /// Wait for the peer to end the stream and return its trailers, if any.
    pub async fn trailers(&self) -> Result<Option<Vec<Header>>> {
        self.wait_for(|s| {
            if let Err(err) = s.check() {
                return Some(Err(err));
            }
            if !s.state.can_recv() {
                return Some(Ok(s.trailers.clone()));
            }
            None
        })
        .await
    }

    /// Abandon the stream. RST_STREAM(CANCEL) is written at most once and
    /// pending waiters observe [`Error::Canceled`].
    pub async fn cancel(&self) -> Result<()> {
        let inner = &self.conn.inner;
        let (send_rst, conn_inc) = {
            let mut guard = inner.state();
            let st = &mut *guard;
            match st.streams.get_mut(&self.id) {
                Some(s) if !s.is_done() => {
                    let dropped = s.discard_data();
                    s.fail(Error::Canceled);
                    let send_rst = s.mark_reset_sent();
                    (send_rst, st.return_conn_now(dropped))
                }
                _ => (false, None),
            }
        };
        inner.capacity.notify_waiters();
        if send_rst {
            inner.write_rst(self.id, ErrorCode::Cancel).await?;
        }
        inner.write_window_updates(None, conn_inc).await
    }
}

impl Drop for RequestStream {
    fn drop(&mut self) {
        let inner = self.conn.inner.clone();
        let id = self.id;
        let (send_rst, conn_inc) = {
            let mut guard = inner.state();
            let st = &mut *guard;
            match st.streams.remove(&id) {
                Some(mut s) => {
                    let dropped = s.discard_data();
                    let send_rst = st.closed.is_none() && !s.is_done() && s.mark_reset_sent();
                    (send_rst, st.return_conn_now(dropped))
                }
                None => (false, None),
            }
        };
        inner.capacity.notify_waiters();
        if !send_rst && conn_inc.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if send_rst {
                        if let Err(err) = inner.write_rst(id, ErrorCode::Cancel).await {
                            debug!(stream_id = id, error = %err, "failed to reset dropped stream");
                        }
                    }
                    let _ = inner.write_window_updates(None, conn_inc).await;
                });
            }
            Err(_) => debug!(stream_id = id, "no runtime to reset dropped stream"),
        }
    }
}

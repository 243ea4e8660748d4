//! Reading and writing HTTP/2 frames on an async byte stream.
//!
//! [`FrameReader`] and [`FrameWriter`] are not synchronized. One task may
//! read while another writes, but concurrent writers must serialize their
//! calls (the connection does this behind its write lock).

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::trace;

use crate::error::{Error, ErrorCode, Result};
use crate::frame::{
    flags, parse_frame, Frame, FrameHeader, FrameType, PriorityParam, Setting,
    DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN, MAX_FRAME_SIZE, MAX_WINDOW_SIZE,
};
use crate::order::HeaderBlockValidator;

/// Read exactly one 9-byte frame header.
///
/// A transport that ends before 9 bytes arrive yields an
/// `UnexpectedEof` I/O error.
pub async fn read_frame_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<FrameHeader> {
    let mut buf = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut buf).await?;
    FrameHeader::parse(&buf).ok_or_else(|| Error::frame_size("short frame header"))
}

fn valid_stream_id(id: u32) -> bool {
    id != 0 && id & 0x8000_0000 == 0
}

fn valid_stream_id_or_zero(id: u32) -> bool {
    id & 0x8000_0000 == 0
}

/// Reads frames from the peer.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_read_frame_size: u32,
    allow_illegal_reads: bool,
    reuse_frames: bool,
    validator: HeaderBlockValidator,
}

impl<R> std::fmt::Debug for FrameReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("max_read_frame_size", &self.max_read_frame_size)
            .field("allow_illegal_reads", &self.allow_illegal_reads)
            .field("reuse_frames", &self.reuse_frames)
            .field("validator", &self.validator)
            .finish()
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            max_read_frame_size: DEFAULT_MAX_FRAME_SIZE,
            allow_illegal_reads: false,
            reuse_frames: false,
            validator: HeaderBlockValidator::new(),
        }
    }

    /// Largest payload accepted from the peer. Clamped to 2^24-1.
    pub fn set_max_read_frame_size(&mut self, size: u32) {
        self.max_read_frame_size = size.min(MAX_FRAME_SIZE);
    }

    pub fn max_read_frame_size(&self) -> u32 {
        self.max_read_frame_size
    }

    /// Disables header block ordering checks. For conformance tooling only.
    pub fn set_allow_illegal_reads(&mut self, allow: bool) {
        self.allow_illegal_reads = allow;
    }

    /// When enabled, payloads are carved out of one read buffer that is
    /// reclaimed once the previous frame has been dropped. Otherwise each
    /// frame owns a fresh allocation.
    pub fn set_reuse_frames(&mut self, reuse: bool) {
        self.reuse_frames = reuse;
    }

    /// Read, parse and validate the next frame.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let header = read_frame_header(&mut self.inner).await?;
        if header.length > self.max_read_frame_size {
            return Err(Error::frame_size(format!(
                "frame length {} exceeds maximum {}",
                header.length, self.max_read_frame_size
            )));
        }
        let payload = self.read_payload(header.length as usize).await?;
        trace!(?header, "read frame");

        match parse_frame(header, payload) {
            Ok(frame) => {
                if !self.allow_illegal_reads {
                    self.validator.check(&header)?;
                }
                Ok(frame)
            }
            Err(err @ Error::Stream { .. }) => {
                // Ordering violations outrank the stream-level error.
                if !self.allow_illegal_reads {
                    self.validator.check(&header)?;
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn read_payload(&mut self, len: usize) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        if self.reuse_frames {
            self.buf.clear();
            self.buf.resize(len, 0);
            self.inner.read_exact(&mut self.buf[..]).await?;
            Ok(self.buf.split().freeze())
        } else {
            let mut buf = vec![0u8; len];
            self.inner.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Parameters for [`FrameWriter::write_headers`].
#[derive(Debug, Clone, Default)]
pub struct HeadersFrameParam {
    pub stream_id: u32,
    /// HPACK fragment carried by this frame.
    pub block_fragment: Bytes,
    pub end_stream: bool,
    pub end_headers: bool,
    /// Zero padding bytes to append. Sets PADDED when nonzero.
    pub pad_length: u8,
    /// Sets PRIORITY when present.
    pub priority: Option<PriorityParam>,
}

/// Parameters for [`FrameWriter::write_push_promise`].
#[derive(Debug, Clone, Default)]
pub struct PushPromiseParam {
    pub stream_id: u32,
    pub promise_id: u32,
    pub block_fragment: Bytes,
    pub end_headers: bool,
    pub pad_length: u8,
}

/// Writes frames to the peer, one `write_all` per frame.
pub struct FrameWriter<W> {
    inner: W,
    wbuf: BytesMut,
    allow_illegal_writes: bool,
}

impl<W> std::fmt::Debug for FrameWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("allow_illegal_writes", &self.allow_illegal_writes)
            .finish()
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            wbuf: BytesMut::with_capacity(FRAME_HEADER_LEN + DEFAULT_MAX_FRAME_SIZE as usize),
            allow_illegal_writes: false,
        }
    }

    /// Skips stream id, increment and padding checks. For conformance tooling only.
    pub fn set_allow_illegal_writes(&mut self, allow: bool) {
        self.allow_illegal_writes = allow;
    }

    fn start_write(&mut self, frame_type: FrameType, flags: u8, stream_id: u32) {
        self.wbuf.clear();
        // Length is backpatched in end_write.
        self.wbuf
            .put_slice(&FrameHeader::new(frame_type, flags, stream_id).encode());
    }

    async fn end_write(&mut self) -> Result<()> {
        let length = self.wbuf.len() - FRAME_HEADER_LEN;
        if length > MAX_FRAME_SIZE as usize {
            return Err(Error::IllegalWrite("frame payload too large"));
        }
        self.wbuf[0] = (length >> 16) as u8;
        self.wbuf[1] = (length >> 8) as u8;
        self.wbuf[2] = length as u8;
        self.inner.write_all(&self.wbuf).await?;
        Ok(())
    }

    fn check_stream_id(&self, id: u32) -> Result<()> {
        if !self.allow_illegal_writes && !valid_stream_id(id) {
            return Err(Error::IllegalWrite("invalid stream ID"));
        }
        Ok(())
    }

    pub async fn write_data(&mut self, stream_id: u32, end_stream: bool, data: &[u8]) -> Result<()> {
        self.write_data_padded(stream_id, end_stream, data, &[]).await
    }

    /// Writes a DATA frame. A non-empty `pad` sets PADDED; its bytes must
    /// be zero unless illegal writes are allowed.
    pub async fn write_data_padded(
        &mut self,
        stream_id: u32,
        end_stream: bool,
        data: &[u8],
        pad: &[u8],
    ) -> Result<()> {
        self.check_stream_id(stream_id)?;
        if !pad.is_empty() {
            if pad.len() > 255 {
                return Err(Error::IllegalWrite("pad length too large"));
            }
            if !self.allow_illegal_writes && pad.iter().any(|&b| b != 0) {
                return Err(Error::IllegalWrite("padding bytes must all be zeros"));
            }
        }
        let mut f = 0;
        if end_stream {
            f |= flags::END_STREAM;
        }
        if !pad.is_empty() {
            f |= flags::PADDED;
        }
        self.start_write(FrameType::Data, f, stream_id);
        if !pad.is_empty() {
            self.wbuf.put_u8(pad.len() as u8);
        }
        self.wbuf.put_slice(data);
        self.wbuf.put_slice(pad);
        self.end_write().await
    }

    pub async fn write_headers(&mut self, p: HeadersFrameParam) -> Result<()> {
        self.check_stream_id(p.stream_id)?;
        let mut f = 0;
        if p.pad_length != 0 {
            f |= flags::PADDED;
        }
        if p.end_stream {
            f |= flags::END_STREAM;
        }
        if p.end_headers {
            f |= flags::END_HEADERS;
        }
        if p.priority.is_some() {
            f |= flags::PRIORITY;
        }
        self.start_write(FrameType::Headers, f, p.stream_id);
        if p.pad_length != 0 {
            self.wbuf.put_u8(p.pad_length);
        }
        if let Some(prio) = p.priority {
            if !self.allow_illegal_writes && !valid_stream_id_or_zero(prio.stream_dep) {
                return Err(Error::IllegalWrite("invalid dependent stream ID"));
            }
            self.wbuf.put_slice(&prio.encode());
        }
        self.wbuf.put_slice(&p.block_fragment);
        self.wbuf.put_bytes(0, p.pad_length as usize);
        self.end_write().await
    }

    pub async fn write_priority(&mut self, stream_id: u32, p: PriorityParam) -> Result<()> {
        self.check_stream_id(stream_id)?;
        if !self.allow_illegal_writes && !valid_stream_id_or_zero(p.stream_dep) {
            return Err(Error::IllegalWrite("invalid dependent stream ID"));
        }
        self.start_write(FrameType::Priority, 0, stream_id);
        self.wbuf.put_slice(&p.encode());
        self.end_write().await
    }

    pub async fn write_rst_stream(&mut self, stream_id: u32, code: ErrorCode) -> Result<()> {
        self.check_stream_id(stream_id)?;
        self.start_write(FrameType::RstStream, 0, stream_id);
        self.wbuf.put_u32(code.as_u32());
        self.end_write().await
    }

    pub async fn write_settings(&mut self, settings: &[Setting]) -> Result<()> {
        self.start_write(FrameType::Settings, 0, 0);
        for s in settings {
            self.wbuf.put_u16(s.id);
            self.wbuf.put_u32(s.value);
        }
        self.end_write().await
    }

    pub async fn write_settings_ack(&mut self) -> Result<()> {
        self.start_write(FrameType::Settings, flags::ACK, 0);
        self.end_write().await
    }

    pub async fn write_push_promise(&mut self, p: PushPromiseParam) -> Result<()> {
        self.check_stream_id(p.stream_id)?;
        if !self.allow_illegal_writes && !valid_stream_id(p.promise_id) {
            return Err(Error::IllegalWrite("invalid promised stream ID"));
        }
        let mut f = 0;
        if p.pad_length != 0 {
            f |= flags::PADDED;
        }
        if p.end_headers {
            f |= flags::END_HEADERS;
        }
        self.start_write(FrameType::PushPromise, f, p.stream_id);
        if p.pad_length != 0 {
            self.wbuf.put_u8(p.pad_length);
        }
        self.wbuf.put_u32(p.promise_id);
        self.wbuf.put_slice(&p.block_fragment);
        self.wbuf.put_bytes(0, p.pad_length as usize);
        self.end_write().await
    }

    pub async fn write_ping(&mut self, ack: bool, data: [u8; 8]) -> Result<()> {
        let f = if ack { flags::ACK } else { 0 };
        self.start_write(FrameType::Ping, f, 0);
        self.wbuf.put_slice(&data);
        self.end_write().await
    }

    pub async fn write_goaway(
        &mut self,
        last_stream_id: u32,
        code: ErrorCode,
        debug_data: &[u8],
    ) -> Result<()> {
        self.start_write(FrameType::GoAway, 0, 0);
        self.wbuf.put_u32(last_stream_id & 0x7FFF_FFFF);
        self.wbuf.put_u32(code.as_u32());
        self.wbuf.put_slice(debug_data);
        self.end_write().await
    }

    /// Stream id 0 addresses the connection window.
    pub async fn write_window_update(&mut self, stream_id: u32, increment: u32) -> Result<()> {
        if !self.allow_illegal_writes && !(1..=MAX_WINDOW_SIZE).contains(&increment) {
            return Err(Error::IllegalWrite("illegal window increment value"));
        }
        self.start_write(FrameType::WindowUpdate, 0, stream_id);
        self.wbuf.put_u32(increment);
        self.end_write().await
    }

    pub async fn write_continuation(
        &mut self,
        stream_id: u32,
        end_headers: bool,
        block_fragment: &[u8],
    ) -> Result<()> {
        self.check_stream_id(stream_id)?;
        let f = if end_headers { flags::END_HEADERS } else { 0 };
        self.start_write(FrameType::Continuation, f, stream_id);
        self.wbuf.put_slice(block_fragment);
        self.end_write().await
    }

    /// Writes an arbitrary frame without any validation of its contents.
    pub async fn write_raw_frame(
        &mut self,
        frame_type: FrameType,
        flags: u8,
        stream_id: u32,
        payload: &[u8],
    ) -> Result<()> {
        self.start_write(frame_type, flags, stream_id);
        self.wbuf.put_slice(payload);
        self.end_write().await
    }

    /// Writes the client connection preface bytes verbatim.
    pub async fn write_preface(&mut self) -> Result<()> {
        self.inner.write_all(crate::frame::CONNECTION_PREFACE).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// A reader and writer pair over one transport.
#[derive(Debug)]
pub struct Framer<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Framer<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    pub async fn read_frame(&mut self) -> Result<Frame> {
        self.reader.read_frame().await
    }

    pub fn reader_mut(&mut self) -> &mut FrameReader<R> {
        &mut self.reader
    }

    pub fn writer_mut(&mut self) -> &mut FrameWriter<W> {
        &mut self.writer
    }

    pub fn into_split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }
}

impl<T: AsyncRead + AsyncWrite> Framer<ReadHalf<T>, WriteHalf<T>> {
    /// Build a framer over a single bidirectional transport.
    pub fn from_io(io: T) -> Self {
        let (r, w) = tokio::io::split(io);
        Self {
            reader: FrameReader::new(r),
            writer: FrameWriter::new(w),
        }
    }
}

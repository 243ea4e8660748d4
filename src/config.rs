//! Connection configuration.

use crate::frame::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::settings::Settings;

const DEFAULT_STREAM_WINDOW: u32 = 1 << 20;
const DEFAULT_CONN_WINDOW: u32 = 1 << 24;
const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 16 << 20;

/// Configuration for one client connection, passed to
/// [`Connection::handshake`](crate::Connection::handshake).
///
/// ```
/// use h2_framer::Config;
///
/// let config = Config::new()
///     .initial_window_size(256 * 1024)
///     .max_frame_size(32 * 1024);
/// assert_eq!(config.local_settings().max_frame_size, 32 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    local: Settings,
    conn_window: u32,
    window_update_threshold: Option<u32>,
    allow_illegal_reads: bool,
    allow_illegal_writes: bool,
    reuse_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local: Settings {
                enable_push: false,
                initial_window_size: DEFAULT_STREAM_WINDOW,
                max_header_list_size: Some(DEFAULT_MAX_HEADER_LIST_SIZE),
                ..Settings::default()
            },
            conn_window: DEFAULT_CONN_WINDOW,
            window_update_threshold: None,
            allow_illegal_reads: false,
            allow_illegal_writes: false,
            reuse_frames: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// SETTINGS_INITIAL_WINDOW_SIZE advertised for every stream.
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.local.initial_window_size = size.min(MAX_WINDOW_SIZE);
        self
    }

    /// Connection-level receive window. Values above 65535 are announced
    /// with a WINDOW_UPDATE right after the preface.
    pub fn connection_window_size(mut self, size: u32) -> Self {
        self.conn_window = size.clamp(DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE);
        self
    }

    /// Largest frame payload accepted from the peer.
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.local.max_frame_size = size.clamp(
            crate::frame::DEFAULT_MAX_FRAME_SIZE,
            crate::frame::MAX_FRAME_SIZE,
        );
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.local.max_header_list_size = Some(size);
        self
    }

    /// Limit on streams the peer may open. Push is disabled, so this only
    /// matters as an advertisement.
    pub fn max_concurrent_streams(mut self, n: u32) -> Self {
        self.local.max_concurrent_streams = Some(n);
        self
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.local.header_table_size = size;
        self
    }

    /// Consumed bytes that accumulate before a WINDOW_UPDATE is sent.
    /// Defaults to, and is capped at, half of the corresponding window.
    pub fn window_update_threshold(mut self, bytes: u32) -> Self {
        self.window_update_threshold = Some(bytes.max(1));
        self
    }

    pub fn allow_illegal_reads(mut self, allow: bool) -> Self {
        self.allow_illegal_reads = allow;
        self
    }

    pub fn allow_illegal_writes(mut self, allow: bool) -> Self {
        self.allow_illegal_writes = allow;
        self
    }

    /// Reuse one read buffer across frames.
    pub fn reuse_frames(mut self, reuse: bool) -> Self {
        self.reuse_frames = reuse;
        self
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local
    }

    pub fn connection_window(&self) -> u32 {
        self.conn_window
    }

    pub(crate) fn stream_update_threshold(&self) -> u32 {
        update_threshold(self.window_update_threshold, self.local.initial_window_size)
    }

    pub(crate) fn conn_update_threshold(&self) -> u32 {
        update_threshold(self.window_update_threshold, self.conn_window)
    }

    pub(crate) fn illegal_reads(&self) -> bool {
        self.allow_illegal_reads
    }

    pub(crate) fn illegal_writes(&self) -> bool {
        self.allow_illegal_writes
    }

    pub(crate) fn reuses_frames(&self) -> bool {
        self.reuse_frames
    }
}

// A threshold above the window would never be reached and stall the peer.
fn update_threshold(configured: Option<u32>, window: u32) -> u32 {
    let half = window / 2;
    configured.map_or(half, |t| t.min(half)).max(1)
}

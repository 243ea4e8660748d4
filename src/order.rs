//! Header block contiguity checks.
//!
//! A header block is a HEADERS (or PUSH_PROMISE) frame followed by zero or
//! more CONTINUATION frames, the last of which carries END_HEADERS. No other
//! frame may be interleaved, on any stream (RFC 9113 Section 4.3).

use crate::error::{Error, Result};
use crate::frame::{FrameHeader, FrameType};

#[derive(Debug, Default, Clone)]
pub struct HeaderBlockValidator {
    /// Stream whose header block is still open, 0 if none.
    last_header_stream: u32,
}

impl HeaderBlockValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream id of the header block in progress, if any.
    pub fn open_block(&self) -> Option<u32> {
        (self.last_header_stream != 0).then_some(self.last_header_stream)
    }

    /// Validate the next frame read from the peer.
    pub fn check(&mut self, header: &FrameHeader) -> Result<()> {
        if self.last_header_stream != 0 {
            if header.frame_type != FrameType::Continuation {
                return Err(Error::protocol(format!(
                    "got {:?} for stream {}; expected CONTINUATION following HEADERS for stream {}",
                    header.frame_type, header.stream_id, self.last_header_stream
                )));
            }
            if header.stream_id != self.last_header_stream {
                return Err(Error::protocol(format!(
                    "got CONTINUATION for stream {}; expected stream {}",
                    header.stream_id, self.last_header_stream
                )));
            }
        } else if header.frame_type == FrameType::Continuation {
            return Err(Error::protocol(format!(
                "unexpected CONTINUATION for stream {}",
                header.stream_id
            )));
        }

        match header.frame_type {
            FrameType::Headers | FrameType::PushPromise | FrameType::Continuation => {
                self.last_header_stream = if header.is_end_headers() {
                    0
                } else {
                    header.stream_id
                };
            }
            _ => {}
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.last_header_stream = 0;
    }
}

//! SETTINGS values of one endpoint.

use crate::error::Result;
use crate::frame::{
    settings_id, Setting, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
};

/// Settings as advertised by one side of the connection.
///
/// Starts at the RFC 9113 initial values; `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Validate and apply one setting. Unknown ids are ignored.
    pub fn apply(&mut self, setting: &Setting) -> Result<()> {
        setting.valid()?;
        match setting.id {
            settings_id::HEADER_TABLE_SIZE => self.header_table_size = setting.value,
            settings_id::ENABLE_PUSH => self.enable_push = setting.value == 1,
            settings_id::MAX_CONCURRENT_STREAMS => {
                self.max_concurrent_streams = Some(setting.value)
            }
            settings_id::INITIAL_WINDOW_SIZE => self.initial_window_size = setting.value,
            settings_id::MAX_FRAME_SIZE => self.max_frame_size = setting.value,
            settings_id::MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(setting.value),
            _ => {}
        }
        Ok(())
    }

    /// Entries that differ from the protocol defaults, ready for a SETTINGS frame.
    pub fn to_settings(&self) -> Vec<Setting> {
        let defaults = Settings::default();
        let mut out = Vec::new();
        if self.header_table_size != defaults.header_table_size {
            out.push(Setting::new(settings_id::HEADER_TABLE_SIZE, self.header_table_size));
        }
        if self.enable_push != defaults.enable_push {
            out.push(Setting::new(settings_id::ENABLE_PUSH, self.enable_push as u32));
        }
        if let Some(n) = self.max_concurrent_streams {
            out.push(Setting::new(settings_id::MAX_CONCURRENT_STREAMS, n));
        }
        if self.initial_window_size != defaults.initial_window_size {
            out.push(Setting::new(
                settings_id::INITIAL_WINDOW_SIZE,
                self.initial_window_size,
            ));
        }
        if self.max_frame_size != defaults.max_frame_size {
            out.push(Setting::new(settings_id::MAX_FRAME_SIZE, self.max_frame_size));
        }
        if let Some(n) = self.max_header_list_size {
            out.push(Setting::new(settings_id::MAX_HEADER_LIST_SIZE, n));
        }
        out
    }
}

/*
 * settings.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Telaio, an HTTP/2 protocol library.
 *
 * Telaio is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Telaio is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Telaio.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Connection settings (RFC 7540 6.5.2): the six recognized identifiers,
//! their initial values, and validated application of received values.

use super::frame::*;

/// One endpoint's settings. `None` means unlimited for the two identifiers
/// that default to no limit.
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
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as u32,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Apply one received setting with RFC 7540 6.5.2 validation. Unknown
    /// identifiers are ignored.
    pub fn apply(&mut self, id: u16, value: u32) -> Result<(), FrameError> {
        match id {
            SETTINGS_HEADER_TABLE_SIZE => self.header_table_size = value,
            SETTINGS_ENABLE_PUSH => {
                if value > 1 {
                    return Err(FrameError::connection(
                        ERROR_PROTOCOL_ERROR,
                        "SETTINGS_ENABLE_PUSH must be 0 or 1",
                    ));
                }
                self.enable_push = value == 1;
            }
            SETTINGS_MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(value),
            SETTINGS_INITIAL_WINDOW_SIZE => {
                if value > MAX_WINDOW_SIZE {
                    return Err(FrameError::connection(
                        ERROR_FLOW_CONTROL_ERROR,
                        "SETTINGS_INITIAL_WINDOW_SIZE exceeds 2^31-1",
                    ));
                }
                self.initial_window_size = value;
            }
            SETTINGS_MAX_FRAME_SIZE => {
                if !(MIN_MAX_FRAME_SIZE as u32..=MAX_MAX_FRAME_SIZE as u32).contains(&value) {
                    return Err(FrameError::connection(
                        ERROR_PROTOCOL_ERROR,
                        "SETTINGS_MAX_FRAME_SIZE out of range",
                    ));
                }
                self.max_frame_size = value;
            }
            SETTINGS_MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(value),
            _ => {}
        }
        Ok(())
    }

    /// Wire parameters for the values that differ from the protocol
    /// defaults, in identifier order.
    pub fn to_params(&self) -> Vec<(u16, u32)> {
        let defaults = Settings::default();
        let mut params = Vec::new();
        if self.header_table_size != defaults.header_table_size {
            params.push((SETTINGS_HEADER_TABLE_SIZE, self.header_table_size));
        }
        if self.enable_push != defaults.enable_push {
            params.push((SETTINGS_ENABLE_PUSH, u32::from(self.enable_push)));
        }
        if let Some(max) = self.max_concurrent_streams {
            params.push((SETTINGS_MAX_CONCURRENT_STREAMS, max));
        }
        if self.initial_window_size != defaults.initial_window_size {
            params.push((SETTINGS_INITIAL_WINDOW_SIZE, self.initial_window_size));
        }
        if self.max_frame_size != defaults.max_frame_size {
            params.push((SETTINGS_MAX_FRAME_SIZE, self.max_frame_size));
        }
        if let Some(max) = self.max_header_list_size {
            params.push((SETTINGS_MAX_HEADER_LIST_SIZE, max));
        }
        params
    }
}

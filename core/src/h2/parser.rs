/*
 * parser.rs
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

//! HTTP/2 frame push parser: consumes complete frames from a buffer and
//! yields typed Frame values. Partial frames are left in the buffer.

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use super::frame::*;

/// Framing-layer parser. Feed a growing buffer to `next_frame`; each call
/// removes at most one complete frame. Unknown frame types are skipped
/// (RFC 7540 4.1).
pub struct H2Parser {
    max_frame_size: usize,
}

impl H2Parser {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the frame-size ceiling we advertised in SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: usize) {
        assert!(
            (MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&size),
            "max frame size out of range"
        );
        self.max_frame_size = size;
    }

    /// Extract the next complete frame from buf, or None if more bytes are
    /// needed. Discarded unknown frames are consumed transparently.
    pub fn next_frame(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            if buf.len() < FRAME_HEADER_LENGTH {
                return Ok(None);
            }
            let length = (buf[0] as usize) << 16 | (buf[1] as usize) << 8 | (buf[2] as usize);
            if length > self.max_frame_size {
                return Err(FrameError::connection(
                    ERROR_FRAME_SIZE_ERROR,
                    format!("frame size {} exceeds max {}", length, self.max_frame_size),
                ));
            }
            if buf.len() < FRAME_HEADER_LENGTH + length {
                return Ok(None);
            }
            let frame_type = buf[3];
            let flags = buf[4];
            let stream_id = ((buf[5] & 0x7f) as u32) << 24
                | (buf[6] as u32) << 16
                | (buf[7] as u32) << 8
                | (buf[8] as u32);

            buf.advance(FRAME_HEADER_LENGTH);
            let payload = buf.split_to(length).freeze();
            trace!(frame_type, stream_id, len = length, "frame received");

            match frame_type {
                TYPE_DATA => return parse_data_frame(flags, stream_id, payload).map(Some),
                TYPE_HEADERS => return parse_headers_frame(flags, stream_id, payload).map(Some),
                TYPE_PRIORITY => return parse_priority_frame(stream_id, payload).map(Some),
                TYPE_RST_STREAM => return parse_rst_stream_frame(stream_id, payload).map(Some),
                TYPE_SETTINGS => return parse_settings_frame(flags, stream_id, payload).map(Some),
                TYPE_PUSH_PROMISE => {
                    return parse_push_promise_frame(flags, stream_id, payload).map(Some)
                }
                TYPE_PING => return parse_ping_frame(flags, stream_id, payload).map(Some),
                TYPE_GOAWAY => return parse_goaway_frame(stream_id, payload).map(Some),
                TYPE_WINDOW_UPDATE => {
                    return parse_window_update_frame(stream_id, payload).map(Some)
                }
                TYPE_CONTINUATION => {
                    return parse_continuation_frame(flags, stream_id, payload).map(Some)
                }
                other => {
                    // Unknown frame types are discarded (RFC 7540 4.1).
                    trace!(frame_type = other, "discarding unknown frame type");
                }
            }
        }
    }
}

impl Default for H2Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip the PADDED prefix byte and validate the trailing pad against what is
/// left of the payload once fixed fields have been consumed.
fn pad_length(payload: &mut Bytes, flags: u8) -> Result<usize, FrameError> {
    if flags & FLAG_PADDED == 0 {
        return Ok(0);
    }
    if payload.is_empty() {
        return Err(FrameError::connection(
            ERROR_FRAME_SIZE_ERROR,
            "PADDED frame with no pad length octet",
        ));
    }
    Ok(payload.get_u8() as usize)
}

fn padding_error(stream_id: u32, what: &str) -> FrameError {
    if stream_id == 0 {
        FrameError::connection(ERROR_PROTOCOL_ERROR, format!("{} padding exceeds payload", what))
    } else {
        FrameError::stream(
            stream_id,
            ERROR_PROTOCOL_ERROR,
            format!("{} padding exceeds payload", what),
        )
    }
}

fn parse_data_frame(flags: u8, stream_id: u32, mut payload: Bytes) -> Result<Frame, FrameError> {
    if stream_id == 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "DATA frame with stream ID 0",
        ));
    }
    let end_stream = (flags & FLAG_END_STREAM) != 0;
    let pad_len = pad_length(&mut payload, flags)?;
    if pad_len > payload.len() {
        return Err(padding_error(stream_id, "DATA frame"));
    }
    let data = payload.split_to(payload.len() - pad_len);
    Ok(Frame::Data {
        stream_id,
        end_stream,
        data,
    })
}

fn parse_headers_frame(flags: u8, stream_id: u32, mut payload: Bytes) -> Result<Frame, FrameError> {
    if stream_id == 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "HEADERS frame with stream ID 0",
        ));
    }
    let end_stream = (flags & FLAG_END_STREAM) != 0;
    let end_headers = (flags & FLAG_END_HEADERS) != 0;
    let pad_len = pad_length(&mut payload, flags)?;

    let priority = if (flags & FLAG_PRIORITY) != 0 {
        if payload.len() < 5 {
            return Err(FrameError::stream(
                stream_id,
                ERROR_FRAME_SIZE_ERROR,
                "HEADERS frame with PRIORITY too short",
            ));
        }
        Some(read_priority(&mut payload))
    } else {
        None
    };

    if pad_len > payload.len() {
        return Err(padding_error(stream_id, "HEADERS frame"));
    }
    let fragment = payload.split_to(payload.len() - pad_len);
    Ok(Frame::Headers {
        stream_id,
        end_stream,
        end_headers,
        priority,
        fragment,
        headers: Vec::new(),
    })
}

fn read_priority(payload: &mut Bytes) -> Priority {
    let b0 = payload.get_u8();
    let exclusive = (b0 & 0x80) != 0;
    let stream_dependency = (b0 as u32 & 0x7f) << 24
        | (payload.get_u8() as u32) << 16
        | (payload.get_u8() as u32) << 8
        | (payload.get_u8() as u32);
    let weight = payload.get_u8();
    Priority {
        exclusive,
        stream_dependency,
        weight,
    }
}

fn parse_priority_frame(stream_id: u32, mut payload: Bytes) -> Result<Frame, FrameError> {
    if stream_id == 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "PRIORITY frame with stream ID 0",
        ));
    }
    if payload.len() != 5 {
        // RFC 7540 6.3: stream error.
        return Err(FrameError::stream(
            stream_id,
            ERROR_FRAME_SIZE_ERROR,
            "PRIORITY frame must be 5 bytes",
        ));
    }
    let priority = read_priority(&mut payload);
    Ok(Frame::Priority {
        stream_id,
        priority,
    })
}

fn parse_rst_stream_frame(stream_id: u32, mut payload: Bytes) -> Result<Frame, FrameError> {
    if stream_id == 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "RST_STREAM frame with stream ID 0",
        ));
    }
    if payload.len() != 4 {
        return Err(FrameError::connection(
            ERROR_FRAME_SIZE_ERROR,
            "RST_STREAM frame must be 4 bytes",
        ));
    }
    let error_code = payload.get_u32();
    Ok(Frame::RstStream {
        stream_id,
        error_code,
    })
}

fn parse_settings_frame(flags: u8, stream_id: u32, mut payload: Bytes) -> Result<Frame, FrameError> {
    if stream_id != 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "SETTINGS frame with non-zero stream ID",
        ));
    }
    let ack = (flags & FLAG_ACK) != 0;
    if ack && !payload.is_empty() {
        return Err(FrameError::connection(
            ERROR_FRAME_SIZE_ERROR,
            "SETTINGS ACK frame must be empty",
        ));
    }
    if payload.len() % 6 != 0 {
        return Err(FrameError::connection(
            ERROR_FRAME_SIZE_ERROR,
            "SETTINGS frame size must be a multiple of 6",
        ));
    }
    let mut settings = Vec::with_capacity(payload.len() / 6);
    while payload.len() >= 6 {
        let id = payload.get_u16();
        let value = payload.get_u32();
        settings.push((id, value));
    }
    Ok(Frame::Settings { ack, settings })
}

fn parse_push_promise_frame(
    flags: u8,
    stream_id: u32,
    mut payload: Bytes,
) -> Result<Frame, FrameError> {
    if stream_id == 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "PUSH_PROMISE frame with stream ID 0",
        ));
    }
    let end_headers = (flags & FLAG_END_HEADERS) != 0;
    let pad_len = pad_length(&mut payload, flags)?;
    if payload.len() < 4 {
        return Err(FrameError::connection(
            ERROR_FRAME_SIZE_ERROR,
            "PUSH_PROMISE frame too short",
        ));
    }
    let promised_stream_id = payload.get_u32() & MAX_STREAM_ID;
    if promised_stream_id == 0 || promised_stream_id % 2 != 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "PUSH_PROMISE promised stream ID must be non-zero and even",
        ));
    }
    if pad_len > payload.len() {
        return Err(padding_error(stream_id, "PUSH_PROMISE frame"));
    }
    let fragment = payload.split_to(payload.len() - pad_len);
    Ok(Frame::PushPromise {
        stream_id,
        promised_stream_id,
        end_headers,
        fragment,
        headers: Vec::new(),
    })
}

fn parse_ping_frame(flags: u8, stream_id: u32, mut payload: Bytes) -> Result<Frame, FrameError> {
    if stream_id != 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "PING frame with non-zero stream ID",
        ));
    }
    if payload.len() != 8 {
        return Err(FrameError::connection(
            ERROR_FRAME_SIZE_ERROR,
            "PING frame must be 8 bytes",
        ));
    }
    let ack = (flags & FLAG_ACK) != 0;
    let opaque_data = payload.get_u64();
    Ok(Frame::Ping { ack, opaque_data })
}

fn parse_goaway_frame(stream_id: u32, mut payload: Bytes) -> Result<Frame, FrameError> {
    if stream_id != 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "GOAWAY frame with non-zero stream ID",
        ));
    }
    if payload.len() < 8 {
        return Err(FrameError::connection(
            ERROR_FRAME_SIZE_ERROR,
            "GOAWAY frame must be at least 8 bytes",
        ));
    }
    let last_stream_id = payload.get_u32() & MAX_STREAM_ID;
    let error_code = payload.get_u32();
    Ok(Frame::GoAway {
        last_stream_id,
        error_code,
        debug_data: payload,
    })
}

fn parse_window_update_frame(stream_id: u32, mut payload: Bytes) -> Result<Frame, FrameError> {
    if payload.len() != 4 {
        return Err(FrameError::connection(
            ERROR_FRAME_SIZE_ERROR,
            "WINDOW_UPDATE frame must be 4 bytes",
        ));
    }
    let increment = payload.get_u32() & MAX_WINDOW_SIZE;
    if increment == 0 {
        if stream_id == 0 {
            return Err(FrameError::connection(
                ERROR_PROTOCOL_ERROR,
                "WINDOW_UPDATE increment must be non-zero",
            ));
        }
        return Err(FrameError::stream(
            stream_id,
            ERROR_PROTOCOL_ERROR,
            "WINDOW_UPDATE increment must be non-zero",
        ));
    }
    Ok(Frame::WindowUpdate {
        stream_id,
        increment,
    })
}

fn parse_continuation_frame(flags: u8, stream_id: u32, payload: Bytes) -> Result<Frame, FrameError> {
    if stream_id == 0 {
        return Err(FrameError::connection(
            ERROR_PROTOCOL_ERROR,
            "CONTINUATION frame with stream ID 0",
        ));
    }
    let end_headers = (flags & FLAG_END_HEADERS) != 0;
    Ok(Frame::Continuation {
        stream_id,
        end_headers,
        fragment: payload,
    })
}

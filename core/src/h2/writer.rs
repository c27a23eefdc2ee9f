/*
 * writer.rs
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

//! HTTP/2 frame writer: serializes frames into a buffer. Header blocks larger
//! than the peer's MAX_FRAME_SIZE are segmented into HEADERS/PUSH_PROMISE
//! plus CONTINUATION frames; only the last frame of a run carries
//! END_HEADERS.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;

use super::frame::*;

/// Writes HTTP/2 frames into a BytesMut. The caller hands the buffer to the
/// byte sink.
pub struct H2Writer {
    buf: BytesMut,
}

impl H2Writer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(DEFAULT_MAX_FRAME_SIZE + FRAME_HEADER_LENGTH),
        }
    }

    fn write_frame_header(&mut self, length: usize, frame_type: u8, flags: u8, stream_id: u32) {
        self.buf.put_u8((length >> 16) as u8);
        self.buf.put_u8((length >> 8) as u8);
        self.buf.put_u8(length as u8);
        self.buf.put_u8(frame_type);
        self.buf.put_u8(flags);
        self.buf.put_u32(stream_id & MAX_STREAM_ID);
    }

    /// Append a DATA frame. Returns the number of payload bytes written.
    pub fn write_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) -> io::Result<usize> {
        if stream_id == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "DATA frame stream_id must be non-zero",
            ));
        }
        let flags = if end_stream {
            FLAG_END_STREAM
        } else {
            0
        };
        let len = data.len();
        self.write_frame_header(len, TYPE_DATA, flags, stream_id);
        self.buf.extend_from_slice(data);
        Ok(len)
    }

    /// Append a single HEADERS frame (no priority, no padding). The header
    /// block must already be HPACK-encoded and fit one frame.
    pub fn write_headers(
        &mut self,
        stream_id: u32,
        header_block: &[u8],
        end_stream: bool,
        end_headers: bool,
    ) -> io::Result<()> {
        if stream_id == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "HEADERS frame stream_id must be non-zero",
            ));
        }
        let mut flags = 0u8;
        if end_stream {
            flags |= FLAG_END_STREAM;
        }
        if end_headers {
            flags |= FLAG_END_HEADERS;
        }
        self.write_frame_header(header_block.len(), TYPE_HEADERS, flags, stream_id);
        self.buf.extend_from_slice(header_block);
        Ok(())
    }

    /// Append a complete header block as one HEADERS frame plus as many
    /// CONTINUATION frames as the peer's MAX_FRAME_SIZE requires. Optional
    /// priority and padding ride on the first frame only.
    pub fn write_header_block(
        &mut self,
        stream_id: u32,
        header_block: &[u8],
        end_stream: bool,
        priority: Option<&Priority>,
        pad_length: Option<u8>,
        max_frame_size: usize,
    ) -> io::Result<()> {
        if stream_id == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "HEADERS frame stream_id must be non-zero",
            ));
        }
        let mut flags = 0u8;
        if end_stream {
            flags |= FLAG_END_STREAM;
        }
        let mut prefix_len = 0usize;
        if let Some(pad) = pad_length {
            flags |= FLAG_PADDED;
            prefix_len += 1 + pad as usize;
        }
        if priority.is_some() {
            flags |= FLAG_PRIORITY;
            prefix_len += 5;
        }
        if prefix_len >= max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "padding and priority leave no room for the header block",
            ));
        }

        let first_budget = max_frame_size - prefix_len;
        let first_len = header_block.len().min(first_budget);
        let rest = &header_block[first_len..];
        if rest.is_empty() {
            flags |= FLAG_END_HEADERS;
        }

        let payload_len = prefix_len + first_len;
        self.write_frame_header(payload_len, TYPE_HEADERS, flags, stream_id);
        if let Some(pad) = pad_length {
            self.buf.put_u8(pad);
        }
        if let Some(p) = priority {
            self.write_priority_fields(p);
        }
        self.buf.extend_from_slice(&header_block[..first_len]);
        if let Some(pad) = pad_length {
            self.buf.put_bytes(0, pad as usize);
        }

        self.write_continuations(stream_id, rest, max_frame_size);
        Ok(())
    }

    /// Append a PUSH_PROMISE frame plus CONTINUATIONs for the promised
    /// stream's header block.
    pub fn write_push_promise_block(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        header_block: &[u8],
        pad_length: Option<u8>,
        max_frame_size: usize,
    ) -> io::Result<()> {
        if stream_id == 0 || promised_stream_id == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "PUSH_PROMISE stream IDs must be non-zero",
            ));
        }
        let mut flags = 0u8;
        let mut prefix_len = 4usize; // promised stream ID
        if let Some(pad) = pad_length {
            flags |= FLAG_PADDED;
            prefix_len += 1 + pad as usize;
        }
        if prefix_len >= max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "padding leaves no room for the header block",
            ));
        }

        let first_budget = max_frame_size - prefix_len;
        let first_len = header_block.len().min(first_budget);
        let rest = &header_block[first_len..];
        if rest.is_empty() {
            flags |= FLAG_END_HEADERS;
        }

        let payload_len = prefix_len + first_len;
        self.write_frame_header(payload_len, TYPE_PUSH_PROMISE, flags, stream_id);
        if let Some(pad) = pad_length {
            self.buf.put_u8(pad);
        }
        self.buf.put_u32(promised_stream_id & MAX_STREAM_ID);
        self.buf.extend_from_slice(&header_block[..first_len]);
        if let Some(pad) = pad_length {
            self.buf.put_bytes(0, pad as usize);
        }

        self.write_continuations(stream_id, rest, max_frame_size);
        Ok(())
    }

    fn write_continuations(&mut self, stream_id: u32, mut rest: &[u8], max_frame_size: usize) {
        while !rest.is_empty() {
            let chunk_len = rest.len().min(max_frame_size);
            let (chunk, remainder) = rest.split_at(chunk_len);
            rest = remainder;
            let flags = if rest.is_empty() {
                FLAG_END_HEADERS
            } else {
                0
            };
            self.write_frame_header(chunk.len(), TYPE_CONTINUATION, flags, stream_id);
            self.buf.extend_from_slice(chunk);
        }
    }

    pub fn write_priority(&mut self, stream_id: u32, priority: &Priority) -> io::Result<()> {
        if stream_id == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "PRIORITY stream_id must be non-zero",
            ));
        }
        self.write_frame_header(5, TYPE_PRIORITY, 0, stream_id);
        self.write_priority_fields(priority);
        Ok(())
    }

    fn write_priority_fields(&mut self, priority: &Priority) {
        let dep = if priority.exclusive {
            priority.stream_dependency | 0x8000_0000
        } else {
            priority.stream_dependency & MAX_STREAM_ID
        };
        self.buf.put_u32(dep);
        self.buf.put_u8(priority.weight);
    }

    pub fn write_rst_stream(&mut self, stream_id: u32, error_code: u32) -> io::Result<()> {
        if stream_id == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "RST_STREAM stream_id must be non-zero",
            ));
        }
        self.write_frame_header(4, TYPE_RST_STREAM, 0, stream_id);
        self.buf.put_u32(error_code);
        Ok(())
    }

    pub fn write_settings(&mut self, settings: &[(u16, u32)]) -> io::Result<()> {
        let payload_len = settings.len() * 6;
        self.write_frame_header(payload_len, TYPE_SETTINGS, 0, 0);
        for (id, value) in settings {
            self.buf.put_u16(*id);
            self.buf.put_u32(*value);
        }
        Ok(())
    }

    pub fn write_settings_ack(&mut self) -> io::Result<()> {
        self.write_frame_header(0, TYPE_SETTINGS, FLAG_ACK, 0);
        Ok(())
    }

    pub fn write_ping(&mut self, opaque_data: u64, ack: bool) -> io::Result<()> {
        let flags = if ack {
            FLAG_ACK
        } else {
            0
        };
        self.write_frame_header(8, TYPE_PING, flags, 0);
        self.buf.put_u64(opaque_data);
        Ok(())
    }

    pub fn write_goaway(
        &mut self,
        last_stream_id: u32,
        error_code: u32,
        debug_data: &[u8],
    ) -> io::Result<()> {
        self.write_frame_header(8 + debug_data.len(), TYPE_GOAWAY, 0, 0);
        self.buf.put_u32(last_stream_id & MAX_STREAM_ID);
        self.buf.put_u32(error_code);
        self.buf.extend_from_slice(debug_data);
        Ok(())
    }

    pub fn write_window_update(&mut self, stream_id: u32, increment: u32) -> io::Result<()> {
        if increment == 0 || increment > MAX_WINDOW_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "WINDOW_UPDATE increment out of range",
            ));
        }
        self.write_frame_header(4, TYPE_WINDOW_UPDATE, 0, stream_id);
        self.buf.put_u32(increment);
        Ok(())
    }

    /// Take the accumulated bytes. The writer stays usable.
    pub fn take_buffer(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for H2Writer {
    fn default() -> Self {
        Self::new()
    }
}

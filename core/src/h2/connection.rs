/*
 * connection.rs
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

//! HTTP/2 connection: owns the parser, writer, HPACK codecs and streams,
//! applies the RFC 7540 per-frame rules, and produces outbound bytes through
//! the handler's byte sink. Sans-io: the embedding I/O layer feeds
//! `process_incoming_data` and forwards everything handed to `send_bytes`.

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io;
use tracing::{trace, warn};

use crate::hpack::{Decoder as HpackDecoder, Encoder as HpackEncoder, Header};

use super::frame::*;
use super::parser::H2Parser;
use super::settings::Settings;
use super::stream::{Stream, StreamState};
use super::writer::H2Writer;
use super::CONNECTION_PREFACE;

/// Callbacks through which the connection talks to the embedding layer.
/// `send_bytes` is the required outbound sink; everything else defaults to a
/// no-op.
///
/// `frame_received` fires once per successfully handled frame, in wire order.
/// A header block split across CONTINUATION frames produces a single event:
/// the initiating HEADERS/PUSH_PROMISE, delivered when END_HEADERS arrives,
/// with the fully decoded header list attached.
pub trait H2ConnectionHandler {
    fn send_bytes(&mut self, bytes: Bytes);
    fn frame_received(&mut self, _frame: &Frame) {}
    fn settings_ack_received(&mut self) {}
    fn ping_ack_received(&mut self, _opaque_data: u64) {}
    fn goaway_received(&mut self, _last_stream_id: u32, _error_code: u32, _debug_data: &Bytes) {}
}

/// Result of `send_data`. `Blocked` reports how many bytes were emitted
/// before flow control ran out; the unsent suffix stays with the caller, to
/// be retried after the peer opens its windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Complete,
    Blocked { consumed: usize },
}

/// In-progress header block awaiting CONTINUATION frames.
struct HeaderSequence {
    stream_id: u32,
    initiator: Frame,
    fragments: BytesMut,
}

/// One HTTP/2 connection endpoint.
pub struct H2Connection {
    is_server: bool,
    local_settings: Settings,
    remote_settings: Settings,
    /// Connection-level flow control: what the peer lets us send.
    send_window: i32,
    /// Connection-level flow control: what we let the peer send.
    recv_window: i32,
    streams: HashMap<u32, Stream>,
    next_local_stream_id: u32,
    /// Highest peer-initiated stream ID processed so far.
    last_peer_stream_id: u32,
    going_away: bool,
    /// last_stream_id from a GOAWAY the peer sent us.
    peer_goaway_last_stream_id: Option<u32>,
    /// Set after we answered a protocol violation with GOAWAY.
    closed: bool,
    parser: H2Parser,
    writer: H2Writer,
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    read_buf: BytesMut,
    /// Server side: preface bytes still to validate.
    preface_remaining: usize,
    continuation: Option<HeaderSequence>,
}

impl H2Connection {
    /// Client endpoint with the RFC defaults. Call `send_preface` before
    /// anything else.
    pub fn client() -> Self {
        Self::new(false)
    }

    /// Server endpoint with the RFC defaults. The client preface is
    /// validated from the incoming byte stream.
    pub fn server() -> Self {
        Self::new(true)
    }

    fn new(is_server: bool) -> Self {
        let local_settings = Settings::default();
        Self {
            is_server,
            encoder: HpackEncoder::new(local_settings.header_table_size as usize),
            decoder: HpackDecoder::new(local_settings.header_table_size as usize),
            local_settings,
            remote_settings: Settings::default(),
            send_window: DEFAULT_INITIAL_WINDOW_SIZE as i32,
            recv_window: DEFAULT_INITIAL_WINDOW_SIZE as i32,
            streams: HashMap::new(),
            next_local_stream_id: if is_server { 2 } else { 1 },
            last_peer_stream_id: 0,
            going_away: false,
            peer_goaway_last_stream_id: None,
            closed: false,
            parser: H2Parser::new(),
            writer: H2Writer::new(),
            read_buf: BytesMut::with_capacity(8192),
            preface_remaining: if is_server { CONNECTION_PREFACE.len() } else { 0 },
            continuation: None,
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn is_going_away(&self) -> bool {
        self.going_away
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// State of a stream; evicted (fully closed) streams report Closed,
    /// never-used IDs report Idle.
    pub fn stream_state(&self, stream_id: u32) -> StreamState {
        match self.streams.get(&stream_id) {
            Some(stream) => stream.state(),
            None if self.is_idle_stream(stream_id) => StreamState::Idle,
            None => StreamState::Closed,
        }
    }

    /// The stream ID the next local open will use.
    pub fn next_local_stream_id(&self) -> u32 {
        self.next_local_stream_id
    }

    /// The last-stream-id carried by a GOAWAY the peer sent, if any.
    pub fn peer_goaway_last_stream_id(&self) -> Option<u32> {
        self.peer_goaway_last_stream_id
    }

    /// Connection-level send window.
    pub fn send_window(&self) -> i32 {
        self.send_window
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Apply one local setting, with validation and codec side effects.
    /// The caller is expected to advertise the change via `send_settings`.
    pub fn set_local_setting(&mut self, id: u16, value: u32) -> io::Result<()> {
        if id == SETTINGS_ENABLE_PUSH && self.is_server {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only a client advertises SETTINGS_ENABLE_PUSH",
            ));
        }
        let old_initial_window = self.local_settings.initial_window_size;
        self.local_settings
            .apply(id, value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        match id {
            SETTINGS_HEADER_TABLE_SIZE => {
                self.decoder.set_max_table_size(value as usize);
                self.encoder.set_max_table_size(value as usize);
            }
            SETTINGS_MAX_FRAME_SIZE => {
                self.parser.set_max_frame_size(value as usize);
            }
            SETTINGS_INITIAL_WINDOW_SIZE => {
                let delta = i64::from(value) - i64::from(old_initial_window);
                for stream in self.streams.values_mut() {
                    if stream.has_window() && stream.update_recv_window(delta).is_err() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "receive window overflow",
                        ));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Feed bytes from the transport. Outbound responses (SETTINGS ACK, PING
    /// ACK, RST_STREAM, GOAWAY...) are produced through the handler sink
    /// during the call. Returns the number of bytes consumed; a connection
    /// error emits GOAWAY and surfaces as Err.
    pub fn process_incoming_data<H: H2ConnectionHandler>(
        &mut self,
        data: &[u8],
        handler: &mut H,
    ) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection closed after a protocol error",
            ));
        }
        self.read_buf.extend_from_slice(data);

        if self.preface_remaining > 0 {
            if !self.validate_preface() {
                let err = self.connection_error(
                    ERROR_PROTOCOL_ERROR,
                    "invalid connection preface",
                    handler,
                );
                return Err(err);
            }
            if self.preface_remaining > 0 {
                return Ok(data.len());
            }
        }

        loop {
            match self.parser.next_frame(&mut self.read_buf) {
                Ok(Some(frame)) => {
                    if let Err(error) = self.dispatch(frame, handler) {
                        match error {
                            FrameError::Stream {
                                stream_id,
                                code,
                                message,
                            } => {
                                warn!(stream_id, code, %message, "stream error");
                                self.reset_stream_internal(stream_id, code, handler);
                            }
                            FrameError::Connection { code, message } => {
                                return Err(self.connection_error(code, &message, handler));
                            }
                        }
                    }
                    self.streams.retain(|_, stream| !stream.is_closed());
                }
                Ok(None) => break,
                Err(FrameError::Stream {
                    stream_id,
                    code,
                    message,
                }) => {
                    warn!(stream_id, code, %message, "stream error");
                    self.reset_stream_internal(stream_id, code, handler);
                }
                Err(FrameError::Connection { code, message }) => {
                    return Err(self.connection_error(code, &message, handler));
                }
            }
        }
        Ok(data.len())
    }

    /// Server side: match the start of the byte stream against the 24-byte
    /// client preface. Returns false on mismatch.
    fn validate_preface(&mut self) -> bool {
        let done = CONNECTION_PREFACE.len() - self.preface_remaining;
        let check = self.preface_remaining.min(self.read_buf.len());
        if self.read_buf[..check] != CONNECTION_PREFACE[done..done + check] {
            return false;
        }
        let _ = self.read_buf.split_to(check);
        self.preface_remaining -= check;
        true
    }

    fn dispatch<H: H2ConnectionHandler>(
        &mut self,
        frame: Frame,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        // While a header block is open, only CONTINUATION for that stream is
        // legal (RFC 7540 6.10).
        if let Some(sequence) = &self.continuation {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == sequence.stream_id => {}
                Frame::Continuation { stream_id, .. } => {
                    return Err(FrameError::connection(
                        ERROR_PROTOCOL_ERROR,
                        format!(
                            "CONTINUATION for stream {} while stream {} is unfinished",
                            stream_id, sequence.stream_id
                        ),
                    ));
                }
                _ => {
                    return Err(FrameError::connection(
                        ERROR_PROTOCOL_ERROR,
                        "frame interleaved into a header block",
                    ));
                }
            }
        }

        match frame {
            Frame::Data {
                stream_id,
                end_stream,
                data,
            } => self.handle_data(stream_id, end_stream, data, handler),
            Frame::Headers { .. } => self.handle_headers(frame, handler),
            Frame::Priority { .. } => {
                handler.frame_received(&frame);
                Ok(())
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => self.handle_rst_stream(stream_id, error_code, handler),
            Frame::Settings { .. } => self.handle_settings(frame, handler),
            Frame::PushPromise { .. } => self.handle_push_promise(frame, handler),
            Frame::Ping { ack, opaque_data } => self.handle_ping(ack, opaque_data, handler),
            Frame::GoAway { .. } => self.handle_goaway(frame, handler),
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.handle_window_update(stream_id, increment, handler),
            Frame::Continuation { .. } => self.handle_continuation(frame, handler),
        }
    }

    fn handle_data<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        end_stream: bool,
        data: Bytes,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        let recv_window = self.recv_window;
        let stream = match self.streams.get_mut(&stream_id) {
            Some(stream) => stream,
            None => {
                return Err(FrameError::stream(
                    stream_id,
                    ERROR_STREAM_CLOSED,
                    "DATA on idle or closed stream",
                ));
            }
        };
        if !stream.can_recv_data() {
            return Err(FrameError::stream(
                stream_id,
                ERROR_STREAM_CLOSED,
                "DATA after END_STREAM",
            ));
        }
        let len = data.len() as i64;
        if len > i64::from(stream.recv_window) || len > i64::from(recv_window) {
            return Err(FrameError::connection(
                ERROR_FLOW_CONTROL_ERROR,
                "DATA frame exceeds flow-control window",
            ));
        }
        stream.recv_window -= len as i32;
        self.recv_window -= len as i32;

        let frame = Frame::Data {
            stream_id,
            end_stream,
            data,
        };
        handler.frame_received(&frame);
        if end_stream {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.recv_end_stream();
            }
        }
        Ok(())
    }

    fn handle_headers<H: H2ConnectionHandler>(
        &mut self,
        frame: Frame,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        let (stream_id, end_headers, fragment_len) = match &frame {
            Frame::Headers {
                stream_id,
                end_headers,
                fragment,
                ..
            } => (*stream_id, *end_headers, fragment.len()),
            _ => unreachable!(),
        };
        if !end_headers {
            self.check_fragment_budget(fragment_len)?;
            let fragment = match &frame {
                Frame::Headers { fragment, .. } => fragment.clone(),
                _ => unreachable!(),
            };
            let mut fragments = BytesMut::with_capacity(fragment.len());
            fragments.extend_from_slice(&fragment);
            self.continuation = Some(HeaderSequence {
                stream_id,
                initiator: frame,
                fragments,
            });
            return Ok(());
        }
        let decoded = match &frame {
            Frame::Headers { fragment, .. } => self.decode_block(fragment.clone())?,
            _ => unreachable!(),
        };
        let frame = match frame {
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                priority,
                fragment,
                ..
            } => Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                priority,
                fragment,
                headers: decoded,
            },
            _ => unreachable!(),
        };
        self.deliver_headers(frame, handler)
    }

    /// Apply the stream-level HEADERS rules and deliver the logical event.
    fn deliver_headers<H: H2ConnectionHandler>(
        &mut self,
        frame: Frame,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        let (stream_id, end_stream) = match &frame {
            Frame::Headers {
                stream_id,
                end_stream,
                ..
            } => (*stream_id, *end_stream),
            _ => unreachable!(),
        };

        if !self.streams.contains_key(&stream_id) {
            if self.is_peer_initiated(stream_id) {
                self.admit_peer_stream(stream_id)?;
            } else if self.is_idle_stream(stream_id) {
                return Err(FrameError::connection(
                    ERROR_PROTOCOL_ERROR,
                    "HEADERS on an idle stream we never opened",
                ));
            } else {
                return Err(FrameError::stream(
                    stream_id,
                    ERROR_STREAM_CLOSED,
                    "HEADERS on a closed stream",
                ));
            }
        }

        let stream = self.streams.get_mut(&stream_id).unwrap();
        match stream.state() {
            StreamState::Idle | StreamState::ReservedLocal => stream.open(),
            StreamState::ReservedRemote => stream.recv_push_response(),
            StreamState::Open | StreamState::HalfClosedLocal => {
                if stream.headers_received && !end_stream {
                    return Err(FrameError::stream(
                        stream_id,
                        ERROR_PROTOCOL_ERROR,
                        "trailers must carry END_STREAM",
                    ));
                }
            }
            StreamState::HalfClosedRemote => {
                if !end_stream {
                    return Err(FrameError::stream(
                        stream_id,
                        ERROR_PROTOCOL_ERROR,
                        "trailers must carry END_STREAM",
                    ));
                }
            }
            StreamState::Closed => {
                return Err(FrameError::stream(
                    stream_id,
                    ERROR_STREAM_CLOSED,
                    "HEADERS on a closed stream",
                ));
            }
        }
        stream.headers_received = true;

        handler.frame_received(&frame);
        if end_stream {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.recv_end_stream();
            }
        }
        Ok(())
    }

    fn handle_continuation<H: H2ConnectionHandler>(
        &mut self,
        frame: Frame,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        let (end_headers, fragment) = match frame {
            Frame::Continuation {
                end_headers,
                fragment,
                ..
            } => (end_headers, fragment),
            _ => unreachable!(),
        };
        let sequence = match &mut self.continuation {
            Some(sequence) => sequence,
            None => {
                return Err(FrameError::connection(
                    ERROR_PROTOCOL_ERROR,
                    "CONTINUATION without a preceding HEADERS or PUSH_PROMISE",
                ));
            }
        };
        sequence.fragments.extend_from_slice(&fragment);
        let total = sequence.fragments.len();
        self.check_fragment_budget(total)?;
        if !end_headers {
            return Ok(());
        }

        let sequence = self.continuation.take().unwrap();
        let block = sequence.fragments.freeze();
        let decoded = self.decode_block(block.clone())?;
        match sequence.initiator {
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers: _,
                priority,
                ..
            } => self.deliver_headers(
                Frame::Headers {
                    stream_id,
                    end_stream,
                    end_headers: true,
                    priority,
                    fragment: block,
                    headers: decoded,
                },
                handler,
            ),
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                ..
            } => self.deliver_push_promise(
                Frame::PushPromise {
                    stream_id,
                    promised_stream_id,
                    end_headers: true,
                    fragment: block,
                    headers: decoded,
                },
                handler,
            ),
            _ => unreachable!(),
        }
    }

    fn handle_rst_stream<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        error_code: u32,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        let is_idle = self.is_idle_stream(stream_id);
        match self.streams.get_mut(&stream_id) {
            Some(stream) => {
                handler.frame_received(&Frame::RstStream {
                    stream_id,
                    error_code,
                });
                stream.reset();
                Ok(())
            }
            None if is_idle => Err(FrameError::connection(
                ERROR_PROTOCOL_ERROR,
                "RST_STREAM on an idle stream",
            )),
            // Closed: RST_STREAM races are expected, ignore.
            None => {
                handler.frame_received(&Frame::RstStream {
                    stream_id,
                    error_code,
                });
                Ok(())
            }
        }
    }

    fn handle_settings<H: H2ConnectionHandler>(
        &mut self,
        frame: Frame,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        let (ack, settings) = match &frame {
            Frame::Settings { ack, settings } => (*ack, settings.clone()),
            _ => unreachable!(),
        };
        if ack {
            handler.frame_received(&frame);
            handler.settings_ack_received();
            return Ok(());
        }

        let old_initial_window = self.remote_settings.initial_window_size;
        for (id, value) in &settings {
            self.remote_settings.apply(*id, *value)?;
        }
        self.encoder
            .set_peer_max_table_size(self.remote_settings.header_table_size as usize);

        let delta = i64::from(self.remote_settings.initial_window_size)
            - i64::from(old_initial_window);
        if delta != 0 {
            for stream in self.streams.values_mut() {
                if stream.has_window() && stream.update_send_window(delta).is_err() {
                    return Err(FrameError::connection(
                        ERROR_FLOW_CONTROL_ERROR,
                        "INITIAL_WINDOW_SIZE change overflows a stream window",
                    ));
                }
            }
        }

        handler.frame_received(&frame);
        // Settings take effect on this side as of the ACK we now emit.
        let _ = self.writer.write_settings_ack();
        self.flush(handler);
        Ok(())
    }

    fn handle_push_promise<H: H2ConnectionHandler>(
        &mut self,
        frame: Frame,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        if self.is_server {
            return Err(FrameError::connection(
                ERROR_PROTOCOL_ERROR,
                "server received PUSH_PROMISE",
            ));
        }
        if !self.local_settings.enable_push {
            return Err(FrameError::connection(
                ERROR_PROTOCOL_ERROR,
                "PUSH_PROMISE received with push disabled",
            ));
        }
        let (end_headers, fragment_len) = match &frame {
            Frame::PushPromise {
                end_headers,
                fragment,
                ..
            } => (*end_headers, fragment.len()),
            _ => unreachable!(),
        };
        if !end_headers {
            self.check_fragment_budget(fragment_len)?;
            let (stream_id, fragment) = match &frame {
                Frame::PushPromise {
                    stream_id,
                    fragment,
                    ..
                } => (*stream_id, fragment.clone()),
                _ => unreachable!(),
            };
            let mut fragments = BytesMut::with_capacity(fragment.len());
            fragments.extend_from_slice(&fragment);
            self.continuation = Some(HeaderSequence {
                stream_id,
                initiator: frame,
                fragments,
            });
            return Ok(());
        }
        let decoded = match &frame {
            Frame::PushPromise { fragment, .. } => self.decode_block(fragment.clone())?,
            _ => unreachable!(),
        };
        let frame = match frame {
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                end_headers,
                fragment,
                ..
            } => Frame::PushPromise {
                stream_id,
                promised_stream_id,
                end_headers,
                fragment,
                headers: decoded,
            },
            _ => unreachable!(),
        };
        self.deliver_push_promise(frame, handler)
    }

    fn deliver_push_promise<H: H2ConnectionHandler>(
        &mut self,
        frame: Frame,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        let (stream_id, promised_stream_id) = match &frame {
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                ..
            } => (*stream_id, *promised_stream_id),
            _ => unreachable!(),
        };
        let parent = self.streams.get(&stream_id).ok_or_else(|| {
            FrameError::connection(
                ERROR_PROTOCOL_ERROR,
                "PUSH_PROMISE on an unknown parent stream",
            )
        })?;
        if !matches!(
            parent.state(),
            StreamState::Open | StreamState::HalfClosedLocal
        ) {
            return Err(FrameError::connection(
                ERROR_PROTOCOL_ERROR,
                "PUSH_PROMISE parent stream cannot carry a promise",
            ));
        }
        if promised_stream_id <= self.last_peer_stream_id
            || self.streams.contains_key(&promised_stream_id)
        {
            return Err(FrameError::connection(
                ERROR_PROTOCOL_ERROR,
                "promised stream is not idle",
            ));
        }
        self.last_peer_stream_id = promised_stream_id;
        let mut promised = Stream::new(
            promised_stream_id,
            self.remote_settings.initial_window_size as i32,
            self.local_settings.initial_window_size as i32,
        );
        promised.reserve_remote();
        self.streams.insert(promised_stream_id, promised);
        handler.frame_received(&frame);
        Ok(())
    }

    fn handle_ping<H: H2ConnectionHandler>(
        &mut self,
        ack: bool,
        opaque_data: u64,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        handler.frame_received(&Frame::Ping { ack, opaque_data });
        if ack {
            handler.ping_ack_received(opaque_data);
        } else {
            let _ = self.writer.write_ping(opaque_data, true);
            self.flush(handler);
        }
        Ok(())
    }

    fn handle_goaway<H: H2ConnectionHandler>(
        &mut self,
        frame: Frame,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        let (last_stream_id, error_code, debug_data) = match &frame {
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => (*last_stream_id, *error_code, debug_data.clone()),
            _ => unreachable!(),
        };
        self.going_away = true;
        self.peer_goaway_last_stream_id = Some(last_stream_id);
        // Locally-initiated streams above the peer's mark were never
        // processed and can be dropped.
        let local_parity = self.next_local_stream_id % 2;
        self.streams
            .retain(|id, _| id % 2 != local_parity || *id <= last_stream_id);
        handler.frame_received(&frame);
        handler.goaway_received(last_stream_id, error_code, &debug_data);
        Ok(())
    }

    fn handle_window_update<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        increment: u32,
        handler: &mut H,
    ) -> Result<(), FrameError> {
        if stream_id == 0 {
            let updated = i64::from(self.send_window) + i64::from(increment);
            if updated > i64::from(MAX_WINDOW_SIZE) {
                return Err(FrameError::connection(
                    ERROR_FLOW_CONTROL_ERROR,
                    "connection window overflow",
                ));
            }
            self.send_window = updated as i32;
        } else {
            let is_idle = self.is_idle_stream(stream_id);
            match self.streams.get_mut(&stream_id) {
                Some(stream) => {
                    if stream.update_send_window(i64::from(increment)).is_err() {
                        return Err(FrameError::stream(
                            stream_id,
                            ERROR_FLOW_CONTROL_ERROR,
                            "stream window overflow",
                        ));
                    }
                }
                None if is_idle => {
                    return Err(FrameError::connection(
                        ERROR_PROTOCOL_ERROR,
                        "WINDOW_UPDATE on an idle stream",
                    ));
                }
                // Closed: late updates race with stream teardown, ignore.
                None => {}
            }
        }
        handler.frame_received(&Frame::WindowUpdate {
            stream_id,
            increment,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Client side: emit the 24-byte connection preface. Must precede every
    /// frame, including the initial SETTINGS.
    pub fn send_preface<H: H2ConnectionHandler>(&mut self, handler: &mut H) -> io::Result<()> {
        if self.is_server {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only the client sends the connection preface",
            ));
        }
        handler.send_bytes(Bytes::from_static(CONNECTION_PREFACE));
        Ok(())
    }

    /// Apply the given local settings and advertise them.
    pub fn send_settings<H: H2ConnectionHandler>(
        &mut self,
        settings: &[(u16, u32)],
        handler: &mut H,
    ) -> io::Result<()> {
        self.check_open()?;
        for (id, value) in settings {
            self.set_local_setting(*id, *value)?;
        }
        self.writer.write_settings(settings)?;
        self.flush(handler);
        Ok(())
    }

    pub fn send_settings_ack<H: H2ConnectionHandler>(&mut self, handler: &mut H) -> io::Result<()> {
        self.check_open()?;
        self.writer.write_settings_ack()?;
        self.flush(handler);
        Ok(())
    }

    pub fn send_ping<H: H2ConnectionHandler>(
        &mut self,
        opaque_data: u64,
        handler: &mut H,
    ) -> io::Result<()> {
        self.check_open()?;
        self.writer.write_ping(opaque_data, false)?;
        self.flush(handler);
        Ok(())
    }

    pub fn send_ping_ack<H: H2ConnectionHandler>(
        &mut self,
        opaque_data: u64,
        handler: &mut H,
    ) -> io::Result<()> {
        self.check_open()?;
        self.writer.write_ping(opaque_data, true)?;
        self.flush(handler);
        Ok(())
    }

    /// Reset a stream. Suppressed for streams already fully closed.
    pub fn send_rst_stream<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        error_code: u32,
        handler: &mut H,
    ) -> io::Result<()> {
        self.check_open()?;
        if stream_id == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot reset stream 0",
            ));
        }
        match self.streams.get(&stream_id) {
            Some(stream) if stream.is_closed() => return Ok(()),
            Some(_) => {}
            None => return Ok(()),
        }
        self.reset_stream_internal(stream_id, error_code, handler);
        Ok(())
    }

    /// Start a graceful shutdown: no new streams in either direction.
    pub fn send_goaway<H: H2ConnectionHandler>(
        &mut self,
        error_code: u32,
        debug_data: &[u8],
        handler: &mut H,
    ) -> io::Result<()> {
        self.check_open()?;
        self.writer
            .write_goaway(self.last_peer_stream_id, error_code, debug_data)?;
        self.flush(handler);
        self.going_away = true;
        Ok(())
    }

    /// Grant the peer `increment` more bytes on a stream (or the connection,
    /// for stream 0).
    pub fn send_window_update<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        increment: u32,
        handler: &mut H,
    ) -> io::Result<()> {
        self.check_open()?;
        if stream_id == 0 {
            let updated = i64::from(self.recv_window) + i64::from(increment);
            if updated > i64::from(MAX_WINDOW_SIZE) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "connection receive window overflow",
                ));
            }
            self.writer.write_window_update(0, increment)?;
            self.recv_window = updated as i32;
        } else {
            let stream = self.streams.get_mut(&stream_id).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "unknown stream")
            })?;
            if stream.update_recv_window(i64::from(increment)).is_err() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "stream receive window overflow",
                ));
            }
            self.writer.write_window_update(stream_id, increment)?;
        }
        self.flush(handler);
        Ok(())
    }

    /// Send a header list on a stream, opening it if we may. The block is
    /// HPACK-encoded as one unit and segmented to the peer's MAX_FRAME_SIZE.
    pub fn send_headers<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        headers: &[Header],
        end_stream: bool,
        priority: Option<&Priority>,
        padding: Option<u8>,
        handler: &mut H,
    ) -> io::Result<()> {
        self.check_open()?;
        if stream_id == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "HEADERS stream_id must be non-zero",
            ));
        }
        if !self.streams.contains_key(&stream_id) {
            self.open_local_stream(stream_id)?;
        }
        match self.streams.get(&stream_id).unwrap().state() {
            StreamState::Closed => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "stream is closed",
                ));
            }
            StreamState::HalfClosedLocal => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "local end of the stream already closed",
                ));
            }
            StreamState::ReservedRemote => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "the peer owns the reserved stream",
                ));
            }
            _ => {}
        }

        let block = self.encoder.encode(headers);
        self.writer.write_header_block(
            stream_id,
            &block,
            end_stream,
            priority,
            padding,
            self.remote_settings.max_frame_size as usize,
        )?;
        self.flush(handler);

        let stream = self.streams.get_mut(&stream_id).unwrap();
        match stream.state() {
            StreamState::Idle => stream.open(),
            StreamState::ReservedLocal => stream.send_push_response(),
            _ => {}
        }
        if end_stream {
            stream.send_end_stream();
        }
        Ok(())
    }

    /// Send DATA, segmenting to the peer's MAX_FRAME_SIZE and stopping at
    /// whichever flow-control window runs out first.
    pub fn send_data<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        data: &[u8],
        end_stream: bool,
        handler: &mut H,
    ) -> io::Result<SendOutcome> {
        self.check_open()?;
        let stream = self.streams.get(&stream_id).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "unknown stream")
        })?;
        if !stream.can_send_data() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stream is not writable",
            ));
        }

        // An empty DATA with END_STREAM goes out even at zero window.
        if data.is_empty() {
            if end_stream {
                self.writer.write_data(stream_id, &[], true)?;
                self.flush(handler);
                self.streams.get_mut(&stream_id).unwrap().send_end_stream();
            }
            return Ok(SendOutcome::Complete);
        }

        let max_frame = self.remote_settings.max_frame_size as usize;
        let mut consumed = 0usize;
        while consumed < data.len() {
            let stream_window = self.streams[&stream_id].send_window.max(0) as usize;
            let conn_window = self.send_window.max(0) as usize;
            let chunk_len = (data.len() - consumed)
                .min(max_frame)
                .min(stream_window)
                .min(conn_window);
            if chunk_len == 0 {
                trace!(stream_id, consumed, "send_data blocked by flow control");
                return Ok(SendOutcome::Blocked { consumed });
            }
            let chunk = &data[consumed..consumed + chunk_len];
            consumed += chunk_len;
            let last = consumed == data.len();
            self.writer.write_data(stream_id, chunk, end_stream && last)?;
            self.flush(handler);
            let stream = self.streams.get_mut(&stream_id).unwrap();
            stream.send_window -= chunk_len as i32;
            self.send_window -= chunk_len as i32;
        }
        if end_stream {
            self.streams.get_mut(&stream_id).unwrap().send_end_stream();
        }
        Ok(SendOutcome::Complete)
    }

    /// Server side: promise a pushed response on `promised_stream_id`.
    pub fn send_push_promise<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        headers: &[Header],
        padding: Option<u8>,
        handler: &mut H,
    ) -> io::Result<()> {
        self.check_open()?;
        if !self.is_server {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only the server sends PUSH_PROMISE",
            ));
        }
        if !self.remote_settings.enable_push {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "peer disabled push",
            ));
        }
        let parent = self.streams.get(&stream_id).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "unknown parent stream")
        })?;
        if !matches!(
            parent.state(),
            StreamState::Open | StreamState::HalfClosedRemote
        ) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "parent stream cannot carry a promise",
            ));
        }
        if promised_stream_id % 2 != 0
            || promised_stream_id < self.next_local_stream_id
            || self.streams.contains_key(&promised_stream_id)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "promised stream ID is not an unused even ID",
            ));
        }

        let block = self.encoder.encode(headers);
        self.writer.write_push_promise_block(
            stream_id,
            promised_stream_id,
            &block,
            padding,
            self.remote_settings.max_frame_size as usize,
        )?;
        self.flush(handler);

        self.next_local_stream_id = promised_stream_id + 2;
        let mut promised = Stream::new(
            promised_stream_id,
            self.remote_settings.initial_window_size as i32,
            self.local_settings.initial_window_size as i32,
        );
        promised.reserve_local();
        self.streams.insert(promised_stream_id, promised);
        Ok(())
    }

    pub fn send_priority<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        priority: &Priority,
        handler: &mut H,
    ) -> io::Result<()> {
        self.check_open()?;
        self.writer.write_priority(stream_id, priority)?;
        self.flush(handler);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection closed after a protocol error",
            ));
        }
        Ok(())
    }

    /// Stream IDs of our parity that we never opened, or of peer parity that
    /// the peer never opened, are idle.
    fn is_idle_stream(&self, stream_id: u32) -> bool {
        if self.is_peer_initiated(stream_id) {
            stream_id > self.last_peer_stream_id
        } else {
            stream_id >= self.next_local_stream_id
        }
    }

    fn is_peer_initiated(&self, stream_id: u32) -> bool {
        let odd = stream_id % 2 == 1;
        if self.is_server {
            odd
        } else {
            !odd
        }
    }

    /// Gatekeeping for a new peer-initiated stream: monotonic IDs and the
    /// advertised concurrency limit.
    fn admit_peer_stream(&mut self, stream_id: u32) -> Result<(), FrameError> {
        if stream_id <= self.last_peer_stream_id {
            return Err(FrameError::connection(
                ERROR_PROTOCOL_ERROR,
                "peer stream ID did not increase",
            ));
        }
        if let Some(max) = self.local_settings.max_concurrent_streams {
            let active = self.streams.values().filter(|s| s.is_active()).count();
            if active as u32 >= max {
                return Err(FrameError::stream(
                    stream_id,
                    ERROR_REFUSED_STREAM,
                    "concurrent stream limit reached",
                ));
            }
        }
        self.last_peer_stream_id = stream_id;
        self.streams.insert(
            stream_id,
            Stream::new(
                stream_id,
                self.remote_settings.initial_window_size as i32,
                self.local_settings.initial_window_size as i32,
            ),
        );
        Ok(())
    }

    /// Create a locally-initiated stream for send_headers.
    fn open_local_stream(&mut self, stream_id: u32) -> io::Result<()> {
        if self.going_away {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection is going away",
            ));
        }
        if self.is_peer_initiated(stream_id) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot open a peer-parity stream",
            ));
        }
        if stream_id < self.next_local_stream_id {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stream ID already used",
            ));
        }
        if stream_id > MAX_STREAM_ID {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stream IDs exhausted",
            ));
        }
        self.next_local_stream_id = stream_id + 2;
        self.streams.insert(
            stream_id,
            Stream::new(
                stream_id,
                self.remote_settings.initial_window_size as i32,
                self.local_settings.initial_window_size as i32,
            ),
        );
        Ok(())
    }

    fn decode_block(&mut self, block: Bytes) -> Result<Vec<Header>, FrameError> {
        self.decoder
            .decode(&block)
            .map_err(|e| FrameError::connection(ERROR_COMPRESSION_ERROR, e.to_string()))
    }

    /// Accumulated header-block fragments are bounded by the
    /// MAX_HEADER_LIST_SIZE we advertised.
    fn check_fragment_budget(&self, total: usize) -> Result<(), FrameError> {
        if let Some(limit) = self.local_settings.max_header_list_size {
            if total as u64 > u64::from(limit) {
                return Err(FrameError::connection(
                    ERROR_COMPRESSION_ERROR,
                    "header block exceeds MAX_HEADER_LIST_SIZE",
                ));
            }
        }
        Ok(())
    }

    /// Emit RST_STREAM and close the stream locally.
    fn reset_stream_internal<H: H2ConnectionHandler>(
        &mut self,
        stream_id: u32,
        error_code: u32,
        handler: &mut H,
    ) {
        if stream_id == 0 {
            return;
        }
        let _ = self.writer.write_rst_stream(stream_id, error_code);
        self.flush(handler);
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.reset();
        }
        self.streams.retain(|_, stream| !stream.is_closed());
    }

    /// Emit GOAWAY, seal the connection, and build the error for the caller.
    fn connection_error<H: H2ConnectionHandler>(
        &mut self,
        code: u32,
        message: &str,
        handler: &mut H,
    ) -> io::Error {
        warn!(code = error_to_string(code), %message, "connection error");
        let _ = self
            .writer
            .write_goaway(self.last_peer_stream_id, code, message.as_bytes());
        self.flush(handler);
        self.going_away = true;
        self.closed = true;
        io::Error::new(io::ErrorKind::InvalidData, message.to_string())
    }

    fn flush<H: H2ConnectionHandler>(&mut self, handler: &mut H) {
        if !self.writer.is_empty() {
            handler.send_bytes(self.writer.take_buffer());
        }
    }
}

/*
 * stream.rs
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

//! Per-stream state (RFC 7540 5.1) and flow-control windows (RFC 7540 6.9).
//!
//! Windows are signed: a SETTINGS_INITIAL_WINDOW_SIZE reduction can drive a
//! window negative, and the endpoint must simply stop sending until updates
//! bring it back up. No window may ever exceed 2^31 - 1.

use super::frame::MAX_WINDOW_SIZE;

/// RFC 7540 5.1 stream states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// One HTTP/2 stream: identifier, lifecycle state, and the two flow-control
/// windows. `send_window` limits what we may send; `recv_window` limits what
/// we have allowed the peer to send.
#[derive(Debug)]
pub struct Stream {
    pub id: u32,
    state: StreamState,
    pub send_window: i32,
    pub recv_window: i32,
    /// A complete header block has arrived; the next one is trailers.
    pub(crate) headers_received: bool,
}

impl Stream {
    pub fn new(id: u32, send_window: i32, recv_window: i32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window,
            recv_window,
            headers_received: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// HEADERS sent or received on an idle (or locally reserved) stream.
    pub fn open(&mut self) {
        if matches!(self.state, StreamState::Idle | StreamState::ReservedLocal) {
            self.state = StreamState::Open;
        }
    }

    /// PUSH_PROMISE sent for this (promised) stream.
    pub fn reserve_local(&mut self) {
        if self.state == StreamState::Idle {
            self.state = StreamState::ReservedLocal;
        }
    }

    /// PUSH_PROMISE received promising this stream.
    pub fn reserve_remote(&mut self) {
        if self.state == StreamState::Idle {
            self.state = StreamState::ReservedRemote;
        }
    }

    /// We sent END_STREAM (on HEADERS or DATA).
    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            // END_STREAM on the HEADERS answering our PUSH_PROMISE.
            StreamState::ReservedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// The peer sent END_STREAM.
    pub fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            StreamState::ReservedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// RST_STREAM sent or received, from any state.
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
    }

    /// HEADERS received while reserved by the peer (push response begins).
    pub fn recv_push_response(&mut self) {
        if self.state == StreamState::ReservedRemote {
            self.state = StreamState::HalfClosedLocal;
        }
    }

    /// HEADERS sent on a stream we promised (push response begins).
    pub fn send_push_response(&mut self) {
        if self.state == StreamState::ReservedLocal {
            self.state = StreamState::HalfClosedRemote;
        }
    }

    /// Whether we may emit DATA.
    pub fn can_send_data(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Whether the peer may still deliver DATA.
    pub fn can_recv_data(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Whether the stream counts against SETTINGS_MAX_CONCURRENT_STREAMS.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
        )
    }

    /// Whether an INITIAL_WINDOW_SIZE change applies to this stream
    /// (every non-idle, non-closed stream).
    pub fn has_window(&self) -> bool {
        !matches!(self.state, StreamState::Idle | StreamState::Closed)
    }

    /// Adjust the send window (WINDOW_UPDATE received, or a
    /// SETTINGS_INITIAL_WINDOW_SIZE delta, which may be negative). Fails when
    /// the window would pass 2^31 - 1.
    pub fn update_send_window(&mut self, delta: i64) -> Result<(), ()> {
        let updated = i64::from(self.send_window) + delta;
        if updated > i64::from(MAX_WINDOW_SIZE) {
            return Err(());
        }
        self.send_window = updated as i32;
        Ok(())
    }

    /// Adjust the receive window (WINDOW_UPDATE sent by us, or a local
    /// INITIAL_WINDOW_SIZE change).
    pub fn update_recv_window(&mut self, delta: i64) -> Result<(), ()> {
        let updated = i64::from(self.recv_window) + delta;
        if updated > i64::from(MAX_WINDOW_SIZE) {
            return Err(());
        }
        self.recv_window = updated as i32;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_lifecycle() {
        let mut s = Stream::new(1, 65535, 65535);
        assert_eq!(s.state(), StreamState::Idle);
        s.open();
        assert_eq!(s.state(), StreamState::Open);
        s.send_end_stream();
        assert_eq!(s.state(), StreamState::HalfClosedLocal);
        s.recv_end_stream();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn response_first_lifecycle() {
        let mut s = Stream::new(1, 65535, 65535);
        s.open();
        s.recv_end_stream();
        assert_eq!(s.state(), StreamState::HalfClosedRemote);
        assert!(s.can_send_data());
        assert!(!s.can_recv_data());
        s.send_end_stream();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn push_lifecycle_promised_side() {
        // Server: PUSH_PROMISE sent, then response HEADERS, then END_STREAM.
        let mut s = Stream::new(2, 65535, 65535);
        s.reserve_local();
        assert_eq!(s.state(), StreamState::ReservedLocal);
        s.send_push_response();
        assert_eq!(s.state(), StreamState::HalfClosedRemote);
        s.send_end_stream();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn push_lifecycle_receiving_side() {
        // Client: PUSH_PROMISE received, then the pushed response arrives.
        let mut s = Stream::new(2, 65535, 65535);
        s.reserve_remote();
        assert_eq!(s.state(), StreamState::ReservedRemote);
        s.recv_push_response();
        assert_eq!(s.state(), StreamState::HalfClosedLocal);
        assert!(s.can_recv_data());
        s.recv_end_stream();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn reset_closes_from_any_state() {
        let setups: [fn(&mut Stream); 5] = [
            |s| s.open(),
            |s| s.reserve_local(),
            |s| s.reserve_remote(),
            |s| {
                s.open();
                s.send_end_stream();
            },
            |s| {
                s.open();
                s.recv_end_stream();
            },
        ];
        for setup in setups {
            let mut s = Stream::new(5, 65535, 65535);
            setup(&mut s);
            s.reset();
            assert_eq!(s.state(), StreamState::Closed);
        }
    }

    #[test]
    fn window_overflow_is_rejected() {
        let mut s = Stream::new(1, 65535, 65535);
        assert!(s.update_send_window(i64::from(MAX_WINDOW_SIZE)).is_err());
        assert_eq!(s.send_window, 65535);
        s.update_send_window(i64::from(MAX_WINDOW_SIZE) - 65535).unwrap();
        assert_eq!(s.send_window, MAX_WINDOW_SIZE as i32);
    }

    #[test]
    fn window_may_go_negative() {
        let mut s = Stream::new(1, 100, 100);
        s.update_send_window(-200).unwrap();
        assert_eq!(s.send_window, -100);
        s.update_send_window(150).unwrap();
        assert_eq!(s.send_window, 50);
    }
}

/*
 * lib.rs
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

//! Telaio: a sans-io HTTP/2 endpoint.
//!
//! The crate implements RFC 7540 framing and multiplexing and RFC 7541 HPACK
//! header compression, with no transport of its own: the embedding I/O layer
//! (TLS, TCP, a test harness) pushes received bytes into
//! [`h2::H2Connection::process_incoming_data`] and forwards whatever the
//! connection hands to its byte sink. Everything a connection emits is
//! produced synchronously inside the call that caused it.
//!
//! ```no_run
//! use bytes::Bytes;
//! use telaio::h2::{H2Connection, H2ConnectionHandler};
//! use telaio::hpack::Header;
//!
//! struct Transport {
//!     outbound: Vec<Bytes>,
//! }
//!
//! impl H2ConnectionHandler for Transport {
//!     fn send_bytes(&mut self, bytes: Bytes) {
//!         self.outbound.push(bytes);
//!     }
//! }
//!
//! let mut transport = Transport { outbound: Vec::new() };
//! let mut conn = H2Connection::client();
//! conn.send_preface(&mut transport).unwrap();
//! conn.send_settings(&[], &mut transport).unwrap();
//! conn.send_headers(
//!     1,
//!     &[
//!         Header::new(":method", "GET"),
//!         Header::new(":scheme", "https"),
//!         Header::new(":path", "/"),
//!         Header::new(":authority", "example.com"),
//!     ],
//!     true,
//!     None,
//!     None,
//!     &mut transport,
//! )
//! .unwrap();
//! // write transport.outbound to the socket, feed reads back in with
//! // conn.process_incoming_data(...)
//! ```

pub mod h2;
pub mod hpack;

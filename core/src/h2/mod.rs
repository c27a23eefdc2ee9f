/*
 * mod.rs
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

//! HTTP/2 (RFC 7540): frame codec, stream state machine, connection
//! orchestration.

pub mod connection;
pub mod frame;
pub mod parser;
pub mod settings;
pub mod stream;
pub mod writer;

pub use connection::{H2Connection, H2ConnectionHandler, SendOutcome};
pub use frame::{error_to_string, Frame, FrameError, Priority};
pub use parser::H2Parser;
pub use settings::Settings;
pub use stream::{Stream, StreamState};
pub use writer::H2Writer;

/// HTTP/2 connection preface (PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

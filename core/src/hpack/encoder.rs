/*
 * encoder.rs
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

//! HPACK encoder (RFC 7541). Emits a header block for a header list,
//! maintaining the outbound dynamic table in lockstep with the peer's
//! decoder.
//!
//! Representation policy, per field: an exact name+value table match becomes
//! an indexed field (static table preferred); sensitive fields become
//! never-indexed literals; everything else becomes a literal with incremental
//! indexing when the entry fits our table, or without indexing when it does
//! not. Strings use Huffman coding only when strictly shorter than the raw
//! octets, so output is deterministic.

use super::huffman;
use super::static_table;
use super::table::DynamicTable;
use super::{Header, DEFAULT_HEADER_TABLE_SIZE};

/// HPACK header-block encoder. One per connection, outbound direction.
pub struct Encoder {
    table: DynamicTable,
    /// Capacity we want for our table (local configuration).
    own_max: usize,
    /// Capacity the peer's SETTINGS_HEADER_TABLE_SIZE allows.
    peer_max: usize,
    /// Capacity change to signal at the front of the next block.
    pending_size_update: Option<usize>,
}

impl Encoder {
    pub fn new(header_table_size: usize) -> Self {
        let capacity = header_table_size.min(DEFAULT_HEADER_TABLE_SIZE);
        Self {
            table: DynamicTable::new(capacity),
            own_max: header_table_size,
            peer_max: DEFAULT_HEADER_TABLE_SIZE,
            pending_size_update: None,
        }
    }

    /// Change our configured table size. A reduction takes effect (and is
    /// signaled) immediately; an increase only raises the capacity as far as
    /// the size the peer has acknowledged via SETTINGS.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.own_max = size;
        self.apply_capacity();
    }

    /// Record the peer's SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_peer_max_table_size(&mut self, size: usize) {
        self.peer_max = size;
        self.apply_capacity();
    }

    fn apply_capacity(&mut self) {
        let target = self.own_max.min(self.peer_max);
        if target != self.table.capacity() {
            self.table.set_capacity(target);
            self.pending_size_update = Some(target);
        }
    }

    /// Current sum of dynamic table entry sizes.
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Number of dynamic table entries.
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// Entry by 1-based dynamic index (1 = newest), for inspection.
    pub fn table_entry(&self, index: usize) -> Option<(&[u8], &[u8])> {
        self.table
            .get(index)
            .map(|h| (h.name.as_slice(), h.value.as_slice()))
    }

    /// Encode a header list into one header block.
    pub fn encode(&mut self, headers: &[Header]) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(size) = self.pending_size_update.take() {
            encode_integer(&mut out, 0x20, 5, size as u64);
        }
        for header in headers {
            self.encode_field(&mut out, header);
        }
        out
    }

    fn encode_field(&mut self, out: &mut Vec<u8>, header: &Header) {
        // Exact match: static table first, then dynamic.
        let static_match = static_table::find(&header.name, &header.value);
        if let Some((index, true)) = static_match {
            encode_integer(out, 0x80, 7, index as u64);
            return;
        }
        if let Some((index, true)) = self.table.find(&header.name, &header.value) {
            encode_integer(
                out,
                0x80,
                7,
                (static_table::STATIC_TABLE_ENTRIES + index) as u64,
            );
            return;
        }

        // Name-only index, lowest absolute index preferred.
        let name_index = match static_match {
            Some((index, _)) => index,
            None => self
                .table
                .find(&header.name, &header.value)
                .map(|(index, _)| static_table::STATIC_TABLE_ENTRIES + index)
                .unwrap_or(0),
        };

        if header.sensitive {
            // Literal never indexed: 0001xxxx
            encode_integer(out, 0x10, 4, name_index as u64);
            if name_index == 0 {
                encode_string(out, &header.name);
            }
            encode_string(out, &header.value);
        } else if header.size() <= self.table.capacity() {
            // Literal with incremental indexing: 01xxxxxx
            encode_integer(out, 0x40, 6, name_index as u64);
            if name_index == 0 {
                encode_string(out, &header.name);
            }
            encode_string(out, &header.value);
            self.table.insert(header.name.clone(), header.value.clone());
        } else {
            // Literal without indexing: 0000xxxx
            encode_integer(out, 0x00, 4, name_index as u64);
            if name_index == 0 {
                encode_string(out, &header.name);
            }
            encode_string(out, &header.value);
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_TABLE_SIZE)
    }
}

/// Prefix integer encoding (RFC 7541 5.1). `prefix` carries the pattern bits
/// above the `prefix_bits`-bit value field.
pub(crate) fn encode_integer(out: &mut Vec<u8>, prefix: u8, prefix_bits: u8, mut value: u64) {
    let max_prefix = (1u64 << prefix_bits) - 1;
    if value < max_prefix {
        out.push(prefix | value as u8);
        return;
    }
    out.push(prefix | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        out.push(0x80 | (value % 128) as u8);
        value /= 128;
    }
    out.push(value as u8);
}

/// String literal encoding (RFC 7541 5.2). Huffman only when strictly
/// shorter.
pub(crate) fn encode_string(out: &mut Vec<u8>, raw: &[u8]) {
    let huffman_len = huffman::encoded_len(raw);
    if huffman_len < raw.len() {
        encode_integer(out, 0x80, 7, huffman_len as u64);
        out.extend_from_slice(&huffman::encode(raw));
    } else {
        encode_integer(out, 0x00, 7, raw.len() as u64);
        out.extend_from_slice(raw);
    }
}

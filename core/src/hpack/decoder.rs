/*
 * decoder.rs
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

//! HPACK decoder (RFC 7541). Decodes a complete header block into a header
//! list, maintaining the inbound dynamic table. A block is consumed
//! atomically: any failure poisons the whole block, and the connection
//! layer treats it as a COMPRESSION_ERROR.

use bytes::Buf;
use std::io;

use super::huffman;
use super::static_table;
use super::table::DynamicTable;
use super::{Header, DEFAULT_HEADER_TABLE_SIZE};

/// HPACK header-block decoder. One per connection, inbound direction.
pub struct Decoder {
    table: DynamicTable,
    /// Ceiling for Table Size Update instructions: the HEADER_TABLE_SIZE we
    /// most recently advertised in SETTINGS.
    max_size_limit: usize,
}

impl Decoder {
    pub fn new(header_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(header_table_size),
            max_size_limit: header_table_size,
        }
    }

    /// Apply a change to our advertised SETTINGS_HEADER_TABLE_SIZE. Lowering
    /// evicts immediately; the peer must follow with a Table Size Update at
    /// or below the new limit.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.max_size_limit = size;
        if size < self.table.capacity() {
            self.table.set_capacity(size);
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

    /// Decode one complete header block.
    pub fn decode(&mut self, block: &[u8]) -> io::Result<Vec<Header>> {
        let mut buf: &[u8] = block;
        let mut headers = Vec::new();

        while buf.has_remaining() {
            let opcode = buf.get_u8();

            if opcode & 0x80 != 0 {
                // Indexed header field (7-bit index)
                let index = decode_integer(&mut buf, opcode, 7)?;
                let (name, value) = self.lookup(index)?;
                headers.push(Header::new(name, value));
            } else if opcode & 0x40 != 0 {
                // Literal with incremental indexing (6-bit name index)
                let (name, value) = self.literal(&mut buf, opcode, 6)?;
                self.table.insert(name.clone(), value.clone());
                headers.push(Header::new(name, value));
            } else if opcode & 0x20 != 0 {
                // Dynamic table size update (5-bit)
                if !headers.is_empty() {
                    return Err(invalid(
                        "HPACK table size update after the first header field",
                    ));
                }
                let size = decode_integer(&mut buf, opcode, 5)? as usize;
                if size > self.max_size_limit {
                    return Err(invalid("HPACK table size update exceeds SETTINGS limit"));
                }
                self.table.set_capacity(size);
            } else if opcode & 0x10 != 0 {
                // Literal never indexed (4-bit name index)
                let (name, value) = self.literal(&mut buf, opcode, 4)?;
                headers.push(Header::sensitive(name, value));
            } else {
                // Literal without indexing (4-bit name index)
                let (name, value) = self.literal(&mut buf, opcode, 4)?;
                headers.push(Header::new(name, value));
            }
        }
        Ok(headers)
    }

    fn lookup(&self, index: u64) -> io::Result<(Vec<u8>, Vec<u8>)> {
        if index == 0 {
            return Err(invalid("HPACK index 0"));
        }
        if index <= static_table::STATIC_TABLE_ENTRIES as u64 {
            let (name, value) = static_table::get(index as usize).unwrap();
            return Ok((name.as_bytes().to_vec(), value.as_bytes().to_vec()));
        }
        let dynamic_index = index - static_table::STATIC_TABLE_ENTRIES as u64;
        match self.table.get(dynamic_index as usize) {
            Some(h) => Ok((h.name.clone(), h.value.clone())),
            None => Err(invalid("HPACK index beyond table bounds")),
        }
    }

    fn literal<B: Buf>(
        &self,
        buf: &mut B,
        opcode: u8,
        prefix_bits: u8,
    ) -> io::Result<(Vec<u8>, Vec<u8>)> {
        let index = decode_integer(buf, opcode, prefix_bits)?;
        let name = if index == 0 {
            decode_string(buf)?
        } else {
            self.lookup(index)?.0
        };
        let value = decode_string(buf)?;
        Ok((name, value))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_TABLE_SIZE)
    }
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn truncated(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg)
}

/// Prefix integer decoding (RFC 7541 5.1). `opcode` is the already-consumed
/// first byte whose low `prefix_bits` carry the prefix value.
pub(crate) fn decode_integer<B: Buf>(buf: &mut B, opcode: u8, prefix_bits: u8) -> io::Result<u64> {
    let mask = (1u64 << prefix_bits) - 1;
    let mut value = u64::from(opcode) & mask;
    if value < mask {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(truncated("HPACK integer truncated"));
        }
        let byte = buf.get_u8();
        if shift > 63 {
            return Err(invalid("HPACK integer overflow"));
        }
        let add = u64::from(byte & 0x7f);
        if shift != 0 && add >> (64 - shift) != 0 {
            return Err(invalid("HPACK integer overflow"));
        }
        value = value
            .checked_add(add << shift)
            .ok_or_else(|| invalid("HPACK integer overflow"))?;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// String literal decoding (RFC 7541 5.2): H bit, 7-bit prefix length, bytes.
pub(crate) fn decode_string<B: Buf>(buf: &mut B) -> io::Result<Vec<u8>> {
    if !buf.has_remaining() {
        return Err(truncated("HPACK string truncated"));
    }
    let first = buf.get_u8();
    let huffman_coded = first & 0x80 != 0;
    let len = decode_integer(buf, first, 7)? as usize;
    if buf.remaining() < len {
        return Err(truncated("HPACK string shorter than its length"));
    }
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    if huffman_coded {
        huffman::decode(&raw)
    } else {
        Ok(raw)
    }
}

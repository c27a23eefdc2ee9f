/*
 * static_table.rs
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

//! HPACK static table (RFC 7541 Appendix A).

/// (name, value); value is None for header names that have no default value.
/// Index 0 is unused: HPACK indices are 1-based.
pub const STATIC_TABLE: &[(&str, Option<&str>)] = &[
    ("", None), // index 0 unused
    (":authority", None),
    (":method", Some("GET")),
    (":method", Some("POST")),
    (":path", Some("/")),
    (":path", Some("/index.html")),
    (":scheme", Some("http")),
    (":scheme", Some("https")),
    (":status", Some("200")),
    (":status", Some("204")),
    (":status", Some("206")),
    (":status", Some("304")),
    (":status", Some("400")),
    (":status", Some("404")),
    (":status", Some("500")),
    ("accept-charset", None),
    ("accept-encoding", Some("gzip, deflate")),
    ("accept-language", None),
    ("accept-ranges", None),
    ("accept", None),
    ("access-control-allow-origin", None),
    ("age", None),
    ("allow", None),
    ("authorization", None),
    ("cache-control", None),
    ("content-disposition", None),
    ("content-encoding", None),
    ("content-language", None),
    ("content-length", None),
    ("content-location", None),
    ("content-range", None),
    ("content-type", None),
    ("cookie", None),
    ("date", None),
    ("etag", None),
    ("expect", None),
    ("expires", None),
    ("from", None),
    ("host", None),
    ("if-match", None),
    ("if-modified-since", None),
    ("if-none-match", None),
    ("if-range", None),
    ("if-unmodified-since", None),
    ("last-modified", None),
    ("link", None),
    ("location", None),
    ("max-forwards", None),
    ("proxy-authenticate", None),
    ("proxy-authorization", None),
    ("range", None),
    ("referer", None),
    ("refresh", None),
    ("retry-after", None),
    ("server", None),
    ("set-cookie", None),
    ("strict-transport-security", None),
    ("transfer-encoding", None),
    ("user-agent", None),
    ("vary", None),
    ("via", None),
    ("www-authenticate", None),
];

/// Number of indexable entries (61). `STATIC_TABLE` itself has one extra slot
/// for the unused index 0.
pub const STATIC_TABLE_ENTRIES: usize = STATIC_TABLE.len() - 1;

/// Look up an entry by its 1-based HPACK index.
pub fn get(index: usize) -> Option<(&'static str, &'static str)> {
    if index == 0 || index > STATIC_TABLE_ENTRIES {
        return None;
    }
    let (name, value) = STATIC_TABLE[index];
    Some((name, value.unwrap_or("")))
}

/// Reverse lookup. Returns the lowest index whose name matches, and whether
/// that or a later entry also matched the value. When several entries share a
/// name (:method, :status ...) a full match on any of them wins over a bare
/// name match on the first.
pub fn find(name: &[u8], value: &[u8]) -> Option<(usize, bool)> {
    let mut name_match = None;
    for (index, (n, v)) in STATIC_TABLE.iter().enumerate().skip(1) {
        if n.as_bytes() != name {
            continue;
        }
        if v.unwrap_or("").as_bytes() == value {
            return Some((index, true));
        }
        if name_match.is_none() {
            name_match = Some((index, false));
        }
    }
    name_match
}

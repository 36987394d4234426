//! HPACK header tables (RFC 7541 Section 2.3).
//!
//! Index space: 1..=61 is the static table, 62.. addresses the dynamic table
//! with the most recently inserted entry at 62.
//!
//! Encoder and decoder each own a separate [`HeaderTable`]. Both start empty
//! and apply the same insertions and size changes in the same order, so their
//! contents stay identical without any shared state.

use std::collections::VecDeque;

use crate::error::HpackError;

use super::H2Header;

/// Per-entry overhead added to name and value lengths (RFC 7541 Section 4.1).
pub const ENTRY_OVERHEAD: usize = 32;

/// Default SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_MAX_SIZE: usize = 4096;

/// Static table (RFC 7541 Appendix A). Entries without a value use "".
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

pub const STATIC_LEN: usize = STATIC_TABLE.len();

/// Size an entry counts against the dynamic table limit.
pub fn entry_size(name: &str, value: &str) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

/// Static table plus one direction's dynamic table.
#[derive(Debug, Clone)]
pub struct HeaderTable {
    /// Front is the newest entry.
    dynamic: VecDeque<H2Header>,
    size: usize,
    max_size: usize,
}

impl Default for HeaderTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl HeaderTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            dynamic: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Resolve a 1-based index to its (name, value).
    pub fn lookup(&self, index: usize) -> Result<(&str, &str), HpackError> {
        match index {
            0 => Err(HpackError::InvalidIndex(0)),
            i if i <= STATIC_LEN => Ok(STATIC_TABLE[i - 1]),
            i => self
                .dynamic
                .get(i - STATIC_LEN - 1)
                .map(|h| (h.name.as_str(), h.value.as_str()))
                .ok_or(HpackError::InvalidIndex(i)),
        }
    }

    /// Lowest index whose name and value both match.
    pub fn find(&self, name: &str, value: &str) -> Option<usize> {
        STATIC_TABLE
            .iter()
            .position(|&(n, v)| n == name && v == value)
            .or_else(|| {
                self.dynamic
                    .iter()
                    .position(|h| h.name == name && h.value == value)
                    .map(|i| i + STATIC_LEN)
            })
            .map(|i| i + 1)
    }

    /// Lowest index whose name matches.
    pub fn find_name(&self, name: &str) -> Option<usize> {
        STATIC_TABLE
            .iter()
            .position(|&(n, _)| n == name)
            .or_else(|| {
                self.dynamic
                    .iter()
                    .position(|h| h.name == name)
                    .map(|i| i + STATIC_LEN)
            })
            .map(|i| i + 1)
    }

    /// Add an entry as the newest, evicting the oldest entries until it fits.
    /// An entry larger than the whole table empties it and is not stored.
    pub fn insert(&mut self, entry: H2Header) {
        let needed = entry_size(&entry.name, &entry.value);
        if needed > self.max_size {
            self.dynamic.clear();
            self.size = 0;
            return;
        }
        self.evict_to(self.max_size - needed);
        self.size += needed;
        self.dynamic.push_front(entry);
    }

    /// Change the maximum size, evicting as needed.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    fn evict_to(&mut self, limit: usize) {
        while self.size > limit {
            match self.dynamic.pop_back() {
                Some(old) => self.size -= entry_size(&old.name, &old.value),
                None => {
                    self.size = 0;
                    break;
                }
            }
        }
    }

    /// Number of dynamic entries.
    pub fn len(&self) -> usize {
        self.dynamic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dynamic.is_empty()
    }

    /// Current dynamic table size in octets, overhead included.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Dynamic entries, newest first.
    pub fn dynamic_entries(&self) -> impl Iterator<Item = &H2Header> {
        self.dynamic.iter()
    }
}

//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! [`HpackEncoder`] and [`HpackDecoder`] each own one [`HeaderTable`]; a
//! connection has one of each, one per direction.

pub mod huffman;
pub mod integer;
pub mod table;

use crate::error::HpackError;

pub use table::HeaderTable;

/// A decoded HTTP/2 header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct H2Header {
    pub name: String,
    pub value: String,
}

impl H2Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// How a literal header field interacts with the dynamic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Indexing {
    /// Literal with incremental indexing (Section 6.2.1).
    #[default]
    Incremental,
    /// Literal without indexing (Section 6.2.2).
    Without,
    /// Literal never indexed (Section 6.2.3), for sensitive values.
    Never,
}

// Representation prefixes (RFC 7541 Section 6).
const INDEXED: u8 = 0x80;
const LITERAL_INCREMENTAL: u8 = 0x40;
const SIZE_UPDATE: u8 = 0x20;
const LITERAL_NEVER_INDEXED: u8 = 0x10;
const LITERAL_WITHOUT_INDEXING: u8 = 0x00;

/// HPACK encoder for HTTP/2 header blocks.
#[derive(Debug, Default)]
pub struct HpackEncoder {
    table: HeaderTable,
    huffman: bool,
    /// Smallest size requested since the last block, and the latest one.
    pending_resize: Option<(usize, usize)>,
}

impl HpackEncoder {
    /// Encoder emitting raw (non-Huffman) literals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder whose literals are Huffman-coded when `huffman` is set.
    pub fn with_huffman(huffman: bool) -> Self {
        Self {
            huffman,
            ..Self::default()
        }
    }

    pub fn huffman(&self) -> bool {
        self.huffman
    }

    pub fn table(&self) -> &HeaderTable {
        &self.table
    }

    /// Adopt a new dynamic table size (normally the peer's
    /// SETTINGS_HEADER_TABLE_SIZE). The change is signalled at the start of
    /// the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.pending_resize = Some(match self.pending_resize {
            Some((min, _)) => (min.min(size), size),
            None => (size, size),
        });
    }

    fn flush_resize(&mut self, out: &mut Vec<u8>) {
        if let Some((min, last)) = self.pending_resize.take() {
            if min < last {
                integer::put_int(min, 5, SIZE_UPDATE, out);
                self.table.set_max_size(min);
            }
            integer::put_int(last, 5, SIZE_UPDATE, out);
            self.table.set_max_size(last);
        }
    }

    /// Encode one header with incremental indexing: an indexed field when the
    /// pair is known, otherwise a literal (indexed name if possible) that is
    /// added to the dynamic table.
    pub fn encode_header(&mut self, name: &str, value: &str, out: &mut Vec<u8>) {
        self.flush_resize(out);
        self.encode_field(name, value, Indexing::Incremental, out);
    }

    /// Encode one header with an explicit indexing choice.
    pub fn encode_header_with(
        &mut self,
        name: &str,
        value: &str,
        indexing: Indexing,
        out: &mut Vec<u8>,
    ) {
        self.flush_resize(out);
        self.encode_field(name, value, indexing, out);
    }

    fn encode_field(&mut self, name: &str, value: &str, indexing: Indexing, out: &mut Vec<u8>) {
        if indexing != Indexing::Never {
            if let Some(index) = self.table.find(name, value) {
                integer::put_int(index, 7, INDEXED, out);
                return;
            }
        }

        let (flags, prefix) = match indexing {
            Indexing::Incremental => (LITERAL_INCREMENTAL, 6),
            Indexing::Without => (LITERAL_WITHOUT_INDEXING, 4),
            Indexing::Never => (LITERAL_NEVER_INDEXED, 4),
        };

        match self.table.find_name(name) {
            Some(name_index) => integer::put_int(name_index, prefix, flags, out),
            None => {
                out.push(flags);
                integer::encode_string(name.as_bytes(), self.huffman, out);
            }
        }
        integer::encode_string(value.as_bytes(), self.huffman, out);

        if indexing == Indexing::Incremental {
            self.table.insert(H2Header::new(name, value));
        }
    }

    /// Encode a header list into one header block, preserving order.
    pub fn encode_header_list(&mut self, headers: &[H2Header]) -> Vec<u8> {
        let mut out = Vec::new();
        self.flush_resize(&mut out);
        for header in headers {
            self.encode_field(&header.name, &header.value, Indexing::Incremental, &mut out);
        }
        out
    }
}

/// HPACK decoder for HTTP/2 header blocks.
#[derive(Debug)]
pub struct HpackDecoder {
    table: HeaderTable,
    /// Upper bound for size updates: our advertised SETTINGS_HEADER_TABLE_SIZE.
    max_allowed_size: usize,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self::with_max_table_size(table::DEFAULT_MAX_SIZE)
    }

    pub fn with_max_table_size(size: usize) -> Self {
        Self {
            table: HeaderTable::new(size),
            max_allowed_size: size,
        }
    }

    pub fn table(&self) -> &HeaderTable {
        &self.table
    }

    pub fn max_allowed_table_size(&self) -> usize {
        self.max_allowed_size
    }

    /// Change the limit the peer's size updates must respect.
    ///
    /// The table itself keeps its size until the peer's encoder sends a size
    /// update: blocks it wrote before seeing our SETTINGS still use the old
    /// size.
    pub fn set_max_allowed_table_size(&mut self, size: usize) {
        self.max_allowed_size = size;
    }

    /// Decode a complete header block into headers, in wire order.
    pub fn decode_header_list(&mut self, block: &[u8]) -> Result<Vec<H2Header>, HpackError> {
        let mut headers = Vec::new();
        let mut pos = 0;

        while pos < block.len() {
            let rest = &block[pos..];
            let first = rest[0];

            if first & INDEXED != 0 {
                let (index, used) = integer::decode(rest, 7)?;
                let (name, value) = self.table.lookup(index)?;
                headers.push(H2Header::new(name, value));
                pos += used;
            } else if first & LITERAL_INCREMENTAL != 0 {
                let (header, used) = self.read_literal(rest, 6)?;
                self.table.insert(header.clone());
                headers.push(header);
                pos += used;
            } else if first & SIZE_UPDATE != 0 {
                if !headers.is_empty() {
                    return Err(HpackError::LateTableSizeUpdate);
                }
                let (size, used) = integer::decode(rest, 5)?;
                if size > self.max_allowed_size {
                    return Err(HpackError::TableSizeExceeded {
                        requested: size,
                        limit: self.max_allowed_size,
                    });
                }
                self.table.set_max_size(size);
                pos += used;
            } else {
                // Never indexed (0x10) and without indexing (0x00) decode alike.
                let (header, used) = self.read_literal(rest, 4)?;
                headers.push(header);
                pos += used;
            }
        }

        Ok(headers)
    }

    fn read_literal(&self, buf: &[u8], prefix: u8) -> Result<(H2Header, usize), HpackError> {
        let (name_index, mut pos) = integer::decode(buf, prefix)?;

        let name = if name_index == 0 {
            let (raw, used) = integer::decode_string(&buf[pos..])?;
            pos += used;
            into_string(raw)?
        } else {
            self.table.lookup(name_index)?.0.to_owned()
        };

        let (raw, used) = integer::decode_string(&buf[pos..])?;
        pos += used;
        Ok((H2Header::new(name, into_string(raw)?), pos))
    }
}

fn into_string(raw: Vec<u8>) -> Result<String, HpackError> {
    String::from_utf8(raw).map_err(|_| HpackError::InvalidUtf8)
}

// ============================================================================
// Tests
// ============================================================================

// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::Cursor;

use binrw::{BinRead, binrw};
use tracing::warn;

use crate::ByteBuffer;
use crate::common::ResourceType;

#[binrw]
#[br(little)]
struct BifHeader {
    #[br(assert(&magic == b"BIFFV1  " || &magic == b"BZF V1.0"))]
    magic: [u8; 8],
    variable_count: u32,
    fixed_count: u32,
    offset_to_variable_table: u32,
}

#[binrw]
#[br(little)]
struct VariableTableEntry {
    id: u32,
    offset: u32,
    size: u32,
    res_type: u32,
}

/// One variable-resource entry of a bulk archive.
#[derive(Debug, Clone)]
pub struct BifEntry {
    pub restype: ResourceType,
    /// Payload offset inside the archive.
    pub offset: u32,
    /// Unpacked payload size.
    pub size: u32,
    /// Stored size for packed archives, derived from the offset delta to the
    /// next entry. `None` in plain archives.
    pub packed_size: Option<u32>,
}

/// A signature the base layer can hand in to unpack BZF payloads.
///
/// Compression is an external byte transform: `(packed bytes, unpacked size)
/// -> unpacked bytes`.
pub type Decompressor = dyn Fn(&[u8], usize) -> Option<ByteBuffer> + Send + Sync;

/// A BIF or BZF bulk archive. BZF stores the same tables but packs each
/// payload, with the stored size only derivable from offset deltas.
pub struct BifFile {
    packed: bool,
    entries: Vec<BifEntry>,
}

impl BifFile {
    /// Parses the archive tables out of `buffer`.
    ///
    /// For packed archives the entry offsets are validated to be strictly
    /// increasing and inside the file before any delta is taken; the format
    /// only implies that ordering, so a violating archive is rejected here
    /// rather than producing garbage sizes.
    pub fn from_existing(buffer: &ByteBuffer) -> Option<Self> {
        let mut cursor = Cursor::new(buffer);
        let header = BifHeader::read(&mut cursor).ok()?;
        let packed = &header.magic == b"BZF V1.0";

        cursor.set_position(header.offset_to_variable_table.into());
        let mut raw = Vec::with_capacity(header.variable_count as usize);
        for _ in 0..header.variable_count {
            raw.push(VariableTableEntry::read(&mut cursor).ok()?);
        }

        let mut entries: Vec<BifEntry> = Vec::with_capacity(raw.len());
        for (index, entry) in raw.iter().enumerate() {
            let packed_size = if packed {
                let next_offset = match raw.get(index + 1) {
                    Some(next) => next.offset,
                    None => buffer.len() as u32,
                };
                if next_offset <= entry.offset || next_offset as usize > buffer.len() {
                    warn!(index, "Packed archive offsets not strictly increasing");
                    return None;
                }
                Some(next_offset - entry.offset)
            } else {
                None
            };

            entries.push(BifEntry {
                restype: ResourceType::from_code(entry.res_type as u16),
                offset: entry.offset,
                size: entry.size,
                packed_size,
            });
        }

        Some(Self { packed, entries })
    }

    /// Whether payloads are packed (BZF) rather than stored raw (BIF).
    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// The variable resource table, in stored order.
    pub fn entries(&self) -> &[BifEntry] {
        &self.entries
    }

    /// Copies the payload of the entry at `index` out of `buffer`.
    ///
    /// Packed payloads go through `decompressor`; when the archive is packed
    /// and no decompressor was supplied this returns `None`.
    pub fn read_entry(
        &self,
        buffer: &ByteBuffer,
        index: usize,
        decompressor: Option<&Decompressor>,
    ) -> Option<ByteBuffer> {
        let entry = self.entries.get(index)?;
        let start = entry.offset as usize;

        if let Some(packed_size) = entry.packed_size {
            let end = start.checked_add(packed_size as usize)?;
            let packed = buffer.get(start..end)?;
            return decompressor?(packed, entry.size as usize);
        }

        let end = start.checked_add(entry.size as usize)?;
        buffer.get(start..end).map(|slice| slice.to_vec())
    }
}

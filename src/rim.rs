// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::{Cursor, SeekFrom};

use binrw::{BinRead, binrw};

use crate::ByteBuffer;
use crate::common::{ResourceId, ResourceType, trimmed_resref};
use crate::erf::CapsuleEntry;

#[binrw]
#[br(little, magic = b"RIM V1.0")]
struct RimHeader {
    reserved: u32,
    entry_count: u32,
    offset_to_entries: u32,
}

#[binrw]
#[br(little)]
struct RimEntry {
    resref: [u8; 16],
    res_type: u32,
    index: u32,
    offset: u32,
    size: u32,
}

#[binrw]
#[br(little)]
struct RimTables {
    header: RimHeader,

    #[br(seek_before = SeekFrom::Start(header.offset_to_entries.into()))]
    #[br(count = header.entry_count)]
    entries: Vec<RimEntry>,
}

/// A RIM capsule archive. Same role as [`crate::erf::ErfFile`], different
/// table layout.
pub struct RimFile {
    entries: Vec<CapsuleEntry>,
}

impl RimFile {
    /// Parses the capsule table out of `buffer`.
    pub fn from_existing(buffer: &ByteBuffer) -> Option<Self> {
        let mut cursor = Cursor::new(buffer);
        let tables = RimTables::read(&mut cursor).ok()?;

        let entries = tables
            .entries
            .iter()
            .map(|entry| CapsuleEntry {
                id: ResourceId::new(
                    &trimmed_resref(&entry.resref),
                    ResourceType::from_code(entry.res_type as u16),
                ),
                offset: entry.offset,
                size: entry.size,
            })
            .collect();

        Some(Self { entries })
    }

    /// Every entry in declaration order, duplicates included.
    pub fn entries(&self) -> &[CapsuleEntry] {
        &self.entries
    }

    /// Copies one entry's payload out of `buffer`.
    pub fn read_entry(&self, buffer: &ByteBuffer, entry: &CapsuleEntry) -> Option<ByteBuffer> {
        let start = entry.offset as usize;
        let end = start.checked_add(entry.size as usize)?;
        buffer.get(start..end).map(|slice| slice.to_vec())
    }
}

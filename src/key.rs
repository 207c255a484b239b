// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::{Cursor, SeekFrom};

use binrw::{BinRead, binrw};

use crate::ByteBuffer;
use crate::common::{ResourceId, ResourceType, trimmed_resref};

#[binrw]
#[br(little, magic = b"KEY V1.0")]
struct KeyHeader {
    bif_count: u32,
    key_count: u32,
    offset_to_file_table: u32,
    offset_to_key_table: u32,
    build_year: u32,
    build_day: u32,
}

#[binrw]
#[br(little)]
struct FileTableEntry {
    file_size: u32,
    filename_offset: u32,
    filename_size: u16,
    drives: u16,
}

#[binrw]
#[br(little)]
struct KeyTableEntry {
    resref: [u8; 16],
    res_type: u16,
    res_id: u32,
}

#[binrw]
#[br(little)]
struct KeyTables {
    header: KeyHeader,

    #[br(seek_before = SeekFrom::Start(header.offset_to_file_table.into()))]
    #[br(count = header.bif_count)]
    files: Vec<FileTableEntry>,

    #[br(seek_before = SeekFrom::Start(header.offset_to_key_table.into()))]
    #[br(count = header.key_count)]
    keys: Vec<KeyTableEntry>,
}

/// One key-table entry, pointing into a bulk archive.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub id: ResourceId,
    /// Which archive in [`KeyFile::archive_filenames`] holds the payload.
    pub archive_index: u32,
    /// Index into that archive's variable resource table.
    pub resource_index: u32,
}

/// The chitin KEY file: the index over every BIF/BZF bulk archive.
pub struct KeyFile {
    /// Archive paths relative to the installation root, in table order.
    pub archive_filenames: Vec<String>,
    entries: Vec<KeyEntry>,
}

impl KeyFile {
    /// Parses a KEY file out of `buffer`.
    pub fn from_existing(buffer: &ByteBuffer) -> Option<Self> {
        let mut cursor = Cursor::new(buffer);
        let tables = KeyTables::read(&mut cursor).ok()?;

        let mut archive_filenames = Vec::with_capacity(tables.files.len());
        for file in &tables.files {
            let start = file.filename_offset as usize;
            let end = start.checked_add(file.filename_size as usize)?;
            let raw = buffer.get(start..end)?;
            let text = String::from_utf8_lossy(raw)
                .trim_end_matches('\0')
                .replace('\\', "/");
            archive_filenames.push(text);
        }

        let entries = tables
            .keys
            .iter()
            .map(|key| KeyEntry {
                id: ResourceId::new(
                    &trimmed_resref(&key.resref),
                    ResourceType::from_code(key.res_type),
                ),
                archive_index: key.res_id >> 20,
                resource_index: key.res_id & 0xFFFFF,
            })
            .collect();

        Some(Self {
            archive_filenames,
            entries,
        })
    }

    /// Every key entry in declaration order.
    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }
}

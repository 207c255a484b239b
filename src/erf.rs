// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::{Cursor, SeekFrom};

use binrw::{BinRead, binrw};

use crate::ByteBuffer;
use crate::common::{ResourceId, ResourceType, trimmed_resref};

#[binrw]
#[br(little)]
struct ErfHeader {
    #[br(assert(&file_type == b"ERF " || &file_type == b"MOD " || &file_type == b"SAV "))]
    file_type: [u8; 4],
    #[br(assert(&version == b"V1.0"))]
    version: [u8; 4],
    language_count: u32,
    localized_string_size: u32,
    entry_count: u32,
    offset_to_localized_strings: u32,
    offset_to_keys: u32,
    offset_to_resources: u32,
    build_year: u32,
    build_day: u32,
    description_strref: u32,
}

#[binrw]
#[br(little)]
struct ErfKeyEntry {
    resref: [u8; 16],
    res_id: u32,
    res_type: u16,
    unused: u16,
}

#[binrw]
#[br(little)]
struct ErfResourceEntry {
    offset: u32,
    size: u32,
}

#[binrw]
#[br(little)]
struct ErfTables {
    header: ErfHeader,

    #[br(seek_before = SeekFrom::Start(header.offset_to_keys.into()))]
    #[br(count = header.entry_count)]
    keys: Vec<ErfKeyEntry>,

    #[br(seek_before = SeekFrom::Start(header.offset_to_resources.into()))]
    #[br(count = header.entry_count)]
    resources: Vec<ErfResourceEntry>,
}

/// One named entry of a capsule, in declaration order.
#[derive(Debug, Clone)]
pub struct CapsuleEntry {
    pub id: ResourceId,
    /// Byte offset of the payload inside the capsule file.
    pub offset: u32,
    /// Payload size in bytes.
    pub size: u32,
}

/// An ERF (or MOD/SAV) capsule archive.
///
/// Only the entry tables are kept in memory; payloads are sliced out of the
/// buffer on demand via [`ErfFile::read_entry`].
pub struct ErfFile {
    /// Build year recorded in the header, offset from 1900.
    pub build_year: u32,
    /// Build day of year recorded in the header.
    pub build_day: u32,
    entries: Vec<CapsuleEntry>,
}

impl ErfFile {
    /// Parses the capsule tables out of `buffer`.
    pub fn from_existing(buffer: &ByteBuffer) -> Option<Self> {
        let mut cursor = Cursor::new(buffer);
        let tables = ErfTables::read(&mut cursor).ok()?;

        let entries = tables
            .keys
            .iter()
            .zip(tables.resources.iter())
            .map(|(key, resource)| CapsuleEntry {
                id: ResourceId::new(
                    &trimmed_resref(&key.resref),
                    ResourceType::from_code(key.res_type),
                ),
                offset: resource.offset,
                size: resource.size,
            })
            .collect();

        Some(Self {
            build_year: tables.header.build_year,
            build_day: tables.header.build_day,
            entries,
        })
    }

    /// Every entry in declaration order, duplicates included.
    pub fn entries(&self) -> &[CapsuleEntry] {
        &self.entries
    }

    /// Copies one entry's payload out of `buffer`, which must be the same
    /// buffer the tables were parsed from.
    pub fn read_entry(&self, buffer: &ByteBuffer, entry: &CapsuleEntry) -> Option<ByteBuffer> {
        let start = entry.offset as usize;
        let end = start.checked_add(entry.size as usize)?;
        buffer.get(start..end).map(|slice| slice.to_vec())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a minimal ERF capsule holding the given entries.
    pub(crate) fn build_erf(entries: &[(&str, ResourceType, &[u8])]) -> ByteBuffer {
        let header_size = 8 + 9 * 4 + 116;
        let offset_to_keys = header_size as u32;
        let offset_to_resources = offset_to_keys + 24 * entries.len() as u32;
        let mut data_offset = offset_to_resources + 8 * entries.len() as u32;

        let mut out = Vec::new();
        out.extend_from_slice(b"ERF V1.0");
        for value in [
            0u32,
            0,
            entries.len() as u32,
            header_size as u32,
            offset_to_keys,
            offset_to_resources,
            125,
            1,
            0xFFFFFFFF,
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.resize(header_size, 0);

        for (resref, restype, _) in entries {
            let mut field = [0u8; 16];
            field[..resref.len()].copy_from_slice(resref.as_bytes());
            out.extend_from_slice(&field);
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&restype.code().to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
        }

        for (_, _, payload) in entries {
            out.extend_from_slice(&data_offset.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            data_offset += payload.len() as u32;
        }

        for (_, _, payload) in entries {
            out.extend_from_slice(payload);
        }

        out
    }

    #[test]
    fn parse_and_read_entries() {
        let buffer = build_erf(&[
            ("door01", ResourceType::Utd, b"door bytes"),
            ("Spells", ResourceType::TwoDA, b"table bytes"),
        ]);

        let erf = ErfFile::from_existing(&buffer).unwrap();
        assert_eq!(erf.entries().len(), 2);
        assert_eq!(erf.entries()[0].id.filename(), "door01.utd");
        assert_eq!(erf.entries()[1].id.filename(), "spells.2da");

        let payload = erf.read_entry(&buffer, &erf.entries()[1]).unwrap();
        assert_eq!(payload, b"table bytes");
    }

    #[test]
    fn duplicate_entries_are_preserved() {
        let buffer = build_erf(&[
            ("door01", ResourceType::Utd, b"first"),
            ("door01", ResourceType::Utd, b"second"),
        ]);

        let erf = ErfFile::from_existing(&buffer).unwrap();
        assert_eq!(erf.entries().len(), 2);
        assert_eq!(erf.entries()[0].id, erf.entries()[1].id);
    }

    #[test]
    fn invalid_data_does_not_panic() {
        // Feeding it garbage should produce None, not a panic
        assert!(ErfFile::from_existing(&b"not a capsule".to_vec()).is_none());
        assert!(ErfFile::from_existing(&Vec::new()).is_none());
    }
}

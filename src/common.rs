// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::cmp::Ordering;
use std::fmt;

/// The type of a resource, as stored in capsule and base-archive tables.
///
/// Only the types the engine actually ships are named; anything else is
/// carried through numerically as `Unknown` so that foreign archives still
/// list and diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    /// Targa images, mostly used for icons and loose textures.
    Tga,
    /// Sound data, with or without the obfuscating header.
    Wav,
    /// Plain text.
    Txt,
    /// Binary models.
    Mdl,
    /// Script source.
    Nss,
    /// Compiled script bytecode.
    Ncs,
    /// Area static info (GFF).
    Are,
    /// Module info (GFF).
    Ifo,
    /// Two-dimensional data tables.
    TwoDA,
    /// The localized string table.
    Tlk,
    /// Texture sidecar info.
    Txi,
    /// Dynamic area info (GFF).
    Git,
    /// Item template (GFF).
    Uti,
    /// Creature template (GFF).
    Utc,
    /// Dialogue (GFF).
    Dlg,
    /// Trigger template (GFF).
    Utt,
    /// Sound template (GFF).
    Uts,
    /// Generic GFF data.
    Gff,
    /// Encounter template (GFF).
    Ute,
    /// Door template (GFF).
    Utd,
    /// Placeable template (GFF).
    Utp,
    /// GUI layout (GFF).
    Gui,
    /// Merchant template (GFF).
    Utm,
    /// Journal data (GFF).
    Jrl,
    /// Waypoint template (GFF).
    Utw,
    /// Sound set file.
    Ssf,
    /// Lip sync data.
    Lip,
    /// Compiled texture.
    Tpc,
    /// Model extension data.
    Mdx,
    /// Any type code we do not name. The code round-trips untouched.
    Unknown(u16),
}

/// The numeric type codes used on disk. This table is fixed by the engine.
const RESOURCE_TYPE_CODES: &[(ResourceType, u16, &str)] = &[
    (ResourceType::Tga, 3, "tga"),
    (ResourceType::Wav, 4, "wav"),
    (ResourceType::Txt, 10, "txt"),
    (ResourceType::Mdl, 2002, "mdl"),
    (ResourceType::Nss, 2009, "nss"),
    (ResourceType::Ncs, 2010, "ncs"),
    (ResourceType::Are, 2012, "are"),
    (ResourceType::Ifo, 2014, "ifo"),
    (ResourceType::TwoDA, 2017, "2da"),
    (ResourceType::Tlk, 2018, "tlk"),
    (ResourceType::Txi, 2022, "txi"),
    (ResourceType::Git, 2023, "git"),
    (ResourceType::Uti, 2025, "uti"),
    (ResourceType::Utc, 2027, "utc"),
    (ResourceType::Dlg, 2029, "dlg"),
    (ResourceType::Utt, 2032, "utt"),
    (ResourceType::Uts, 2035, "uts"),
    (ResourceType::Gff, 2037, "gff"),
    (ResourceType::Ute, 2040, "ute"),
    (ResourceType::Utd, 2042, "utd"),
    (ResourceType::Utp, 2044, "utp"),
    (ResourceType::Gui, 2047, "gui"),
    (ResourceType::Utm, 2051, "utm"),
    (ResourceType::Jrl, 2056, "jrl"),
    (ResourceType::Utw, 2058, "utw"),
    (ResourceType::Ssf, 2060, "ssf"),
    (ResourceType::Lip, 3004, "lip"),
    (ResourceType::Tpc, 3007, "tpc"),
    (ResourceType::Mdx, 3008, "mdx"),
];

impl ResourceType {
    /// Looks up a type from its on-disk numeric code.
    pub fn from_code(code: u16) -> Self {
        RESOURCE_TYPE_CODES
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(t, _, _)| *t)
            .unwrap_or(ResourceType::Unknown(code))
    }

    /// Looks up a type from a filename extension, case-insensitively.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let lowercase = extension.to_lowercase();
        RESOURCE_TYPE_CODES
            .iter()
            .find(|(_, _, e)| *e == lowercase)
            .map(|(t, _, _)| *t)
    }

    /// The on-disk numeric code for this type.
    pub fn code(&self) -> u16 {
        if let ResourceType::Unknown(code) = self {
            return *code;
        }
        RESOURCE_TYPE_CODES
            .iter()
            .find(|(t, _, _)| t == self)
            .map(|(_, c, _)| *c)
            .unwrap_or(0xFFFF)
    }

    /// The filename extension for this type. Unknown codes render as the
    /// code in decimal so a filename can still be formed.
    pub fn extension(&self) -> String {
        RESOURCE_TYPE_CODES
            .iter()
            .find(|(t, _, _)| t == self)
            .map(|(_, _, e)| (*e).to_string())
            .unwrap_or_else(|| format!("{}", self.code()))
    }

    /// Whether this type is one of the GFF-structured template formats.
    pub fn is_gff(&self) -> bool {
        matches!(
            self,
            ResourceType::Are
                | ResourceType::Ifo
                | ResourceType::Git
                | ResourceType::Uti
                | ResourceType::Utc
                | ResourceType::Dlg
                | ResourceType::Utt
                | ResourceType::Uts
                | ResourceType::Gff
                | ResourceType::Ute
                | ResourceType::Utd
                | ResourceType::Utp
                | ResourceType::Gui
                | ResourceType::Utm
                | ResourceType::Jrl
                | ResourceType::Utw
        )
    }
}

/// Identifies one logical resource: a case-insensitive resref plus a type.
///
/// The resref is stored lowercased, so two identifiers that differ only in
/// case compare and hash equal. Uniqueness is per layer, never global.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    resref: String,
    pub restype: ResourceType,
}

impl ResourceId {
    pub fn new(resref: &str, restype: ResourceType) -> Self {
        Self {
            resref: resref.to_lowercase(),
            restype,
        }
    }

    /// Parses a `name.ext` filename into an identifier. Returns `None` when
    /// the extension is not a known resource type.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (stem, extension) = filename.rsplit_once('.')?;
        Some(Self::new(stem, ResourceType::from_extension(extension)?))
    }

    /// The lowercased resref.
    pub fn resref(&self) -> &str {
        &self.resref
    }

    /// The `resref.ext` form used for filenames and diagnostics.
    pub fn filename(&self) -> String {
        format!("{}.{}", self.resref, self.restype.extension())
    }
}

/// Decodes a fixed 16-byte resref field: null-padded, case-insensitive.
pub(crate) fn trimmed_resref(bytes: &[u8; 16]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_lowercase()
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.filename())
    }
}

impl Ord for ResourceId {
    // The canonical stream order: resref first, then extension. Every diff
    // entry point sorts by this so re-runs emit identically.
    fn cmp(&self, other: &Self) -> Ordering {
        self.resref
            .cmp(&other.resref)
            .then_with(|| self.restype.extension().cmp(&other.restype.extension()))
    }
}

impl PartialOrd for ResourceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

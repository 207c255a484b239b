// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::common::ResourceId;
use crate::erf::{CapsuleEntry, ErfFile};
use crate::rim::RimFile;
use crate::{ByteBuffer, Error};

use super::{LayerKind, ResourceLayer};

enum CapsuleTables {
    Erf(ErfFile),
    Rim(RimFile),
}

/// One capsule archive file (`.erf`, `.mod`, or `.rim`) acting as a layer.
///
/// The entry tables are parsed once at construction; payload reads re-open
/// the file and drop the handle before returning.
pub struct CapsuleLayer {
    path: PathBuf,
    tables: CapsuleTables,
}

impl CapsuleLayer {
    /// Opens a capsule file. The format is chosen by extension, with ERF as
    /// the fallback since MOD/SAV share its layout.
    pub fn from_existing(path: &Path) -> crate::Result<Self> {
        debug!(path = %path.display(), "Opening capsule");

        let unreadable = |reason: &str| Error::LayerUnreadable {
            location: path.display().to_string(),
            reason: reason.to_string(),
        };

        let buffer = std::fs::read(path).map_err(|e| unreadable(&e.to_string()))?;

        let is_rim = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase() == "rim")
            .unwrap_or(false);

        let tables = if is_rim {
            CapsuleTables::Rim(
                RimFile::from_existing(&buffer).ok_or_else(|| unreadable("invalid RIM tables"))?,
            )
        } else {
            CapsuleTables::Erf(
                ErfFile::from_existing(&buffer).ok_or_else(|| unreadable("invalid ERF tables"))?,
            )
        };

        Ok(Self {
            path: path.to_path_buf(),
            tables,
        })
    }

    fn entries(&self) -> &[CapsuleEntry] {
        match &self.tables {
            CapsuleTables::Erf(erf) => erf.entries(),
            CapsuleTables::Rim(rim) => rim.entries(),
        }
    }
}

impl ResourceLayer for CapsuleLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Capsule
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn list(&self) -> Vec<ResourceId> {
        self.entries().iter().map(|entry| entry.id.clone()).collect()
    }

    fn read(&self, id: &ResourceId) -> Option<ByteBuffer> {
        // Duplicates are legal inside a capsule; the last declaration wins.
        let entry = self.entries().iter().rev().find(|entry| &entry.id == id)?;

        let buffer = std::fs::read(&self.path).ok()?;
        match &self.tables {
            CapsuleTables::Erf(erf) => erf.read_entry(&buffer, entry),
            CapsuleTables::Rim(rim) => rim.read_entry(&buffer, entry),
        }
    }

    fn exists(&self, id: &ResourceId) -> bool {
        self.entries().iter().any(|entry| &entry.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ResourceType;
    use crate::erf::tests::build_erf;
    use crate::rim::tests::build_rim;

    #[test]
    fn erf_capsule_reads_last_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("danm13.mod");
        std::fs::write(
            &path,
            build_erf(&[
                ("door01", ResourceType::Utd, b"first"),
                ("door01", ResourceType::Utd, b"second"),
            ]),
        )
        .unwrap();

        let layer = CapsuleLayer::from_existing(&path).unwrap();
        assert_eq!(layer.list().len(), 2);

        let id = ResourceId::new("door01", ResourceType::Utd);
        assert_eq!(layer.read(&id).unwrap(), b"second");
    }

    #[test]
    fn rim_capsule_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("danm13.rim");
        std::fs::write(&path, build_rim(&[("m01aa", ResourceType::Are, b"area")])).unwrap();

        let layer = CapsuleLayer::from_existing(&path).unwrap();
        let id = ResourceId::new("m01aa", ResourceType::Are);
        assert!(layer.exists(&id));
        assert_eq!(layer.read(&id).unwrap(), b"area");
    }

    #[test]
    fn corrupt_capsule_is_a_layer_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.rim");
        std::fs::write(&path, b"garbage").unwrap();

        assert!(matches!(
            CapsuleLayer::from_existing(&path),
            Err(Error::LayerUnreadable { .. })
        ));
    }
}

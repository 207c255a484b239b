// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::ByteBuffer;
use crate::resource::{BaseLayer, CapsuleLayer, OverrideLayer, ResourceLayer};
use crate::{Error, Result};

/// A game installation: a root directory and its ordered resource layers.
///
/// Layer order *is* the precedence rule and is fixed at construction: the
/// override directory first, then every capsule under `modules/` (sorted
/// case-insensitively), then the base archive. It is never re-sorted.
pub struct Installation {
    root: PathBuf,
    layers: Vec<Box<dyn ResourceLayer>>,
    module_names: Vec<String>,
    diagnostics: Vec<Error>,
}

impl Installation {
    /// Opens an installation rooted at `root`.
    ///
    /// Individual unreadable layers degrade the installation and are
    /// recorded in [`Installation::diagnostics`]; only a missing root, or a
    /// root with no resolvable layers at all, is fatal.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use telos::installation::Installation;
    /// let install = Installation::from_existing("SteamApps/common/swkotor".as_ref()).unwrap();
    /// ```
    pub fn from_existing(root: &Path) -> Result<Self> {
        Self::open(root, None)
    }

    /// Like [`Installation::from_existing`], but supplies the byte transform
    /// used to unpack BZF payloads in the base archive.
    pub fn from_existing_with_decompressor(
        root: &Path,
        decompressor: impl Fn(&[u8], usize) -> Option<ByteBuffer> + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::open(root, Some(Box::new(decompressor)))
    }

    fn open(
        root: &Path,
        decompressor: Option<Box<dyn Fn(&[u8], usize) -> Option<ByteBuffer> + Send + Sync>>,
    ) -> Result<Self> {
        debug!(root = %root.display(), "Opening installation");

        if fs::metadata(root).is_err() {
            warn!("Installation root not found");
            return Err(Error::InstallationNotFound {
                path: root.display().to_string(),
            });
        }

        let mut layers: Vec<Box<dyn ResourceLayer>> = Vec::new();
        let mut module_names = Vec::new();
        let mut diagnostics = Vec::new();

        let override_dir = root.join("override");
        if override_dir.is_dir() {
            layers.push(Box::new(OverrideLayer::from_existing(&override_dir)));
        }

        let modules_dir = root.join("modules");
        if let Ok(entries) = fs::read_dir(&modules_dir) {
            let mut capsule_paths: Vec<PathBuf> = entries
                .filter_map(std::result::Result::ok)
                .map(|entry| entry.path())
                .filter(|path| {
                    matches!(
                        path.extension()
                            .map(|e| e.to_string_lossy().to_lowercase())
                            .as_deref(),
                        Some("mod") | Some("erf") | Some("rim")
                    )
                })
                .collect();
            capsule_paths.sort_by_key(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default()
            });

            for path in capsule_paths {
                match CapsuleLayer::from_existing(&path) {
                    Ok(layer) => {
                        if let Some(name) = path.file_name() {
                            module_names.push(name.to_string_lossy().to_string());
                        }
                        layers.push(Box::new(layer));
                    }
                    Err(error) => {
                        warn!(capsule = %path.display(), "Skipping unreadable capsule");
                        diagnostics.push(error);
                    }
                }
            }
        }

        let key_path = root.join("chitin.key");
        if key_path.is_file() {
            let base = BaseLayer::from_existing(&key_path, root).map(|base| match decompressor {
                Some(f) => base.with_decompressor(f),
                None => base,
            });
            match base {
                Ok(layer) => layers.push(Box::new(layer)),
                Err(error) => {
                    warn!("Skipping unreadable base archive index");
                    diagnostics.push(error);
                }
            }
        }

        if layers.is_empty() {
            warn!("Installation has no resolvable layers");
            return Err(Error::InstallationNotFound {
                path: root.display().to_string(),
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            layers,
            module_names,
            diagnostics,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The layers in precedence order: index 0 shadows everything below it.
    pub fn layers(&self) -> &[Box<dyn ResourceLayer>] {
        &self.layers
    }

    /// Filenames of the capsules found under `modules/`, in layer order.
    pub fn module_names(&self) -> &[String] {
        &self.module_names
    }

    /// Errors recorded for layers that could not be opened at all. Layers
    /// that opened degraded keep their own diagnostics.
    pub fn diagnostics(&self) -> &[Error] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ResourceId, ResourceType};
    use crate::erf::tests::build_erf;
    use crate::resource::LayerKind;

    pub(crate) fn common_setup_install(dir: &Path) {
        fs::create_dir_all(dir.join("override")).unwrap();
        fs::create_dir_all(dir.join("modules")).unwrap();
        fs::write(dir.join("override/door01.utd"), b"override door").unwrap();
        fs::write(
            dir.join("modules/danm13.mod"),
            build_erf(&[("door01", ResourceType::Utd, b"capsule door")]),
        )
        .unwrap();
    }

    #[test]
    fn layer_order_is_override_then_capsules() {
        let dir = tempfile::tempdir().unwrap();
        common_setup_install(dir.path());

        let install = Installation::from_existing(dir.path()).unwrap();
        assert_eq!(install.layers().len(), 2);
        assert_eq!(install.layers()[0].kind(), LayerKind::Override);
        assert_eq!(install.layers()[1].kind(), LayerKind::Capsule);
        assert_eq!(install.module_names(), ["danm13.mod"]);
    }

    #[test]
    fn missing_root_is_fatal() {
        let result = Installation::from_existing(Path::new("/nonexistent/swkotor"));
        assert!(matches!(result, Err(Error::InstallationNotFound { .. })));
    }

    #[test]
    fn corrupt_capsule_degrades_with_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        common_setup_install(dir.path());
        fs::write(dir.path().join("modules/broken.rim"), b"garbage").unwrap();

        let install = Installation::from_existing(dir.path()).unwrap();
        assert_eq!(install.layers().len(), 2);
        assert_eq!(install.diagnostics().len(), 1);

        // The healthy layers still resolve
        let id = ResourceId::new("door01", ResourceType::Utd);
        assert!(install.layers()[0].exists(&id));
    }
}

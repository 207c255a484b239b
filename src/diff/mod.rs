// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod cache;
pub use cache::{CacheKey, DiffCache, StrRefReference, StrRefReferenceCache};

pub mod text;

mod format;
pub use format::{DiffFormat, DiffFormatter, make_formatter};

pub(crate) mod analyze;
pub use analyze::{Analyzer, Modification, PatchOperation};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use crate::common::{ResourceId, ResourceType};
use crate::installation::Installation;
use crate::resindex::ResourceIndex;
use crate::resource::{CapsuleLayer, ResourceLayer};
use crate::{ByteBuffer, Result};

/// How two resources relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    Identical,
    Added,
    Removed,
    Modified,
}

/// The outcome of comparing one resource across two sides.
///
/// Payload invariants: `Identical` carries none, `Added`/`Removed` carry
/// exactly one side, `Modified` carries both. A result with `diagnostic`
/// set could not be compared at all; it reports `Modified` with no payloads
/// so batch callers see it without the stream aborting.
///
/// Payloads are owned copies, never references into layer handles, so
/// results stay valid after the source installation is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiffResult {
    pub diff_type: DiffType,
    pub left_label: String,
    pub right_label: String,
    pub restype: Option<ResourceType>,
    pub left_value: Option<ByteBuffer>,
    pub right_value: Option<ByteBuffer>,
    /// Field/row-level edits, when a structured adapter compared the pair.
    pub edits: Vec<StructuredEdit>,
    pub diagnostic: Option<String>,
}

impl ResourceDiffResult {
    pub fn identical(left_label: &str, right_label: &str, restype: Option<ResourceType>) -> Self {
        Self {
            diff_type: DiffType::Identical,
            left_label: left_label.to_string(),
            right_label: right_label.to_string(),
            restype,
            left_value: None,
            right_value: None,
            edits: Vec::new(),
            diagnostic: None,
        }
    }

    pub fn added(label: &str, restype: Option<ResourceType>, right_value: ByteBuffer) -> Self {
        Self {
            diff_type: DiffType::Added,
            left_label: label.to_string(),
            right_label: label.to_string(),
            restype,
            left_value: None,
            right_value: Some(right_value),
            edits: Vec::new(),
            diagnostic: None,
        }
    }

    pub fn removed(label: &str, restype: Option<ResourceType>, left_value: ByteBuffer) -> Self {
        Self {
            diff_type: DiffType::Removed,
            left_label: label.to_string(),
            right_label: label.to_string(),
            restype,
            left_value: Some(left_value),
            right_value: None,
            edits: Vec::new(),
            diagnostic: None,
        }
    }

    pub fn modified(
        left_label: &str,
        right_label: &str,
        restype: Option<ResourceType>,
        left_value: ByteBuffer,
        right_value: ByteBuffer,
        edits: Vec<StructuredEdit>,
    ) -> Self {
        Self {
            diff_type: DiffType::Modified,
            left_label: left_label.to_string(),
            right_label: right_label.to_string(),
            restype,
            left_value: Some(left_value),
            right_value: Some(right_value),
            edits,
            diagnostic: None,
        }
    }

    pub fn failed(
        left_label: &str,
        right_label: &str,
        restype: Option<ResourceType>,
        diagnostic: String,
    ) -> Self {
        Self {
            diff_type: DiffType::Modified,
            left_label: left_label.to_string(),
            right_label: right_label.to_string(),
            restype,
            left_value: None,
            right_value: None,
            edits: Vec::new(),
            diagnostic: Some(diagnostic),
        }
    }
}

/// One minimal edit reported by a structured adapter, at whatever
/// granularity the resource family supports.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredEdit {
    AddField { path: String, value: String },
    ChangeField { path: String, value: String },
    AddRow { row_label: String, cells: Vec<(String, String)> },
    ChangeRow { row_label: String, cells: Vec<(String, String)> },
    AddString { text: String },
    ChangeString { strref: u32, text: String },
    ChangeSound { slot: String, strref: u32 },
}

/// One string-reference consumption reported by an adapter scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrRefUse {
    pub field: String,
    pub strref: u32,
}

/// The capability contract a resource type can offer the engine.
///
/// The engine only ever needs two things from a codec: a structured
/// comparison producing minimal edits, and optionally a scan of the string
/// references a payload consumes. Types without an adapter fall back to
/// byte/text comparison.
pub trait ResourceAdapter: Send + Sync {
    /// Compares two payloads structurally. An empty vec means structurally
    /// identical; `None` means these payloads defeated the adapter and the
    /// engine should fall back to the binary/text path.
    fn compare(&self, left: &[u8], right: &[u8]) -> Option<Vec<StructuredEdit>>;

    /// Which string references the payload consumes, by field name.
    fn scan_strrefs(&self, _bytes: &[u8]) -> Vec<StrRefUse> {
        Vec::new()
    }
}

/// Compares byte buffers, directories, capsules, and whole installations.
///
/// Holds the adapter registry; all comparison state lives in the explicit
/// [`DiffCache`] the caller passes in, so engine values are cheap and
/// session-scoped.
#[derive(Default)]
pub struct DiffEngine {
    adapters: HashMap<ResourceType, Arc<dyn ResourceAdapter>>,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the structured-compare capability for one resource type.
    pub fn register_adapter(&mut self, restype: ResourceType, adapter: Arc<dyn ResourceAdapter>) {
        self.adapters.insert(restype, adapter);
    }

    /// Compares two byte buffers.
    ///
    /// Dispatch order: a registered adapter for `restype` first; then exact
    /// byte equality; everything else is `Modified`, with text/binary
    /// rendering decided by the formatters from the carried payloads.
    pub fn diff_data(
        &self,
        left: &[u8],
        right: &[u8],
        left_label: &str,
        right_label: &str,
        restype: Option<ResourceType>,
    ) -> ResourceDiffResult {
        if let Some(restype) = restype {
            if let Some(adapter) = self.adapters.get(&restype) {
                if let Some(edits) = adapter.compare(left, right) {
                    if edits.is_empty() {
                        return ResourceDiffResult::identical(left_label, right_label, Some(restype));
                    }
                    return ResourceDiffResult::modified(
                        left_label,
                        right_label,
                        Some(restype),
                        left.to_vec(),
                        right.to_vec(),
                        edits,
                    );
                }
            }
        }

        if left == right {
            return ResourceDiffResult::identical(left_label, right_label, restype);
        }

        ResourceDiffResult::modified(
            left_label,
            right_label,
            restype,
            left.to_vec(),
            right.to_vec(),
            Vec::new(),
        )
    }

    /// Compares two directory trees, walking both in lexicographic
    /// case-insensitive order. The stream is lazily evaluated and
    /// restartable by calling this again; re-runs over unchanged trees emit
    /// byte-identical sequences.
    pub fn diff_directories<'a>(
        &'a self,
        left_root: &Path,
        right_root: &Path,
        cache: Option<&'a DiffCache>,
    ) -> DiffStream<'a> {
        debug!(left = %left_root.display(), right = %right_root.display(), "Diffing directories");

        let left_files = walk_files(left_root);
        let right_files = walk_files(right_root);

        let mut names: BTreeSet<String> = BTreeSet::new();
        names.extend(left_files.keys().cloned());
        names.extend(right_files.keys().cloned());

        let pending = names
            .into_iter()
            .map(|name| {
                let left = left_files.get(&name);
                let right = right_files.get(&name);
                let display = left
                    .or(right)
                    .map(|(relative, _)| relative.clone())
                    .unwrap_or_default();
                Pending {
                    left_label: display.clone(),
                    right_label: display.clone(),
                    restype: ResourceId::from_filename(&display).map(|id| id.restype),
                    left: left
                        .map(|(_, p)| SideFetch::Path(p.clone()))
                        .unwrap_or(SideFetch::Missing),
                    right: right
                        .map(|(_, p)| SideFetch::Path(p.clone()))
                        .unwrap_or(SideFetch::Missing),
                }
            })
            .collect::<Vec<_>>();

        DiffStream {
            engine: self,
            cache,
            backing: Backing::Paths,
            pending: pending.into_iter(),
        }
    }

    /// Compares two capsule files entry-by-entry: the identifier union of
    /// both sides, in canonical order.
    pub fn diff_capsule_files<'a>(
        &'a self,
        left_path: &Path,
        right_path: &Path,
        cache: Option<&'a DiffCache>,
    ) -> Result<DiffStream<'a>> {
        debug!(left = %left_path.display(), right = %right_path.display(), "Diffing capsules");

        let left = CapsuleLayer::from_existing(left_path)?;
        let right = CapsuleLayer::from_existing(right_path)?;

        let pending = id_union_pending(
            &left.list().into_iter().collect::<BTreeSet<_>>(),
            &right.list().into_iter().collect::<BTreeSet<_>>(),
        );

        Ok(DiffStream {
            engine: self,
            cache,
            backing: Backing::Capsules { left, right },
            pending: pending.into_iter(),
        })
    }

    /// Compares two installations over their *resolved* identifiers: each
    /// side's effective bytes after layer precedence, so a resource
    /// shadowed differently on each side still compares meaningfully.
    pub fn diff_installations_with_resolution<'a>(
        &'a self,
        left: &'a Installation,
        right: &'a Installation,
        cache: Option<&'a DiffCache>,
    ) -> DiffStream<'a> {
        debug!(
            left = %left.root().display(),
            right = %right.root().display(),
            "Diffing installations"
        );

        let left_index = ResourceIndex::build(left);
        let right_index = ResourceIndex::build(right);

        let pending = id_union_pending(
            &left_index.collect_all_resource_identifiers(),
            &right_index.collect_all_resource_identifiers(),
        );

        DiffStream {
            engine: self,
            cache,
            backing: Backing::Indexes {
                left: left_index,
                right: right_index,
            },
            pending: pending.into_iter(),
        }
    }

    /// Resolves one resource in an installation for callers that want bytes
    /// rather than a diff. The second element is a human-readable
    /// diagnostic describing the resolution, whether or not it succeeded.
    pub fn resolve_resource_in_installation(
        &self,
        installation: &Installation,
        id: &ResourceId,
    ) -> (Option<ByteBuffer>, String) {
        if let ResourceType::Unknown(code) = id.restype {
            return (
                None,
                format!("{}: unknown resource type code {code}", id.filename()),
            );
        }

        let index = ResourceIndex::build(installation);
        let diagnostic = index.explain_text(id);
        (index.read(id), diagnostic)
    }

    /// Scans every resolved resource whose type has an adapter and maps
    /// each string reference to the fields consuming it.
    pub fn build_strref_cache(&self, installation: &Installation) -> StrRefReferenceCache {
        let index = ResourceIndex::build(installation);
        let mut references: HashMap<u32, Vec<StrRefReference>> = HashMap::new();

        for id in index.collect_all_resource_identifiers() {
            let Some(adapter) = self.adapters.get(&id.restype) else {
                continue;
            };
            let Some(bytes) = index.read(&id) else {
                continue;
            };
            for used in adapter.scan_strrefs(&bytes) {
                references.entry(used.strref).or_default().push(StrRefReference {
                    id: id.clone(),
                    field: used.field,
                });
            }
        }

        StrRefReferenceCache::from_references(references)
    }
}

enum SideFetch {
    Missing,
    Path(PathBuf),
    Id(ResourceId),
}

struct Pending {
    left_label: String,
    right_label: String,
    restype: Option<ResourceType>,
    left: SideFetch,
    right: SideFetch,
}

enum Backing<'a> {
    Paths,
    Capsules { left: CapsuleLayer, right: CapsuleLayer },
    Indexes {
        left: ResourceIndex<'a>,
        right: ResourceIndex<'a>,
    },
}

/// A finite, lazily-evaluated sequence of diff results in canonical order.
///
/// Ordering is a post-condition of the stream: however the comparisons are
/// evaluated, results come out sorted by identifier, case-insensitive.
/// Dropping the stream early releases everything; layer reads are scoped
/// per item.
pub struct DiffStream<'a> {
    engine: &'a DiffEngine,
    cache: Option<&'a DiffCache>,
    backing: Backing<'a>,
    pending: std::vec::IntoIter<Pending>,
}

impl DiffStream<'_> {
    fn fetch(&self, side_is_left: bool, fetch: &SideFetch) -> std::result::Result<Option<ByteBuffer>, String> {
        match fetch {
            SideFetch::Missing => Ok(None),
            SideFetch::Path(path) => std::fs::read(path)
                .map(Some)
                .map_err(|e| format!("{}: {e}", path.display())),
            SideFetch::Id(id) => {
                let bytes = match &self.backing {
                    Backing::Capsules { left, right } => {
                        if side_is_left { left.read(id) } else { right.read(id) }
                    }
                    Backing::Indexes { left, right } => {
                        if side_is_left { left.read(id) } else { right.read(id) }
                    }
                    Backing::Paths => None,
                };
                match bytes {
                    Some(bytes) => Ok(Some(bytes)),
                    None => Err(format!("{}: declared but unreadable", id.filename())),
                }
            }
        }
    }

    fn compare(&self, item: &Pending, left: ByteBuffer, right: ByteBuffer) -> Result<ResourceDiffResult> {
        let compute = || {
            self.engine.diff_data(
                &left,
                &right,
                &item.left_label,
                &item.right_label,
                item.restype,
            )
        };

        match self.cache {
            Some(cache) => cache.get_or_compute(CacheKey::for_pair(&left, &right), compute),
            None => Ok(compute()),
        }
    }
}

impl Iterator for DiffStream<'_> {
    /// Per-resource failures ride inside `Ok` results as diagnostics; only
    /// engine-fatal conditions (a cache key collision) surface as `Err`.
    type Item = Result<ResourceDiffResult>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.pending.next()?;

        let left = self.fetch(true, &item.left);
        let right = self.fetch(false, &item.right);

        let result = match (left, right) {
            (Err(reason), _) | (_, Err(reason)) => Ok(ResourceDiffResult::failed(
                &item.left_label,
                &item.right_label,
                item.restype,
                reason,
            )),
            (Ok(Some(left)), Ok(None)) => Ok(ResourceDiffResult::removed(
                &item.left_label,
                item.restype,
                left,
            )),
            (Ok(None), Ok(Some(right))) => Ok(ResourceDiffResult::added(
                &item.right_label,
                item.restype,
                right,
            )),
            (Ok(Some(left)), Ok(Some(right))) => self.compare(&item, left, right),
            (Ok(None), Ok(None)) => Ok(ResourceDiffResult::identical(
                &item.left_label,
                &item.right_label,
                item.restype,
            )),
        };

        Some(result)
    }
}

/// Walks a tree and maps each file's lowercased relative path to its
/// display form and absolute path, in deterministic order.
fn walk_files(root: &Path) -> BTreeMap<String, (String, PathBuf)> {
    let mut files = BTreeMap::new();
    let walker = WalkDir::new(root)
        .sort_by(|a, b| {
            a.file_name()
                .to_string_lossy()
                .to_lowercase()
                .cmp(&b.file_name().to_string_lossy().to_lowercase())
        })
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file());

    for file in walker {
        let relative = file
            .path()
            .strip_prefix(root)
            .unwrap_or(file.path())
            .to_string_lossy()
            .replace('\\', "/");
        files.insert(relative.to_lowercase(), (relative, file.path().to_path_buf()));
    }
    files
}

fn id_union_pending(left: &BTreeSet<ResourceId>, right: &BTreeSet<ResourceId>) -> Vec<Pending> {
    left.union(right)
        .map(|id| {
            let filename = id.filename();
            Pending {
                left_label: filename.clone(),
                right_label: filename,
                restype: Some(id.restype),
                left: if left.contains(id) {
                    SideFetch::Id(id.clone())
                } else {
                    SideFetch::Missing
                },
                right: if right.contains(id) {
                    SideFetch::Id(id.clone())
                } else {
                    SideFetch::Missing
                },
            }
        })
        .collect()
}

// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::ByteBuffer;
use crate::common::ResourceId;
use crate::installation::Installation;
use crate::resource::LayerKind;
use crate::{Error, Result};

/// One declaration of an identifier somewhere in the installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Index into [`Installation::layers`]; 0 is the highest precedence.
    pub layer_index: usize,
    pub layer_kind: LayerKind,
    /// Where the layer lives, for diagnostics.
    pub location: String,
    /// Declaration position inside the layer, for duplicate entries.
    pub ordinal: usize,
    /// Whether this declaration is the one `resolve` returns.
    pub would_win: bool,
}

/// A duplicate declaration inside a single layer. The later declaration
/// wins; the earlier one is recorded here, never silently dropped.
#[derive(Debug, Clone)]
pub struct ShadowWarning {
    pub id: ResourceId,
    pub layer_index: usize,
    /// Ordinal of the declaration that lost.
    pub shadowed_ordinal: usize,
}

/// What an identifier resolves to at a point in time.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub id: ResourceId,
    pub layer_index: usize,
    pub layer_kind: LayerKind,
    /// xxh3 hash of the effective bytes.
    pub content_hash: u64,
    pub size: usize,
    /// `location#filename`, for diagnostics and patch-script comments.
    pub raw_location: String,
}

#[derive(Debug, Clone, Copy)]
struct Occurrence {
    layer_index: usize,
    ordinal: usize,
}

/// A precedence-resolved view over every layer of one installation.
///
/// Read-only after construction and shareable across threads; it borrows
/// the installation and never outlives it.
pub struct ResourceIndex<'a> {
    installation: &'a Installation,
    occurrences: HashMap<ResourceId, Vec<Occurrence>>,
    shadow_warnings: Vec<ShadowWarning>,
    layer_errors: Vec<Error>,
}

impl<'a> ResourceIndex<'a> {
    /// Walks every layer from lowest to highest priority and records every
    /// identifier seen. Unreadable layers degrade the index; their errors
    /// are kept in [`ResourceIndex::layer_errors`].
    pub fn build(installation: &'a Installation) -> Self {
        debug!(root = %installation.root().display(), "Building resource index");

        let mut occurrences: HashMap<ResourceId, Vec<Occurrence>> = HashMap::new();
        let mut shadow_warnings = Vec::new();
        let mut layer_errors: Vec<Error> = installation.diagnostics().to_vec();

        for (layer_index, layer) in installation.layers().iter().enumerate().rev() {
            layer_errors.extend(layer.diagnostics().iter().cloned());

            let mut seen_in_layer: HashMap<ResourceId, usize> = HashMap::new();
            for (ordinal, id) in layer.list().into_iter().enumerate() {
                if let Some(earlier) = seen_in_layer.insert(id.clone(), ordinal) {
                    warn!(resref = %id, layer = layer_index, "Duplicate identifier in layer");
                    shadow_warnings.push(ShadowWarning {
                        id: id.clone(),
                        layer_index,
                        shadowed_ordinal: earlier,
                    });
                }

                occurrences
                    .entry(id)
                    .or_default()
                    .push(Occurrence { layer_index, ordinal });
            }
        }

        Self {
            installation,
            occurrences,
            shadow_warnings,
            layer_errors,
        }
    }

    /// Returns the winning declaration for `id`: the highest-priority layer
    /// that defines it, taking the last declaration within that layer.
    pub fn resolve(&self, id: &ResourceId) -> Result<ResolvedResource> {
        let occurrence = self
            .winning_occurrence(id)
            .ok_or_else(|| Error::ResourceNotFound {
                identifier: id.filename(),
            })?;

        let layer = &self.installation.layers()[occurrence.layer_index];
        let bytes = layer.read(id).ok_or_else(|| Error::ResourceNotFound {
            identifier: id.filename(),
        })?;

        Ok(ResolvedResource {
            id: id.clone(),
            layer_index: occurrence.layer_index,
            layer_kind: layer.kind(),
            content_hash: xxh3_64(&bytes),
            size: bytes.len(),
            raw_location: format!("{}#{}", layer.location().display(), id.filename()),
        })
    }

    /// Reads the effective bytes for `id`, honoring precedence.
    pub fn read(&self, id: &ResourceId) -> Option<ByteBuffer> {
        let occurrence = self.winning_occurrence(id)?;
        self.installation.layers()[occurrence.layer_index].read(id)
    }

    /// Enumerates every declaration of `id` across all layers, highest
    /// priority first, with exactly one candidate flagged `would_win`.
    pub fn explain_resolution_order(&self, id: &ResourceId) -> Vec<Candidate> {
        let Some(occurrences) = self.occurrences.get(id) else {
            return Vec::new();
        };

        let mut sorted: Vec<Occurrence> = occurrences.clone();
        sorted.sort_by_key(|o| (o.layer_index, o.ordinal));

        let winner = self.winning_occurrence(id);

        sorted
            .into_iter()
            .map(|occurrence| {
                let layer = &self.installation.layers()[occurrence.layer_index];
                Candidate {
                    layer_index: occurrence.layer_index,
                    layer_kind: layer.kind(),
                    location: layer.location().display().to_string(),
                    ordinal: occurrence.ordinal,
                    would_win: winner.is_some_and(|w| {
                        w.layer_index == occurrence.layer_index && w.ordinal == occurrence.ordinal
                    }),
                }
            })
            .collect()
    }

    /// Renders [`ResourceIndex::explain_resolution_order`] as one line per
    /// candidate, for diagnostics.
    pub fn explain_text(&self, id: &ResourceId) -> String {
        let candidates = self.explain_resolution_order(id);
        if candidates.is_empty() {
            return format!("{}: not defined in any layer", id.filename());
        }

        let mut lines = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            lines.push(format!(
                "{} {:?} {} (entry {})",
                if candidate.would_win { "*" } else { " " },
                candidate.layer_kind,
                candidate.location,
                candidate.ordinal,
            ));
        }
        lines.join("\n")
    }

    /// The union of every identifier across all layers, in canonical order.
    pub fn collect_all_resource_identifiers(&self) -> BTreeSet<ResourceId> {
        self.occurrences.keys().cloned().collect()
    }

    /// Duplicate-in-layer declarations recorded during the build.
    pub fn shadow_warnings(&self) -> &[ShadowWarning] {
        &self.shadow_warnings
    }

    /// Per-layer errors recorded during the build. A non-empty list means
    /// the index is degraded, not wrong.
    pub fn layer_errors(&self) -> &[Error] {
        &self.layer_errors
    }

    fn winning_occurrence(&self, id: &ResourceId) -> Option<&Occurrence> {
        let occurrences = self.occurrences.get(id)?;
        let best_layer = occurrences.iter().map(|o| o.layer_index).min()?;
        occurrences
            .iter()
            .filter(|o| o.layer_index == best_layer)
            .max_by_key(|o| o.ordinal)
    }
}

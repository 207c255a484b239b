// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::path::Path;

use telos::common::{ResourceId, ResourceType};
use telos::diff::{DiffCache, DiffEngine, DiffType};
use telos::installation::Installation;
use telos::patch::{IncrementalTslPatchDataWriter, PatchGenerator};
use telos::resindex::ResourceIndex;
use telos::resource::LayerKind;

/// Builds a minimal ERF capsule holding the given entries.
fn build_capsule(entries: &[(&str, u16, &[u8])]) -> Vec<u8> {
    let header_size = 8 + 9 * 4 + 116;
    let offset_to_keys = header_size as u32;
    let offset_to_resources = offset_to_keys + 24 * entries.len() as u32;
    let mut data_offset = offset_to_resources + 8 * entries.len() as u32;

    let mut out = Vec::new();
    out.extend_from_slice(b"MOD V1.0");
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

    for (resref, code, _) in entries {
        let mut field = [0u8; 16];
        field[..resref.len()].copy_from_slice(resref.as_bytes());
        out.extend_from_slice(&field);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&code.to_le_bytes());
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

const UTD: u16 = 2042;

/// The "before" installation: one table, one creature, one shadowed door.
fn setup_left(root: &Path) {
    fs::create_dir_all(root.join("override")).unwrap();
    fs::create_dir_all(root.join("modules")).unwrap();

    fs::write(root.join("override/x.2da"), b"row one\nrow two\nrow three\n").unwrap();
    fs::write(root.join("override/y.utc"), b"creature kept on the left").unwrap();
    fs::write(root.join("override/door01.utd"), b"override door").unwrap();
    fs::write(
        root.join("modules/danm13.mod"),
        build_capsule(&[("door01", UTD, b"capsule door")]),
    )
    .unwrap();
}

/// The "after" installation: the table changed, `y.utc` is gone, `z.utc`
/// is new, and the door lost its override copy.
fn setup_right(root: &Path) {
    fs::create_dir_all(root.join("override")).unwrap();
    fs::create_dir_all(root.join("modules")).unwrap();

    fs::write(root.join("override/x.2da"), b"row one\nrow 2\nrow three\n").unwrap();
    fs::write(root.join("override/z.utc"), b"creature added on the right").unwrap();
    fs::write(
        root.join("modules/danm13.mod"),
        build_capsule(&[("door01", UTD, b"capsule door")]),
    )
    .unwrap();
}

#[test]
fn installation_diff_reports_added_removed_modified() {
    let left_dir = tempfile::tempdir().unwrap();
    let right_dir = tempfile::tempdir().unwrap();
    setup_left(left_dir.path());
    setup_right(right_dir.path());

    let left = Installation::from_existing(left_dir.path()).unwrap();
    let right = Installation::from_existing(right_dir.path()).unwrap();

    let engine = DiffEngine::new();
    let results: Vec<_> = engine
        .diff_installations_with_resolution(&left, &right, None)
        .map(|r| r.unwrap())
        .collect();

    let outcomes: Vec<(String, DiffType)> = results
        .iter()
        .map(|r| (r.left_label.clone(), r.diff_type))
        .collect();

    assert_eq!(
        outcomes,
        vec![
            // The override copy disappeared, but the capsule copy is the
            // same on both sides: the *resolved* door changed.
            ("door01.utd".to_string(), DiffType::Modified),
            ("x.2da".to_string(), DiffType::Modified),
            ("y.utc".to_string(), DiffType::Removed),
            ("z.utc".to_string(), DiffType::Added),
        ]
    );
}

#[test]
fn diffing_an_installation_against_itself_is_all_identical() {
    let dir = tempfile::tempdir().unwrap();
    setup_left(dir.path());

    let install = Installation::from_existing(dir.path()).unwrap();
    let engine = DiffEngine::new();

    for result in engine.diff_installations_with_resolution(&install, &install, None) {
        let result = result.unwrap();
        assert_eq!(result.diff_type, DiffType::Identical, "{}", result.left_label);
    }
}

#[test]
fn two_runs_emit_byte_identical_sequences() {
    let left_dir = tempfile::tempdir().unwrap();
    let right_dir = tempfile::tempdir().unwrap();
    setup_left(left_dir.path());
    setup_right(right_dir.path());

    let left = Installation::from_existing(left_dir.path()).unwrap();
    let right = Installation::from_existing(right_dir.path()).unwrap();

    let engine = DiffEngine::new();
    let cache = DiffCache::new();

    let run = |cache: Option<&DiffCache>| {
        engine
            .diff_installations_with_resolution(&left, &right, cache)
            .map(|r| format!("{:?}", r.unwrap()))
            .collect::<Vec<_>>()
    };

    let uncached = run(None);
    assert_eq!(uncached, run(None));
    // Going through the cache must not change the output either
    assert_eq!(uncached, run(Some(&cache)));
    assert_eq!(uncached, run(Some(&cache)));
}

#[test]
fn shadowed_resource_resolution_is_explainable() {
    let dir = tempfile::tempdir().unwrap();
    setup_left(dir.path());

    let install = Installation::from_existing(dir.path()).unwrap();
    let index = ResourceIndex::build(&install);

    let id = ResourceId::new("door01", ResourceType::Utd);
    let candidates = index.explain_resolution_order(&id);
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].layer_kind, LayerKind::Override);
    assert!(candidates[0].would_win);
    assert_eq!(candidates[1].layer_kind, LayerKind::Capsule);
    assert!(!candidates[1].would_win);

    assert_eq!(index.read(&id).unwrap(), b"override door");
}

#[test]
fn regenerated_patch_script_is_stable_on_disk() {
    let left_dir = tempfile::tempdir().unwrap();
    let right_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    setup_left(left_dir.path());
    setup_right(right_dir.path());

    let left = Installation::from_existing(left_dir.path()).unwrap();
    let right = Installation::from_existing(right_dir.path()).unwrap();
    let engine = DiffEngine::new();

    let generate = || {
        let results = engine
            .diff_installations_with_resolution(&left, &right, None)
            .map(|r| r.unwrap());
        PatchGenerator::generate_from_diff(results)
    };

    let script = generate();
    PatchGenerator::validate_tslpatchdata_arguments(out_dir.path(), &script).unwrap();

    let writer = IncrementalTslPatchDataWriter::new(out_dir.path());
    let path = writer.write(&script).unwrap();
    let first = fs::read(&path).unwrap();

    // Regenerating from scratch and re-writing must not move a byte
    writer.write(&generate()).unwrap();
    let second = fs::read(&path).unwrap();
    assert_eq!(first, second);

    let text = String::from_utf8(first).unwrap();
    assert!(text.contains("z.utc=z.utc"));
    assert!(text.contains("; removed: y.utc"));
    // Unstructured modifications fall back to whole-file replacement
    assert!(text.contains("Replacex.2da=x.2da"));
    assert!(text.contains("Replacedoor01.utd=door01.utd"));
}

#[test]
fn staged_payloads_accompany_the_script() {
    let right_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    setup_right(right_dir.path());

    let right = Installation::from_existing(right_dir.path()).unwrap();
    let index = ResourceIndex::build(&right);

    let writer = IncrementalTslPatchDataWriter::new(out_dir.path());
    let id = ResourceId::new("z", ResourceType::Utc);
    let bytes = index.read(&id).unwrap();
    let staged = writer.stage_payload(&id.filename(), &bytes).unwrap();

    assert_eq!(fs::read(staged).unwrap(), b"creature added on the right");
}

//! Registry identity properties: hash determinism, path-key normalization
//! and consistency of the lookup indices after a load.

use archive_catalog::registry::{
    FilePointer, Registry, RegistryError, RegistrySnapshot, build_path_key, hash_key,
};
use proptest::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// One path segment: a placeholder, a dot segment or a plain name.
fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z][A-Za-z0-9_]{0,8}".prop_map(|v| format!("{{{{{v}}}}}")),
        Just(".".to_string()),
        Just("..".to_string()),
        "[A-Za-z0-9 _.-]{1,12}",
    ]
}

fn raw_key() -> impl Strategy<Value = String> {
    (
        any::<bool>(),
        prop::collection::vec(segment(), 1..6),
        prop::collection::vec(Just("/"), 1..3),
    )
        .prop_map(|(rooted, segs, sep)| {
            let body = segs.join(&sep.concat());
            if rooted { format!("/{body}") } else { body }
        })
}

proptest! {
    #[test]
    fn hash_is_deterministic(key in raw_key()) {
        let a = hash_key(&key);
        let b = hash_key(&key.clone());
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), 40);
        prop_assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn path_key_is_idempotent(key in raw_key()) {
        let once = build_path_key(&key);
        let twice = build_path_key(&once);
        prop_assert_eq!(&once, &twice);
        prop_assert!(!once.contains("{{"));
        prop_assert!(!once.contains("//"));
    }

    #[test]
    fn pointers_are_reachable_through_every_index(
        keys in prop::collection::btree_set("[a-z]{1,6}(/[a-z0-9]{1,6}){0,3}\\.cbz", 1..40)
    ) {
        let lines: Vec<String> = keys.iter().map(|k| format!("{{{{Lib}}}}/{k}")).collect();
        let snap = RegistrySnapshot::from_lines(&lines, Path::new("/db/meta")).unwrap();
        let n = lines.len();
        prop_assert_eq!(snap.index_sizes(), (n, n, n, n));
        for (pointer, line) in snap.all().iter().zip(&lines) {
            prop_assert_eq!(&pointer.key, line);
            prop_assert_eq!(&snap.lookup(&pointer.hash).unwrap().key, line);
            prop_assert_eq!(&snap.by_key(line).unwrap().hash, &pointer.hash);
            prop_assert_eq!(&snap.by_path_key(&pointer.path_key).unwrap().hash, &pointer.hash);
        }
    }
}

#[test]
fn path_key_uses_lowercased_variable_names() {
    assert_eq!(
        build_path_key("{{Library}}//Series/./Vol 1.cbz"),
        "library/Series/Vol 1.cbz"
    );
    let p = FilePointer::new("{{Library}}/Series/Vol 1.cbz", Path::new("/db/meta")).unwrap();
    assert_eq!(p.meta_path, Path::new("/db/meta/library/Series/Vol 1.cbz"));
}

#[test]
fn unreadable_manifest_is_a_structural_error() {
    let tmp = TempDir::new().unwrap();
    let err = Registry::load(&tmp.path().join("missing.txt"), &tmp.path().join("meta"))
        .err()
        .expect("load must fail");
    assert!(matches!(err, RegistryError::Manifest { .. }));
}

#[test]
fn one_bad_line_fails_the_whole_load_and_reload_keeps_the_old_state() {
    let tmp = TempDir::new().unwrap();
    let manifest = tmp.path().join("files.txt");
    let meta = tmp.path().join("meta");
    fs::write(&manifest, "{{Lib}}/a.cbz\n{{Lib}}/b.cbz\n").unwrap();
    let registry = Registry::load(&manifest, &meta).unwrap();
    assert_eq!(registry.len(), 2);

    fs::write(&manifest, "{{Lib}}/a.cbz\n{{Lib}}/c.cbz\n{{Lib/broken.cbz\n").unwrap();
    let err = registry.reload().unwrap_err();
    assert!(matches!(err, RegistryError::InvalidKey { line: 3, .. }), "{err}");
    assert_eq!(registry.len(), 2);
    assert!(registry.lookup(&hash_key("{{Lib}}/b.cbz")).is_some());

    fs::write(&manifest, "{{Lib}}/a.cbz\n{{Lib}}/c.cbz\n{{Lib}}/d.cbz\n").unwrap();
    assert_eq!(registry.reload().unwrap(), (2, 3));
    assert!(registry.lookup(&hash_key("{{Lib}}/b.cbz")).is_none());
    assert!(registry.lookup(&hash_key("{{Lib}}/d.cbz")).is_some());
}

#[test]
fn snapshots_taken_before_reload_stay_consistent() {
    let tmp = TempDir::new().unwrap();
    let manifest = tmp.path().join("files.txt");
    fs::write(&manifest, "{{Lib}}/a.cbz\n").unwrap();
    let registry = Registry::load(&manifest, &tmp.path().join("meta")).unwrap();
    let before = registry.snapshot();

    fs::write(&manifest, "{{Lib}}/x.cbz\n{{Lib}}/y.cbz\n").unwrap();
    registry.reload().unwrap();

    assert_eq!(before.len(), 1);
    assert_eq!(before.index_sizes(), (1, 1, 1, 1));
    assert_eq!(registry.snapshot().len(), 2);
}

#[test]
fn files_listing_serializes_in_manifest_order() {
    let snap = RegistrySnapshot::from_lines(["{{Lib}}/z.cbz", "{{Lib}}/a.cbz"], Path::new("/m"))
        .unwrap();
    let json = serde_json::to_value(snap.all()).unwrap();
    assert_eq!(json[0]["key"], "{{Lib}}/z.cbz");
    assert_eq!(json[1]["path_key"], "lib/a.cbz");
    assert_eq!(json[1]["hash"], hash_key("{{Lib}}/a.cbz"));
}

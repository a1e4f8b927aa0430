//! End-to-end flows through the catalog service against a real on-disk index.

use archive_catalog::catalog::{Catalog, ReloadError};
use archive_catalog::indexer::JobPhase;
use archive_catalog::metadata::MutationError;
use archive_catalog::search::query::{SearchRequest, SortField, build_search_term};
use serde_json::json;
use std::fs;
use std::io::Read;

mod util;
use util::{CatalogFixture, TestTracing};

fn reindex(catalog: &Catalog) {
    catalog.start_reindex().unwrap();
    catalog.wait_reindex();
}

fn seeded() -> (CatalogFixture, Vec<String>) {
    let mut fx = CatalogFixture::new();
    let a = fx.add_book("series-a/vol1", &["01.png", "02.png", "03.png"]);
    let b = fx.add_tar_book("series-a/vol2.cbt", &["01.png", "02.png", "info.yaml"]);
    let c = fx.add_book("loose/oneshot", &["cover.jpg"]);
    fx.write_static(
        &a,
        json!({
            "id": 7,
            "title": "Alpha Volume",
            "collection": "Series A",
            "artist": "Jane Roe",
            "tags": ["action", "slice of life"],
            "pages": 3,
            "created_at": "2020-01-02T03:04:05Z"
        }),
    );
    (fx, vec![a, b, c])
}

#[test]
fn reindex_makes_every_item_searchable() {
    let (fx, keys) = seeded();
    let catalog = fx.open();
    reindex(&catalog);

    let status = catalog.reindex_status();
    assert!(!status.running);
    assert_eq!(status.phase, JobPhase::Completed);
    assert_eq!((status.processed, status.ok, status.error, status.total), (3, 3, 0, 3));
    assert_eq!(status.log, vec!["Processing final batch of 3 files", "100% done!"]);

    let all = catalog.search(&SearchRequest::new("")).unwrap();
    assert_eq!(all.total, 3);

    let by_artist = catalog
        .search(&SearchRequest::new(build_search_term("artist", "Jane Roe")))
        .unwrap();
    assert_eq!(by_artist.total, 1);
    let doc = &by_artist.hits[0];
    assert_eq!(doc.id, fx.pointer(&keys[0]).hash);
    assert_eq!(doc.source_id, 7);
    assert_eq!(doc.title, "Alpha Volume");

    let tar_book = catalog
        .search(&SearchRequest::new(build_search_term("id", &fx.pointer(&keys[1]).hash)))
        .unwrap();
    assert_eq!(tar_book.hits[0].pages, 2, "sidecar yaml entries are not pages");
    assert_eq!(tar_book.hits[0].title, "library/series-a/vol2.cbt");
}

#[test]
fn pending_lists_items_without_authored_collection() {
    let (fx, keys) = seeded();
    let catalog = fx.open();
    reindex(&catalog);

    let pending = catalog.pending().unwrap();
    assert_eq!(pending.len(), 2);
    let b = fx.pointer(&keys[1]);
    assert_eq!(pending.get(&b.hash).map(String::as_str), Some(b.path_key.as_str()));

    let item = catalog.item(&b.hash).unwrap();
    assert_eq!(item.static_meta.collection, format!("No Collection ({})", b.dir_hash()));
}

#[test]
fn mutations_are_persisted_and_reindexed() {
    let (fx, keys) = seeded();
    let catalog = fx.open();
    reindex(&catalog);
    let hash = fx.pointer(&keys[2]).hash;

    catalog.set_rating(&hash, 5, false).unwrap();
    catalog.add_mark(&hash).unwrap();
    catalog.add_mark(&hash).unwrap();
    catalog.sub_mark(&hash).unwrap();
    catalog.set_cover(&hash, "cover.jpg").unwrap();

    let top = catalog
        .search(&SearchRequest::new("").sorted_by(SortField::parse("-rating").unwrap()))
        .unwrap();
    let first = &top.hits[0];
    assert_eq!(first.id, hash);
    assert_eq!((first.rating, first.marks), (5, 1));
    assert_eq!(first.cover, "cover.jpg");
    assert!(first.updated_at.is_some());

    // Fresh load reads the saved dynamic metadata back.
    let item = catalog.item(&hash).unwrap();
    assert_eq!(item.dynamic_meta.rating, 5);
    assert_eq!(item.dynamic_meta.marks, 1);
}

#[test]
fn validation_errors_leave_disk_untouched() {
    let (fx, keys) = seeded();
    let catalog = fx.open();
    let pointer = fx.pointer(&keys[0]);

    for bad in [6, -1] {
        assert!(matches!(
            catalog.set_rating(&pointer.hash, bad, false),
            Err(MutationError::RatingOutOfRange(_))
        ));
    }
    assert!(matches!(
        catalog.set_cover(&pointer.hash, "99.png"),
        Err(MutationError::CoverNotFound { .. })
    ));
    assert!(!pointer.dynamic_meta_path().exists());
    assert!(matches!(
        catalog.add_mark("0000000000000000000000000000000000000000"),
        Err(MutationError::NotFound(_))
    ));
}

#[test]
fn cover_on_missing_archive_reports_the_archive() {
    let mut fx = CatalogFixture::new();
    let key = fx.add_missing("gone/vol9.cbt");
    let catalog = fx.open();
    let err = catalog.set_cover(&fx.pointer(&key).hash, "01.png").unwrap_err();
    assert!(matches!(err, MutationError::Archive { .. }), "{err}");
}

#[test]
fn reload_picks_up_manifest_changes() {
    let (mut fx, _) = seeded();
    let catalog = fx.open();
    let added = fx.add_book("late/addition", &["a.png"]);

    assert_eq!(catalog.reload().unwrap(), (3, 4));
    assert!(catalog.item(&fx.pointer(&added).hash).is_ok());

    fs::write(fx.manifest(), "{{Library}}/ok\n{{}}/bad\n").unwrap();
    assert!(matches!(catalog.reload(), Err(ReloadError::Registry(_))));
    assert_eq!(catalog.files().len(), 4);
}

#[test]
fn reindex_status_before_any_run_is_idle() {
    let (fx, _) = seeded();
    let catalog = fx.open();
    let status = catalog.reindex_status();
    assert_eq!(status.phase, JobPhase::Idle);
    assert!(!status.running);
    assert!(!catalog.cancel_reindex());
}

#[test]
fn second_reindex_after_completion_is_allowed() {
    let (fx, _) = seeded();
    let catalog = fx.open();
    reindex(&catalog);
    assert_eq!(catalog.start_reindex(), Ok(()));
    catalog.wait_reindex();
    assert_eq!(catalog.search(&SearchRequest::new("")).unwrap().total, 3);
}

#[test]
fn index_survives_reopen() {
    let (fx, _) = seeded();
    {
        let catalog = fx.open();
        reindex(&catalog);
    }
    let catalog = fx.open();
    assert_eq!(catalog.index().num_docs(), 3);
    assert_eq!(
        fx.config().index_path(),
        fx.database().join("index").join("v1")
    );
}

#[test]
fn page_count_fallback_is_logged() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();
    let (fx, keys) = seeded();
    let catalog = fx.open();
    let item = catalog.item(&fx.pointer(&keys[2]).hash).unwrap();
    assert_eq!(item.static_meta.pages, 1);
    tracing.assert_contains("dynamic page count");
}

#[test]
fn entries_stream_from_directories_and_tar_archives() {
    let (fx, keys) = seeded();
    let catalog = fx.open();
    for (key, entry) in [(&keys[0], "03.png"), (&keys[1], "01.png")] {
        let mut body = String::new();
        catalog
            .open_entry(&fx.pointer(key).hash, entry)
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, entry);
    }
    assert!(catalog.open_entry(&fx.pointer(&keys[0]).hash, "../vol2.cbt").is_err());
    assert!(catalog.open_entry("ffff", "01.png").is_err());
}

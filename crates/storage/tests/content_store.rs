#![forbid(unsafe_code)]

mod common;

use bw_storage::{AddChapterRequest, StoreError, WriteRevisionRequest};
use common::{add_chapters, author, open_store, revision};
use proptest::prelude::*;
use rusqlite::{Connection, params};

#[test]
fn revision_is_visible_from_its_chapter_onwards() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 11);
    let (_, block) = author(&mut fx.store);

    let written = fx
        .store
        .write_revision(revision(3, "kelp-town", "Kelp Town", block))
        .expect("write revision");

    let view = fx.store.view();
    assert_eq!(view.read_current(2, "kelp-town").expect("read"), None);
    assert_eq!(view.read_current(3, "kelp-town").expect("read"), Some(written.clone()));
    assert_eq!(view.read_current(10, "kelp-town").expect("read"), Some(written));
}

#[test]
fn later_revision_shadows_only_later_chapters() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 6);
    let (_, block) = author(&mut fx.store);

    let first = fx
        .store
        .write_revision(revision(1, "bree", "Bree", block))
        .expect("first");
    let second = fx
        .store
        .write_revision(WriteRevisionRequest {
            body: "Bree, a village of Men and Hobbits.".to_string(),
            ..revision(4, "bree", "Bree", block)
        })
        .expect("second");

    let view = fx.store.view();
    assert_eq!(view.read_current(1, "bree").expect("read").map(|p| p.id), Some(first.id));
    assert_eq!(view.read_current(3, "bree").expect("read").map(|p| p.id), Some(first.id));
    assert_eq!(view.read_current(4, "bree").expect("read").map(|p| p.id), Some(second.id));
    assert_eq!(view.read_current(5, "bree").expect("read").map(|p| p.id), Some(second.id));

    let history = view.read_history("bree").expect("history");
    assert_eq!(history.iter().map(|p| p.id).collect::<Vec<_>>(), vec![first.id, second.id]);
}

#[test]
fn same_chapter_rewrite_replaces_the_pointer() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 3);
    let (_, block) = author(&mut fx.store);

    fx.store
        .write_revision(revision(1, "moria", "Moria", block))
        .expect("first");
    let second = fx
        .store
        .write_revision(revision(1, "moria", "Khazad-dum", block))
        .expect("second");

    let current = fx.store.view().read_current(2, "moria").expect("read");
    assert_eq!(current.map(|p| p.title), Some(second.title));
    assert!(fx.store.view().verify_current().expect("verify").is_empty());
}

#[test]
fn back_dated_write_is_refused() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 5);
    let (_, block) = author(&mut fx.store);

    fx.store
        .write_revision(revision(3, "rivendell", "Rivendell", block))
        .expect("write at 3");
    let err = fx
        .store
        .write_revision(revision(1, "rivendell", "Imladris", block))
        .expect_err("back-dated write must fail");
    match err {
        StoreError::SlugConflict { slug, later_chapter } => {
            assert_eq!(slug, "rivendell");
            assert_eq!(later_chapter, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(fx.store.view().read_history("rivendell").expect("history").len(), 1);
}

#[test]
fn tombstone_hides_the_slug_from_its_chapter() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 4);
    let (_, block) = author(&mut fx.store);

    fx.store
        .write_revision(revision(0, "old-forest", "Old Forest", block))
        .expect("write");
    fx.store
        .write_revision(WriteRevisionRequest::tombstone(2, "old-forest", block))
        .expect("tombstone");

    let view = fx.store.view();
    assert!(view.read_current(1, "old-forest").expect("read").is_some());
    assert!(view.read_current(2, "old-forest").expect("read").is_none());
    assert!(view.read_current(3, "old-forest").expect("read").is_none());
    assert!(view.read_visible_lazy(3, "old-forest").expect("lazy").is_none());
    assert_eq!(view.read_history("old-forest").expect("history").len(), 2);
}

#[test]
fn chapter_added_later_inherits_visible_pages() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 2);
    let (_, block) = author(&mut fx.store);
    let page = fx
        .store
        .write_revision(revision(1, "shire", "The Shire", block))
        .expect("write");

    fx.store
        .add_chapter(AddChapterRequest {
            id: 2,
            name: vec!["Book One".to_string(), "Chapter 3".to_string()],
            text: "More text.".to_string(),
        })
        .expect("add chapter");

    assert_eq!(
        fx.store.view().read_current(2, "shire").expect("read").map(|p| p.id),
        Some(page.id)
    );
}

#[test]
fn invalid_revisions_are_rejected() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 2);
    let (_, block) = author(&mut fx.store);

    let err = fx
        .store
        .write_revision(revision(1, "two words", "Two Words", block))
        .expect_err("slug with whitespace");
    assert!(matches!(err, StoreError::InvalidInput(_)), "{err:?}");

    let err = fx
        .store
        .write_revision(revision(7, "bree", "Bree", block))
        .expect_err("unknown chapter");
    assert!(matches!(err, StoreError::UnknownChapter(7)), "{err:?}");

    let err = fx
        .store
        .write_revision(WriteRevisionRequest {
            names: Vec::new(),
            ..revision(1, "bree", "Bree", block)
        })
        .expect_err("no names");
    assert!(matches!(err, StoreError::InvalidInput(_)), "{err:?}");
}

#[test]
fn chapter_page_changes_split_created_and_updated() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 3);
    let (_, block) = author(&mut fx.store);

    fx.store
        .write_revision(revision(0, "frodo", "Frodo", block))
        .expect("frodo");
    fx.store
        .write_revision(revision(1, "frodo", "Frodo Baggins", block))
        .expect("frodo again");
    fx.store
        .write_revision(revision(1, "sam", "Sam", block))
        .expect("sam");

    let changes = fx.store.view().chapter_page_changes(1).expect("changes");
    assert_eq!(changes.created.iter().map(|p| p.slug.as_str()).collect::<Vec<_>>(), vec!["sam"]);
    assert_eq!(changes.updated.iter().map(|p| p.slug.as_str()).collect::<Vec<_>>(), vec!["frodo"]);
}

#[test]
fn corrupted_pointer_is_detected_and_rebuilt() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 4);
    let (_, block) = author(&mut fx.store);

    let early = fx
        .store
        .write_revision(revision(1, "weathertop", "Weathertop", block))
        .expect("early");
    let late = fx
        .store
        .write_revision(revision(3, "weathertop", "Amon Sul", block))
        .expect("late");

    {
        let raw = Connection::open(fx.dir.path().join("bookwiki.db")).expect("raw connection");
        raw.execute(
            "UPDATE wiki_page_current SET wiki_page=?1 WHERE chapter=1 AND slug='weathertop'",
            params![late.id],
        )
        .expect("corrupt pointer");
    }

    let err = fx
        .store
        .view()
        .read_current(1, "weathertop")
        .expect_err("later-chapter pointer must be refused");
    assert!(err.is_consistency_error(), "{err:?}");

    let mismatches = fx.store.view().verify_current().expect("verify");
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].chapter, 1);
    assert_eq!(mismatches[0].expected, Some(early.id));

    fx.store.rebuild_current().expect("rebuild");
    assert!(fx.store.view().verify_current().expect("verify").is_empty());
    assert_eq!(
        fx.store.view().read_current(1, "weathertop").expect("read").map(|p| p.id),
        Some(early.id)
    );
}

#[test]
fn reader_surface_hides_later_chapters_but_history_does_not() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 3);
    let (_, block) = author(&mut fx.store);

    fx.store
        .write_revision(revision(0, "lorien", "Lothlorien", block))
        .expect("write");
    fx.store
        .write_revision(revision(2, "galadriel", "Galadriel", block))
        .expect("write");
    fx.store
        .write_revision(WriteRevisionRequest::tombstone(2, "lorien", block))
        .expect("delete");

    let view = fx.store.view();
    assert!(view.current_wiki_state(1, "galadriel").expect("state").is_none());
    let titles: Vec<String> = view
        .current_wiki_state_all(1)
        .expect("all")
        .into_iter()
        .map(|page| page.title)
        .collect();
    assert_eq!(titles, vec!["Lothlorien"]);

    let history = view.page_history("lorien").expect("history");
    assert_eq!(history.len(), 2);
    assert!(history[1].deleted);

    let names = view.names_index(2).expect("names");
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].slug, "galadriel");
    let json = serde_json::to_value(&names[0]).expect("serialize");
    assert_eq!(json["name"], "Galadriel");
}

#[derive(Clone, Debug)]
enum Op {
    Write { chapter: i64, slug: usize },
    Delete { chapter: i64, slug: usize },
}

const SLUGS: [&str; 3] = ["hobbiton", "bag-end", "buckland"];
const CHAPTERS: i64 = 6;

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..CHAPTERS, 0..SLUGS.len()).prop_map(|(chapter, slug)| Op::Write { chapter, slug }),
        1 => (0..CHAPTERS, 0..SLUGS.len()).prop_map(|(chapter, slug)| Op::Delete { chapter, slug }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn visibility_never_leaks_later_chapters(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let mut fx = open_store();
        add_chapters(&mut fx.store, CHAPTERS);
        let (_, block) = author(&mut fx.store);

        for (step, op) in ops.iter().enumerate() {
            let request = match op {
                Op::Write { chapter, slug } => {
                    revision(*chapter, SLUGS[*slug], &format!("{} v{step}", SLUGS[*slug]), block)
                }
                Op::Delete { chapter, slug } => {
                    WriteRevisionRequest::tombstone(*chapter, SLUGS[*slug], block)
                }
            };
            match fx.store.write_revision(request) {
                Ok(_) | Err(StoreError::SlugConflict { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        let view = fx.store.view();
        prop_assert!(view.verify_current().expect("verify").is_empty());
        for slug in SLUGS {
            let mut previous: Option<(i64, Option<i64>)> = None;
            for chapter in 0..CHAPTERS {
                let current = view.read_current(chapter, slug).expect("read");
                let lazy = view.read_visible_lazy(chapter, slug).expect("lazy");
                prop_assert_eq!(current.as_ref().map(|p| p.id), lazy.as_ref().map(|p| p.id));
                if let Some(page) = &current {
                    prop_assert!(page.chapter <= chapter);
                }
                if let (Some((prev_chapter, prev_id)), Some(page)) = (previous, &current) {
                    prop_assert!(
                        Some(page.id) == prev_id || page.chapter > prev_chapter,
                        "revision {} at chapter {} is older than what chapter {} showed",
                        page.id, chapter, prev_chapter
                    );
                }
                previous = Some((chapter, current.map(|p| p.id)));
            }
        }
    }
}

#[test]
fn chapter_before_walks_ids_with_gaps() {
    let mut fx = open_store();
    for id in [0, 4, 9] {
        fx.store
            .add_chapter(AddChapterRequest {
                id,
                name: vec![format!("Part {id}")],
                text: format!("Text {id}."),
            })
            .expect("add chapter");
    }
    let view = fx.store.view();
    let id = |steps| view.chapter_before(9, steps).expect("lookup").map(|row| row.id);
    assert_eq!(id(0), Some(9));
    assert_eq!(id(1), Some(4));
    assert_eq!(id(2), Some(0));
    assert_eq!(id(3), None);
    assert!(view.chapter_before(5, 0).expect("lookup").is_none());
}

mod common;

use common::*;
use rill_protocol::{empty_hash, MutationKind};
use serde_json::json;

const THREAD_VIEW: &str =
    "SELECT *, (SELECT * FROM author WHERE id = $parent.author)[0] AS ad FROM thread";

/// A parent row expands its correlated subquery and versions the
/// matched child alongside itself.
#[test]
fn subquery_children_enter_the_version_array() {
    let mut p = setup();
    ingest(&mut p, "author", MutationKind::Create, "a", json!({"name": "A"}));

    let initial = register(&mut p, "v2", THREAD_VIEW);
    assert_eq!(initial.result_hash, empty_hash());
    assert!(initial.records.is_empty());

    let updates = ingest(
        &mut p,
        "thread",
        MutationKind::Create,
        "t",
        json!({"author": "author:a"}),
    );
    assert_eq!(updates.len(), 1);
    assert_eq!(
        versions(&updates[0]),
        vec![("author:a", 1), ("thread:t", 1)]
    );

    let rows = p.view("v2").unwrap().rows();
    assert_eq!(rows.len(), 1);
    let ad = rows[0].data.get("ad").expect("expanded author");
    assert_eq!(
        ad.get("name").and_then(rill::Datum::as_str),
        Some("A")
    );
}

/// Updating a child record bumps the parent row (its projected content
/// changed) and the child's own version.
#[test]
fn child_update_bumps_the_parent_version() {
    let mut p = setup();
    ingest(&mut p, "author", MutationKind::Create, "a", json!({"name": "A"}));
    register(&mut p, "v2", THREAD_VIEW);
    ingest(
        &mut p,
        "thread",
        MutationKind::Create,
        "t",
        json!({"author": "author:a"}),
    );

    let updates = ingest(&mut p, "author", MutationKind::Update, "a", json!({"name": "A2"}));
    assert_eq!(updates.len(), 1);
    assert_eq!(
        versions(&updates[0]),
        vec![("author:a", 2), ("thread:t", 2)]
    );

    let rows = p.view("v2").unwrap().rows();
    let ad = rows[0].data.get("ad").unwrap();
    assert_eq!(ad.get("name").and_then(rill::Datum::as_str), Some("A2"));
}

/// Record links may arrive as `{tb, id}` objects; they normalize to the
/// canonical string and resolve the same way.
#[test]
fn heterogeneous_ids_normalize_before_hashing() {
    let mut a = setup();
    ingest(&mut a, "author", MutationKind::Create, "a", json!({"name": "A"}));
    register(&mut a, "v2", THREAD_VIEW);
    ingest(
        &mut a,
        "thread",
        MutationKind::Create,
        "t",
        json!({"author": {"tb": "author", "id": "a"}}),
    );

    let mut b = setup();
    ingest(&mut b, "author", MutationKind::Create, "a", json!({"name": "A"}));
    register(&mut b, "v2", THREAD_VIEW);
    ingest(
        &mut b,
        "thread",
        MutationKind::Create,
        "t",
        json!({"author": "author:a"}),
    );

    assert_eq!(
        a.view_state("v2").unwrap(),
        b.view_state("v2").unwrap()
    );
}

/// An unrelated child record does not leak into the view.
#[test]
fn unmatched_children_stay_out() {
    let mut p = setup();
    ingest(&mut p, "author", MutationKind::Create, "a", json!({"name": "A"}));
    ingest(&mut p, "author", MutationKind::Create, "b", json!({"name": "B"}));
    register(&mut p, "v2", THREAD_VIEW);

    let updates = ingest(
        &mut p,
        "thread",
        MutationKind::Create,
        "t",
        json!({"author": "author:a"}),
    );
    assert_eq!(
        versions(&updates[0]),
        vec![("author:a", 1), ("thread:t", 1)]
    );

    // Updating the unmatched author changes nothing in this view.
    let silent = ingest(&mut p, "author", MutationKind::Update, "b", json!({"name": "B2"}));
    assert!(silent.is_empty());
}

/// List-shaped subqueries (no `[0]`) project every matching child.
#[test]
fn list_subquery_collects_all_matches() {
    let mut p = setup();
    ingest(&mut p, "comment", MutationKind::Create, "c1", json!({"thread": "thread:t", "text": "one"}));
    ingest(&mut p, "comment", MutationKind::Create, "c2", json!({"thread": "thread:t", "text": "two"}));
    ingest(&mut p, "thread", MutationKind::Create, "t", json!({"title": "hi"}));

    let update = register(
        &mut p,
        "v3",
        "SELECT *, (SELECT * FROM comment WHERE thread = $parent.id) AS cs FROM thread",
    );
    assert_eq!(
        versions(&update),
        vec![("comment:c1", 1), ("comment:c2", 1), ("thread:t", 1)]
    );

    let rows = p.view("v3").unwrap().rows();
    let cs = rows[0].data.get("cs").and_then(rill::Datum::as_array).unwrap();
    assert_eq!(cs.len(), 2);
}

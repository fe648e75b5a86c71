//! Property tests for ordering, limits and the update merge law.

use portal_store::{Document, Store, StoreConfig};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Store {
    let config = StoreConfig {
        sync_on_commit: false,
        ..StoreConfig::new(dir.path().join("store")).with_collections(["items"])
    };
    Store::open(config).unwrap()
}

fn doc(value: Value) -> Document {
    Document::from_value(value).unwrap()
}

fn ranks(rows: &[Document]) -> Vec<i64> {
    rows.iter()
        .map(|d| d.get("rank").and_then(Value::as_i64).unwrap())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_order_sorts_and_limit_truncates(
        values in vec(-1000i64..1000, 0..40),
        limit in 0usize..50,
        ascending in any::<bool>(),
    ) {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store
            .from("items")
            .insert(values.iter().map(|v| doc(json!({ "rank": v }))))
            .into_result()
            .unwrap();

        let rows = store
            .from("items")
            .order("rank", ascending)
            .execute()
            .into_result()
            .unwrap();
        let mut expected = values.clone();
        expected.sort();
        if !ascending {
            expected.reverse();
        }
        prop_assert_eq!(ranks(&rows), expected.clone());

        let limited = store
            .from("items")
            .order("rank", ascending)
            .limit(limit)
            .execute()
            .into_result()
            .unwrap();
        let n = limit.min(values.len());
        prop_assert_eq!(ranks(&limited), expected[..n].to_vec());
    }

    #[test]
    fn prop_update_is_shallow_merge(
        existing in btree_map("[a-e]", any::<i32>(), 0..5),
        patch in btree_map("[a-g]", any::<i32>(), 0..5),
    ) {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let mut original = Document::new();
        original.insert("id", "target");
        for (k, v) in &existing {
            original.insert(k.clone(), *v);
        }
        store.from("items").insert([original]).into_result().unwrap();

        let mut changes = Document::new();
        for (k, v) in &patch {
            changes.insert(k.clone(), *v);
        }
        let updated = store
            .from("items")
            .eq("id", "target")
            .update(changes)
            .into_result()
            .unwrap();

        let mut expected: BTreeMap<String, i32> = existing.clone();
        expected.extend(patch.clone());

        prop_assert_eq!(updated.len(), 1);
        let stored = store.collection("items").unwrap().get("target").unwrap();
        prop_assert_eq!(&stored, &updated[0]);
        prop_assert_eq!(stored.id(), Some("target"));
        prop_assert!(stored.get("created_at").is_some());
        for (k, v) in &expected {
            prop_assert_eq!(stored.get(k), Some(&json!(v)));
        }
        // id, created_at and the merged keys; nothing else.
        prop_assert_eq!(stored.len(), expected.len() + 2);
    }

    #[test]
    fn prop_generated_ids_are_unique(count in 1usize..60) {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let written = store
            .from("items")
            .insert((0..count).map(|_| Document::new()))
            .into_result()
            .unwrap();

        let mut ids: Vec<_> = written.iter().map(|d| d.id().unwrap().to_string()).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), count);
        prop_assert_eq!(store.collection("items").unwrap().count(), count);
    }
}

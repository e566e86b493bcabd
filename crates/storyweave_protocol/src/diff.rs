//! State diff engine.

use crate::operation::Operation;
use crate::schema::{is_collection, COLLECTIONS, SCHEMA_VERSION_KEY};
use std::collections::BTreeMap;
use storyweave_codec::{to_canonical_json, Value};

/// Computes the ordered op list transforming `old` into `new`.
///
/// Emission order is fixed and deterministic:
/// 1. `set schema_version` if the designated scalar differs
/// 2. one whole-value `set` (or `delete`) per changed top-level side-table
///    (`custom_titles`, `export_settings`, ... — anything that is not a
///    collection), in key order
/// 3. per collection, in [`COLLECTIONS`] order: deletions first, then
///    upserts for entities whose canonical encoding differs
///
/// An empty result means the states are canonically equal; callers must
/// treat that as "nothing to send".
pub fn diff_states(old: &Value, new: &Value) -> Vec<Operation> {
    static EMPTY: BTreeMap<String, Value> = BTreeMap::new();
    let old_map = old.as_map().unwrap_or(&EMPTY);
    let new_map = new.as_map().unwrap_or(&EMPTY);

    let mut ops = Vec::new();

    // The designated scalar goes first, then the side-tables (small,
    // rarely contended, replaced whole) in key order. Comparison is by
    // canonical encoding, presence included, so the round-trip property
    // holds for every tree.
    let mut side_keys: Vec<&str> = old_map
        .keys()
        .chain(new_map.keys())
        .map(String::as_str)
        .filter(|k| *k != SCHEMA_VERSION_KEY && !is_collection(k))
        .collect();
    side_keys.sort_unstable();
    side_keys.dedup();
    side_keys.insert(0, SCHEMA_VERSION_KEY);
    for key in side_keys {
        match (old_map.get(key), new_map.get(key)) {
            (Some(_), None) => ops.push(Operation::delete(key)),
            (old_value, Some(new_value)) => {
                let changed = old_value
                    .map(|v| to_canonical_json(v) != to_canonical_json(new_value))
                    .unwrap_or(true);
                if changed {
                    ops.push(Operation::set(key, new_value.clone()));
                }
            }
            (None, None) => {}
        }
    }

    // Collections, in fixed order.
    for collection in COLLECTIONS {
        let old_entities = collection_map(old_map.get(collection));
        let new_entities = collection_map(new_map.get(collection));

        // Hard deletions are rare in the editor, but keep them safe.
        for id in old_entities.keys() {
            if !new_entities.contains_key(id) {
                ops.push(Operation::delete(format!("{collection}.{id}")));
            }
        }

        for (id, entity) in new_entities {
            let changed = match old_entities.get(id) {
                Some(old_entity) => to_canonical_json(old_entity) != to_canonical_json(entity),
                None => true,
            };
            if changed {
                ops.push(Operation::upsert(collection, id.as_str(), entity.clone()));
            }
        }
    }

    ops
}

fn collection_map(value: Option<&Value>) -> &BTreeMap<String, Value> {
    static EMPTY: BTreeMap<String, Value> = BTreeMap::new();
    value.and_then(Value::as_map).unwrap_or(&EMPTY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::apply_ops;

    fn state_with_character(name: &str) -> Value {
        Value::object(vec![(
            "characters",
            Value::object(vec![(
                "c1",
                Value::object(vec![("name", Value::from(name))]),
            )]),
        )])
    }

    #[test]
    fn identical_states_produce_empty_diff() {
        let state = state_with_character("Aria");
        assert!(diff_states(&state, &state.clone()).is_empty());
    }

    #[test]
    fn upsert_against_empty_baseline() {
        let old = Value::object(vec![("characters", Value::empty_map())]);
        let new = state_with_character("Aria");

        let ops = diff_states(&old, &new);
        assert_eq!(
            ops,
            vec![Operation::upsert(
                "characters",
                "c1",
                Value::object(vec![("name", Value::from("Aria"))]),
            )]
        );
    }

    #[test]
    fn deletions_emitted_before_upserts_within_a_collection() {
        let old = Value::object(vec![(
            "characters",
            Value::object(vec![
                ("c1", Value::object(vec![("name", Value::from("A"))])),
                ("c2", Value::object(vec![("name", Value::from("B"))])),
            ]),
        )]);
        let new = Value::object(vec![(
            "characters",
            Value::object(vec![
                ("c2", Value::object(vec![("name", Value::from("B2"))])),
                ("c3", Value::object(vec![("name", Value::from("C"))])),
            ]),
        )]);

        let ops = diff_states(&old, &new);
        assert_eq!(
            ops,
            vec![
                Operation::delete("characters.c1"),
                Operation::upsert(
                    "characters",
                    "c2",
                    Value::object(vec![("name", Value::from("B2"))]),
                ),
                Operation::upsert(
                    "characters",
                    "c3",
                    Value::object(vec![("name", Value::from("C"))]),
                ),
            ]
        );
    }

    #[test]
    fn collections_emitted_in_fixed_order() {
        let entity = Value::object(vec![("name", Value::from("x"))]);
        let new = Value::object(vec![
            ("goals", Value::object(vec![("g1", entity.clone())])),
            ("characters", Value::object(vec![("c1", entity.clone())])),
            ("factions", Value::object(vec![("f1", entity.clone())])),
        ]);

        let ops = diff_states(&Value::empty_map(), &new);
        let collections: Vec<&str> = ops
            .iter()
            .map(|op| match op {
                Operation::UpsertEntity { collection, .. } => collection.as_str(),
                other => panic!("unexpected op {other:?}"),
            })
            .collect();
        assert_eq!(collections, ["characters", "factions", "goals"]);
    }

    #[test]
    fn schema_version_change_is_one_set() {
        let old = Value::object(vec![("schema_version", Value::Int(2))]);
        let new = Value::object(vec![("schema_version", Value::Int(3))]);

        let ops = diff_states(&old, &new);
        assert_eq!(ops, vec![Operation::set("schema_version", Value::Int(3))]);
    }

    #[test]
    fn side_table_replaced_whole() {
        let old = Value::object(vec![(
            "custom_titles",
            Value::object(vec![("characters", Value::from(vec!["Age"]))]),
        )]);
        let titles = Value::object(vec![("characters", Value::from(vec!["Age", "Rank"]))]);
        let new = Value::object(vec![("custom_titles", titles.clone())]);

        let ops = diff_states(&old, &new);
        assert_eq!(ops, vec![Operation::set("custom_titles", titles)]);
    }

    #[test]
    fn diff_is_deterministic_across_calls() {
        let old = state_with_character("Aria");
        let new = Value::object(vec![
            (
                "characters",
                Value::object(vec![
                    ("c1", Value::object(vec![("name", Value::from("Aria B"))])),
                    ("c2", Value::object(vec![("name", Value::from("New"))])),
                ]),
            ),
            (
                "custom_titles",
                Value::object(vec![("factions", Value::from(vec!["Creed"]))]),
            ),
        ]);

        let first = diff_states(&old, &new);
        let second = diff_states(&old, &new);
        assert_eq!(first, second);
    }

    #[test]
    fn diff_then_apply_reaches_target() {
        let old = Value::object(vec![
            ("schema_version", Value::Int(3)),
            (
                "characters",
                Value::object(vec![
                    ("c1", Value::object(vec![("name", Value::from("A"))])),
                    ("c2", Value::object(vec![("name", Value::from("B"))])),
                ]),
            ),
            (
                "export_settings",
                Value::object(vec![("font", Value::from("serif"))]),
            ),
        ]);
        let new = Value::object(vec![
            ("schema_version", Value::Int(3)),
            (
                "characters",
                Value::object(vec![(
                    "c2",
                    Value::object(vec![("name", Value::from("B2"))]),
                )]),
            ),
            (
                "hooks",
                Value::object(vec![("h1", Value::object(vec![("label", Value::from("L"))]))]),
            ),
        ]);

        let ops = diff_states(&old, &new);
        let mut patched = old.clone();
        apply_ops(&mut patched, &ops).unwrap();
        assert_eq!(to_canonical_json(&patched), to_canonical_json(&new));
    }
}

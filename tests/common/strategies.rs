use fleetlink_core::{Identifier, IdentifierType, TypeSet};
use proptest::prelude::*;

/// Strategy for node names
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}"
}

pub fn identifier_type_strategy() -> impl Strategy<Value = IdentifierType> {
    prop_oneof![
        Just(IdentifierType::Index),
        Just(IdentifierType::Worker),
        Just(IdentifierType::Ui),
        Just(IdentifierType::Runnable),
    ]
}

pub fn type_set_strategy() -> impl Strategy<Value = TypeSet> {
    prop::collection::vec(identifier_type_strategy(), 1..4)
        .prop_map(|kinds| kinds.into_iter().collect())
}

/// Strategy for arbitrary identifiers, concrete or filters
pub fn identifier_strategy() -> impl Strategy<Value = Identifier> {
    (
        prop::option::of(name_strategy()),
        prop::option::of(identifier_type_strategy()),
        prop::option::of(type_set_strategy()),
        prop::option::of(name_strategy()),
    )
        .prop_map(|(name, kind, types, worker)| Identifier {
            name,
            kind,
            types,
            worker,
        })
}

/// Strategy for JSON payloads
pub fn payload_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::json!({})),
        Just(serde_json::json!(["samples", "analysis"])),
        Just(serde_json::json!("micro")),
        Just(serde_json::json!({"current_step": "listening", "progress": 40})),
        Just(serde_json::json!({"name": "micro", "addr": "http://10.0.0.2:4001", "runnables": []})),
        any::<i64>().prop_map(|n| serde_json::json!({"answer": n})),
    ]
}

use crate::address::Address;
use crate::path::{PathBuf, Segment};
use proptest::prelude::*;
use serde_json::Value;

pub fn arb_segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        "[a-c]".prop_map(Segment::Field),
        (0usize..3).prop_map(Segment::Index),
    ]
}

pub fn arb_path() -> impl Strategy<Value = PathBuf> {
    prop::collection::vec(arb_segment(), 0..4).prop_map(PathBuf::from)
}

pub fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (0i64..100).prop_map(Value::from),
        "[a-z]{0,4}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-c]", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

pub fn arb_value() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        1 => Just(None),
        4 => arb_json().prop_map(Some),
    ]
}

pub fn arb_address() -> impl Strategy<Value = Address> {
    (prop_oneof![Just("doc:1"), Just("doc:2")], arb_path())
        .prop_map(|(entity, path)| Address::json("space1", entity, path))
}

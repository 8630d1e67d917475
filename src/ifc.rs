//! Information-flow classification propagation.
//!
//! Classification labels form a bounded lattice supplied by the embedder;
//! this module only ever calls [`Lattice::lub`] and
//! [`Lattice::join_schema`] on it. Labels live in schemas at
//! `ifc.classification`, always as an array.

use crate::node::Term;
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// The classification lattice. Joins are required to be idempotent,
/// associative and commutative.
pub trait Lattice: Send + Sync {
    /// The least upper bound of a set of labels; `None` is bottom.
    fn lub(&self, labels: &[String]) -> Option<String>;

    /// Raises a schema's classification to cover `labels`.
    fn join_schema(&self, labels: &[String], schema: Value) -> Value;
}

/// The default lattice: labels are `+`-joined sets of atoms ordered by
/// inclusion, with the empty set as bottom.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetLattice;

impl Lattice for SetLattice {
    fn lub(&self, labels: &[String]) -> Option<String> {
        let atoms: BTreeSet<&str> = labels
            .iter()
            .flat_map(|label| label.split('+'))
            .map(str::trim)
            .filter(|atom| !atom.is_empty())
            .collect();
        if atoms.is_empty() {
            None
        } else {
            Some(atoms.into_iter().collect::<Vec<_>>().join("+"))
        }
    }

    fn join_schema(&self, labels: &[String], schema: Value) -> Value {
        let mut combined = classification_of(&schema);
        combined.extend(labels.iter().cloned());
        let Some(lub) = self.lub(&combined) else {
            return schema;
        };
        let mut schema = match schema {
            Value::Object(entries) => Value::Object(entries),
            // boolean and other degenerate schemas are raised to objects
            // so they can carry the label
            _ => json!({}),
        };
        schema["ifc"] = json!({ "classification": [lub] });
        schema
    }
}

/// The classification array of a schema, if present.
pub fn classification_of(schema: &Value) -> Vec<String> {
    schema
        .get("ifc")
        .and_then(|ifc| ifc.get("classification"))
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Collects every classification label mentioned anywhere in a schema.
pub fn collect_classifications(schema: &Value) -> Vec<String> {
    let mut labels = Vec::new();
    collect_into(schema, &mut labels);
    labels
}

fn collect_into(schema: &Value, labels: &mut Vec<String>) {
    match schema {
        Value::Object(entries) => {
            labels.extend(classification_of(schema));
            for (key, value) in entries {
                if key != "ifc" {
                    collect_into(value, labels);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_into(item, labels);
            }
        }
        _ => {}
    }
}

/// Raises the result schema to the least upper bound of the argument
/// schema's classifications. Leaves it untouched when the argument is
/// unclassified.
pub fn apply_argument_ifc_to_result(
    lattice: &dyn Lattice,
    argument_schema: &Value,
    result_schema: Value,
) -> Value {
    let labels = collect_classifications(argument_schema);
    if labels.is_empty() {
        return result_schema;
    }
    lattice.join_schema(&labels, result_schema)
}

/// Attaches the least upper bound of the input classifications to every
/// reference reachable in `outputs`, without descending into nested
/// patterns. Bottom inputs leave the outputs unchanged.
pub fn apply_input_ifc_to_output(lattice: &dyn Lattice, labels: &[String], outputs: &Term) -> Term {
    if labels.is_empty() || lattice.lub(labels).is_none() {
        return outputs.clone();
    }
    outputs.map_refs(&mut |reference| {
        let schema = reference.schema().unwrap_or(Value::Bool(true));
        reference
            .clone()
            .with_schema(lattice.join_schema(labels, schema))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lub_unions_atoms() {
        let lattice = SetLattice;
        assert_eq!(lattice.lub(&[]), None);
        assert_eq!(
            lattice.lub(&["confidential".to_string()]),
            Some("confidential".to_string())
        );
        assert_eq!(
            lattice.lub(&["secret".to_string(), "pii+secret".to_string()]),
            Some("pii+secret".to_string())
        );
    }

    #[test]
    fn join_schema_raises_existing_classification() {
        let lattice = SetLattice;
        let schema = json!({"type": "string", "ifc": {"classification": ["pii"]}});
        let raised = lattice.join_schema(&["secret".to_string()], schema);
        assert_eq!(
            classification_of(&raised),
            vec!["pii+secret".to_string()]
        );
        assert_eq!(raised["type"], json!("string"));
    }

    #[test]
    fn collect_finds_nested_classifications() {
        let schema = json!({
            "type": "object",
            "properties": {
                "x": {"type": "number", "ifc": {"classification": ["confidential"]}},
                "y": {"type": "string"}
            }
        });
        assert_eq!(collect_classifications(&schema), vec!["confidential"]);
    }

    #[test]
    fn bottom_inputs_leave_schemas_unchanged() {
        let lattice = SetLattice;
        let schema = json!({"type": "number"});
        let untouched = apply_argument_ifc_to_result(&lattice, &json!({"type": "object"}), schema);
        assert_eq!(untouched, json!({"type": "number"}));
    }
}

//! Nodes of the dataflow graph and the trees that wire them.
//!
//! A [`Term`] is a JSON-shaped tree whose leaves may be opaque references
//! (and, for the built-in `map`, nested patterns). Terms are trees by
//! construction, so traversal always terminates.

use crate::cell::OpaqueRef;
use crate::frame::FrameId;
use crate::lift::Implementation;
use crate::pattern::Pattern;
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A JSON-shaped tree with reference leaves.
#[derive(Clone)]
pub enum Term {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// JSON string.
    String(String),
    /// JSON array of terms.
    Array(Vec<Term>),
    /// JSON object of terms.
    Object(BTreeMap<String, Term>),
    /// An opaque reference leaf.
    Ref(OpaqueRef),
    /// A nested pattern, serialized lazily in the enclosing scope.
    Pattern(Arc<Pattern>),
}

impl Term {
    /// Builds an object term.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Term)>) -> Term {
        Term::Object(
            entries
                .into_iter()
                .map(|(key, term)| (key.into(), term))
                .collect(),
        )
    }

    /// Builds an array term.
    pub fn array(items: impl IntoIterator<Item = Term>) -> Term {
        Term::Array(items.into_iter().collect())
    }

    /// An empty object term.
    pub fn empty() -> Term {
        Term::Object(BTreeMap::new())
    }

    /// Visits every non-reference subterm; when the visitor returns a
    /// replacement, it substitutes for the subterm and is not descended
    /// into.
    pub fn traverse(&self, visit: &mut dyn FnMut(&Term) -> Option<Term>) -> Term {
        if let Term::Ref(_) = self {
            return self.clone();
        }
        if let Some(replacement) = visit(self) {
            return replacement;
        }
        match self {
            Term::Array(items) => {
                Term::Array(items.iter().map(|item| item.traverse(visit)).collect())
            }
            Term::Object(entries) => Term::Object(
                entries
                    .iter()
                    .map(|(key, term)| (key.clone(), term.traverse(visit)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Collects every reference leaf, in tree order. Does not descend
    /// into nested patterns; their cells are their own.
    pub fn refs(&self) -> Vec<OpaqueRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs(&self, out: &mut Vec<OpaqueRef>) {
        match self {
            Term::Ref(reference) => out.push(reference.clone()),
            Term::Array(items) => {
                for item in items {
                    item.collect_refs(out);
                }
            }
            Term::Object(entries) => {
                for term in entries.values() {
                    term.collect_refs(out);
                }
            }
            _ => {}
        }
    }

    /// Rebuilds the tree with every reference leaf mapped through `f`.
    pub fn map_refs(&self, f: &mut dyn FnMut(&OpaqueRef) -> OpaqueRef) -> Term {
        match self {
            Term::Ref(reference) => Term::Ref(f(reference)),
            Term::Array(items) => Term::Array(items.iter().map(|item| item.map_refs(f)).collect()),
            Term::Object(entries) => Term::Object(
                entries
                    .iter()
                    .map(|(key, term)| (key.clone(), term.map_refs(f)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Term::Null, Term::Null) => true,
            (Term::Bool(a), Term::Bool(b)) => a == b,
            (Term::Number(a), Term::Number(b)) => a == b,
            (Term::String(a), Term::String(b)) => a == b,
            (Term::Array(a), Term::Array(b)) => a == b,
            (Term::Object(a), Term::Object(b)) => a == b,
            (Term::Ref(a), Term::Ref(b)) => a == b,
            (Term::Pattern(a), Term::Pattern(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Term::Null,
            Value::Bool(b) => Term::Bool(b),
            Value::Number(n) => Term::Number(n),
            Value::String(s) => Term::String(s),
            Value::Array(items) => Term::Array(items.into_iter().map(Term::from).collect()),
            Value::Object(entries) => Term::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Term::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<OpaqueRef> for Term {
    fn from(reference: OpaqueRef) -> Self {
        Term::Ref(reference)
    }
}

impl From<&OpaqueRef> for Term {
    fn from(reference: &OpaqueRef) -> Self {
        Term::Ref(reference.clone())
    }
}

impl From<i64> for Term {
    fn from(n: i64) -> Self {
        Term::Number(n.into())
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::String(s.to_string())
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Term::Bool(b)
    }
}

impl std::fmt::Debug for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Term::Null => write!(f, "null"),
            Term::Bool(b) => write!(f, "{}", b),
            Term::Number(n) => write!(f, "{}", n),
            Term::String(s) => write!(f, "{:?}", s),
            Term::Array(items) => f.debug_list().entries(items).finish(),
            Term::Object(entries) => f.debug_map().entries(entries).finish(),
            Term::Ref(reference) => write!(f, "{:?}", reference),
            Term::Pattern(_) => write!(f, "Pattern"),
        }
    }
}

/// Marker for implementation functions that wrap events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Wrapper {
    /// The implementation is an event handler.
    Handler,
}

/// What a node executes.
#[derive(Clone)]
pub enum Module {
    /// A lifted function or handler.
    Javascript {
        /// The wrapped implementation and its source metadata.
        implementation: Arc<Implementation>,
        /// Schema of the node's argument.
        argument_schema: Option<Value>,
        /// Schema of the node's result.
        result_schema: Option<Value>,
        /// Present for handlers.
        wrapper: Option<Wrapper>,
    },
    /// A symbolic reference to a built-in, e.g. `map`.
    Ref(String),
    /// An instantiated pattern.
    Pattern(Arc<Pattern>),
}

/// One node of the dataflow graph.
pub struct Node {
    /// What the node executes.
    pub module: Module,
    /// Input wiring; leaves may be references.
    pub inputs: Term,
    /// Output wiring; leaves may be references.
    pub outputs: Term,
    /// The frame the node was created in.
    pub frame: FrameId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use serde_json::json;

    #[test]
    fn traverse_identity_is_pointwise_equal() {
        let builder = Runtime::memory().builder();
        let reference = builder.cell(None, None);
        let term = Term::object([
            ("a", Term::from(json!([1, {"b": "x"}, null]))),
            ("r", Term::from(&reference)),
        ]);
        let copied = term.traverse(&mut |_| None);
        assert_eq!(copied, term);
    }

    #[test]
    fn traverse_substitutes_without_descending() {
        let term = Term::from(json!({"keep": 1, "swap": {"marker": true}}));
        let swapped = term.traverse(&mut |subterm| {
            if let Term::Object(entries) = subterm {
                if entries.contains_key("marker") {
                    return Some(Term::from("replaced"));
                }
            }
            None
        });
        let Term::Object(entries) = swapped else {
            panic!("expected object");
        };
        assert_eq!(entries["keep"], Term::from(json!(1)));
        assert_eq!(entries["swap"], Term::from("replaced"));
    }

    #[test]
    fn refs_collects_leaves_in_tree_order() {
        let builder = Runtime::memory().builder();
        let first = builder.cell(None, None);
        let second = builder.cell(None, None);
        let term = Term::object([
            ("a", Term::from(&first)),
            ("b", Term::array([Term::from(1), Term::from(&second)])),
        ]);
        let refs = term.refs();
        assert_eq!(refs, vec![first, second]);
    }
}

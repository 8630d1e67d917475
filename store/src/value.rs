//! Get, set and delete sub-values of JSON documents addressed by [`Path`].
//!
//! Absent values ("undefined") are modelled as `Option<Value>::None`
//! everywhere; `Value::Null` is an ordinary JSON value and never stands in
//! for absence, except inside arrays where deleted slots become `Null`
//! because JSON arrays cannot have holes.

use crate::path::{Path, Segment};
use serde_json::Value;

/// Outcome of resolving a path against a document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Projection<'a> {
    /// All intermediates were containers; the leaf may or may not exist.
    Reached(Option<&'a Value>),
    /// An intermediate was missing or not a container.
    Unreachable,
}

impl<'a> Projection<'a> {
    /// Returns the projected value, treating unreachable paths as absent.
    pub fn value(self) -> Option<&'a Value> {
        match self {
            Projection::Reached(value) => value,
            Projection::Unreachable => None,
        }
    }
}

/// Returns the value at `path`, or `None` if any step cannot be taken.
pub fn get<'a>(value: &'a Value, path: Path<'_>) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = match (segment, current) {
            (Segment::Field(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(ix), Value::Array(items)) => items.get(*ix)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Returns true if all intermediates exist and the leaf is defined.
pub fn has(value: &Value, path: Path<'_>) -> bool {
    get(value, path).is_some()
}

/// Resolves `path` against an optionally-absent document root,
/// distinguishing a missing leaf from an unreachable path.
pub fn project<'a>(root: Option<&'a Value>, path: Path<'_>) -> Projection<'a> {
    let Some((parent, leaf)) = path.split_last() else {
        return Projection::Reached(root);
    };
    let mut current = match root {
        Some(value) => value,
        None => return Projection::Unreachable,
    };
    for segment in parent {
        current = match (segment, current) {
            (Segment::Field(key), Value::Object(map)) => match map.get(key) {
                Some(value) => value,
                None => return Projection::Unreachable,
            },
            (Segment::Index(ix), Value::Array(items)) => match items.get(*ix) {
                Some(value) => value,
                None => return Projection::Unreachable,
            },
            _ => return Projection::Unreachable,
        };
    }
    match (leaf, current) {
        (Segment::Field(key), Value::Object(map)) => Projection::Reached(map.get(key)),
        (Segment::Index(ix), Value::Array(items)) => Projection::Reached(items.get(*ix)),
        _ => Projection::Unreachable,
    }
}

/// Sets or deletes the value at `path`, autocreating intermediate objects
/// (or arrays when the next segment is an index). Returns true if the
/// document changed. Impossible writes (a non-container intermediate in
/// the way) return false; callers that care report them.
pub fn set(root: &mut Option<Value>, path: Path<'_>, value: Option<Value>) -> bool {
    if path.is_empty() {
        let changed = *root != value;
        *root = value;
        return changed;
    }
    match value {
        Some(value) => insert(root, path, value),
        None => delete(root, path),
    }
}

fn container_for(segment: &Segment) -> Value {
    match segment {
        Segment::Field(_) => Value::Object(Default::default()),
        Segment::Index(_) => Value::Array(Default::default()),
    }
}

fn insert(root: &mut Option<Value>, path: Path<'_>, value: Value) -> bool {
    let segments = path.as_slice();
    if root.is_none() {
        *root = Some(container_for(&segments[0]));
    }
    let mut current = root.as_mut().unwrap();
    for (ix, segment) in segments[..segments.len() - 1].iter().enumerate() {
        let next = &segments[ix + 1];
        current = match (segment, current) {
            (Segment::Field(key), Value::Object(map)) => map
                .entry(key.clone())
                .or_insert_with(|| container_for(next)),
            (Segment::Index(at), Value::Array(items)) => {
                while items.len() <= *at {
                    items.push(Value::Null);
                }
                if items[*at] == Value::Null {
                    items[*at] = container_for(next);
                }
                &mut items[*at]
            }
            _ => return false,
        };
    }
    match (segments.last().unwrap(), current) {
        (Segment::Field(key), Value::Object(map)) => {
            let old = map.insert(key.clone(), value.clone());
            old.as_ref() != Some(&value)
        }
        (Segment::Index(at), Value::Array(items)) => {
            while items.len() <= *at {
                items.push(Value::Null);
            }
            let changed = items[*at] != value;
            items[*at] = value;
            changed
        }
        _ => false,
    }
}

fn delete(root: &mut Option<Value>, path: Path<'_>) -> bool {
    let Some(value) = root.as_mut() else {
        return false;
    };
    let (parent, leaf) = path.split_last().unwrap();
    let mut current = value;
    for segment in parent {
        current = match (segment, current) {
            (Segment::Field(key), Value::Object(map)) => match map.get_mut(key) {
                Some(value) => value,
                None => return false,
            },
            (Segment::Index(ix), Value::Array(items)) => match items.get_mut(*ix) {
                Some(value) => value,
                None => return false,
            },
            _ => return false,
        };
    }
    match (leaf, current) {
        (Segment::Field(key), Value::Object(map)) => map.remove(key).is_some(),
        (Segment::Index(ix), Value::Array(items)) => {
            if *ix >= items.len() {
                return false;
            }
            let changed = items[*ix] != Value::Null;
            items[*ix] = Value::Null;
            while items.last() == Some(&Value::Null) {
                items.pop();
            }
            changed
        }
        _ => false,
    }
}

//! Per-transaction invariant maps.
//!
//! Both maps hold attestations keyed by `(entity, media, path)` and keep a
//! minimal forest per entity: no stored path is a prefix of another stored
//! path for the same entity. [`Novelty`] is the write set (what the
//! transaction intends the store to become), [`History`] the read set (what
//! the transaction has observed, and therefore an implicit precondition of
//! its commit).

use crate::address::{Address, Attestation, EntityId, MediaType, SpaceId};
use crate::error::{Result, StorageError};
use crate::path::{Path, PathBuf, Segment};
use crate::value;
use fnv::FnvHashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;

pub(crate) type EntityKey = (EntityId, MediaType);

fn entity_key(address: &Address) -> EntityKey {
    (address.entity.clone(), address.media.clone())
}

/// Shared storage: an outer entity map over inner path-ordered trees, so
/// ancestor and descendant scans are logarithmic in the number of stored
/// paths per entity.
#[derive(Clone, Debug, Default)]
struct Claims {
    entries: FnvHashMap<EntityKey, BTreeMap<PathBuf, Option<Value>>>,
}

impl Claims {
    /// Finds the deepest stored ancestor of `path`, including `path` itself.
    fn ancestor(&self, key: &EntityKey, path: Path) -> Option<(PathBuf, &Option<Value>)> {
        let tree = self.entries.get(key)?;
        let segments = path.as_slice();
        for len in (0..=segments.len()).rev() {
            if let Some((stored, value)) = tree.get_key_value(&segments[..len]) {
                return Some((stored.clone(), value));
            }
        }
        None
    }

    /// Collects the strict descendants of `path`.
    fn descendants(&self, key: &EntityKey, path: Path) -> Vec<(PathBuf, Option<Value>)> {
        let Some(tree) = self.entries.get(key) else {
            return Vec::new();
        };
        tree.range::<[Segment], _>((Bound::Excluded(path.as_slice()), Bound::Unbounded))
            .take_while(|(stored, _)| path.is_ancestor(stored.as_path()))
            .map(|(stored, stored_value)| (stored.clone(), stored_value.clone()))
            .collect()
    }

    fn insert(&mut self, key: EntityKey, path: PathBuf, value: Option<Value>) {
        self.entries.entry(key).or_default().insert(path, value);
    }

    fn remove(&mut self, key: &EntityKey, path: &PathBuf) {
        if let Some(tree) = self.entries.get_mut(key) {
            tree.remove(path);
        }
    }

    fn value_mut(&mut self, key: &EntityKey, path: &PathBuf) -> Option<&mut Option<Value>> {
        self.entries.get_mut(key)?.get_mut(path)
    }

    fn iter(&self) -> impl Iterator<Item = (&EntityKey, &PathBuf, &Option<Value>)> {
        self.entries
            .iter()
            .flat_map(|(key, tree)| tree.iter().map(move |(path, v)| (key, path, v)))
    }

    fn is_empty(&self) -> bool {
        self.entries.values().all(|tree| tree.is_empty())
    }
}

/// The write set of one space's journal.
#[derive(Clone, Debug)]
pub struct Novelty {
    space: SpaceId,
    claims: Claims,
}

impl Novelty {
    /// Creates an empty write set for `space`.
    pub fn new(space: SpaceId) -> Self {
        Self {
            space,
            claims: Claims::default(),
        }
    }

    /// Records the intent that `address` become `value`.
    ///
    /// A claim extending a stored ancestor is merged into it at the
    /// relative sub-path; the leaf's parent within the ancestor must be an
    /// object (or array), else the claim fails with `NotFound`. A claim
    /// shadowing stored descendants evicts them. Parallel paths coexist.
    /// A `value` of `None` deletes at the path.
    pub fn claim(&mut self, address: &Address, value: Option<Value>) -> Result<()> {
        debug_assert_eq!(address.space, self.space);
        let key = entity_key(address);
        if let Some((ancestor, _)) = self.claims.ancestor(&key, address.path.as_path()) {
            let relative = address
                .path
                .as_path()
                .strip_prefix(ancestor.as_path())
                .expect("ancestor is a prefix")
                .to_owned();
            let stored = self
                .claims
                .value_mut(&key, &ancestor)
                .expect("ancestor is stored");
            if !relative.is_empty() {
                let parent = relative.as_path().parent().expect("relative is non-empty");
                let reachable = matches!(
                    stored.as_ref().and_then(|v| value::get(v, parent)),
                    Some(Value::Object(_)) | Some(Value::Array(_))
                );
                if !reachable {
                    return Err(StorageError::NotFound {
                        space: self.space.clone(),
                        address: address.clone(),
                    });
                }
            }
            value::set(stored, relative.as_path(), value);
            return Ok(());
        }
        for (shadowed, _) in self.claims.descendants(&key, address.path.as_path()) {
            tracing::debug!("write at {} shadows {}", address, shadowed);
            self.claims.remove(&key, &shadowed);
        }
        self.claims.insert(key, address.path.clone(), value);
        Ok(())
    }

    /// Returns the deepest stored ancestor of `address`, if any.
    pub fn get(&self, address: &Address) -> Option<Attestation> {
        let key = entity_key(address);
        let (ancestor, value) = self.claims.ancestor(&key, address.path.as_path())?;
        Some(Attestation::new(
            Address::new(
                address.space.clone(),
                address.entity.clone(),
                address.media.clone(),
                ancestor,
            ),
            value.clone(),
        ))
    }

    /// Iterates the minimal forest of stored attestations.
    pub fn iter(&self) -> impl Iterator<Item = Attestation> + '_ {
        self.claims.iter().map(|((entity, media), path, value)| {
            Attestation::new(
                Address::new(
                    self.space.clone(),
                    entity.clone(),
                    media.clone(),
                    path.clone(),
                ),
                value.clone(),
            )
        })
    }

    /// Returns true if nothing has been claimed.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// The stored writes grouped per entity, for commit folding.
    pub(crate) fn entities(
        &self,
    ) -> impl Iterator<Item = (&EntityKey, &BTreeMap<PathBuf, Option<Value>>)> {
        self.claims
            .entries
            .iter()
            .filter(|(_, tree)| !tree.is_empty())
    }
}

/// The read set of one space's journal.
#[derive(Clone, Debug)]
pub struct History {
    space: SpaceId,
    claims: Claims,
}

impl History {
    /// Creates an empty read set for `space`.
    pub fn new(space: SpaceId) -> Self {
        Self {
            space,
            claims: Claims::default(),
        }
    }

    /// Records the observation that `address` held `value`.
    ///
    /// An observation consistent with a stored ancestor is redundant and
    /// dropped; an inconsistent one fails with both attestations attached.
    /// An observation subsuming stored descendants must agree with each of
    /// them, and evicts them.
    pub fn claim(&mut self, address: &Address, value: Option<Value>) -> Result<()> {
        debug_assert_eq!(address.space, self.space);
        let key = entity_key(address);
        if let Some((ancestor, stored)) = self.claims.ancestor(&key, address.path.as_path()) {
            let relative = address
                .path
                .as_path()
                .strip_prefix(ancestor.as_path())
                .expect("ancestor is a prefix");
            let observed = stored.as_ref().and_then(|v| value::get(v, relative));
            if observed == value.as_ref() {
                return Ok(());
            }
            return Err(StorageError::Inconsistent {
                claimed: Box::new(Attestation::new(address.clone(), value)),
                actual: Box::new(Attestation::new(
                    Address::new(
                        address.space.clone(),
                        address.entity.clone(),
                        address.media.clone(),
                        ancestor,
                    ),
                    stored.clone(),
                )),
            });
        }
        let descendants = self.claims.descendants(&key, address.path.as_path());
        for (descendant, observed) in &descendants {
            let relative = descendant
                .as_path()
                .strip_prefix(address.path.as_path())
                .expect("descendant extends the claim");
            let projected = value.as_ref().and_then(|v| value::get(v, relative));
            if projected != observed.as_ref() {
                return Err(StorageError::Inconsistent {
                    claimed: Box::new(Attestation::new(address.clone(), value)),
                    actual: Box::new(Attestation::new(
                        Address::new(
                            address.space.clone(),
                            address.entity.clone(),
                            address.media.clone(),
                            descendant.clone(),
                        ),
                        observed.clone(),
                    )),
                });
            }
        }
        for (descendant, _) in descendants {
            tracing::debug!("observation at {} subsumes {}", address, descendant);
            self.claims.remove(&key, &descendant);
        }
        self.claims.insert(key, address.path.clone(), value);
        Ok(())
    }

    /// Returns the deepest stored ancestor of `address`, if any.
    pub fn get(&self, address: &Address) -> Option<Attestation> {
        let key = entity_key(address);
        let (ancestor, value) = self.claims.ancestor(&key, address.path.as_path())?;
        Some(Attestation::new(
            Address::new(
                address.space.clone(),
                address.entity.clone(),
                address.media.clone(),
                ancestor,
            ),
            value.clone(),
        ))
    }

    /// Iterates the minimal forest of stored observations.
    pub fn iter(&self) -> impl Iterator<Item = Attestation> + '_ {
        self.claims.iter().map(|((entity, media), path, value)| {
            Attestation::new(
                Address::new(
                    self.space.clone(),
                    entity.clone(),
                    media.clone(),
                    path.clone(),
                ),
                value.clone(),
            )
        })
    }

    /// Returns true if nothing has been observed.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;

    fn addr(path: PathBuf) -> Address {
        Address::json("space1", "doc:1", path)
    }

    fn space() -> SpaceId {
        SpaceId::new("space1")
    }

    #[test]
    fn novelty_merges_into_ancestor() {
        let mut novelty = Novelty::new(space());
        novelty
            .claim(
                &addr(path![]),
                Some(json!({"profile": {"name": "Alice"}, "settings": {"theme": "light"}})),
            )
            .unwrap();
        novelty
            .claim(&addr(path!["profile", "name"]), Some(json!("Bob")))
            .unwrap();
        assert_eq!(novelty.iter().count(), 1);
        let stored = novelty.get(&addr(path![])).unwrap();
        assert_eq!(
            stored.value,
            Some(json!({"profile": {"name": "Bob"}, "settings": {"theme": "light"}}))
        );
    }

    #[test]
    fn novelty_overwrite_evicts_descendants() {
        let mut novelty = Novelty::new(space());
        novelty
            .claim(&addr(path!["profile", "name"]), Some(json!("Alice")))
            .unwrap();
        novelty
            .claim(&addr(path!["profile", "age"]), Some(json!(30)))
            .unwrap();
        assert_eq!(novelty.iter().count(), 2);
        novelty
            .claim(&addr(path!["profile"]), Some(json!({"name": "Bob"})))
            .unwrap();
        let stored: Vec<_> = novelty.iter().collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].address.path, path!["profile"]);
        assert_eq!(stored[0].value, Some(json!({"name": "Bob"})));
    }

    #[test]
    fn novelty_parallel_paths_coexist() {
        let mut novelty = Novelty::new(space());
        novelty
            .claim(&addr(path!["profile"]), Some(json!({})))
            .unwrap();
        novelty
            .claim(&addr(path!["settings"]), Some(json!({})))
            .unwrap();
        assert_eq!(novelty.iter().count(), 2);
    }

    #[test]
    fn novelty_rejects_scalar_parent() {
        let mut novelty = Novelty::new(space());
        novelty
            .claim(&addr(path![]), Some(json!({"a": 5})))
            .unwrap();
        let err = novelty
            .claim(&addr(path!["a", "b"]), Some(json!(1)))
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[test]
    fn novelty_delete_rejects_scalar_parent() {
        let mut novelty = Novelty::new(space());
        novelty
            .claim(&addr(path![]), Some(json!({"a": 5})))
            .unwrap();
        let err = novelty.claim(&addr(path!["a", "b"]), None).unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[test]
    fn novelty_delete_at_leaf() {
        let mut novelty = Novelty::new(space());
        novelty
            .claim(&addr(path![]), Some(json!({"a": 1, "b": 2})))
            .unwrap();
        novelty.claim(&addr(path!["a"]), None).unwrap();
        let stored = novelty.get(&addr(path![])).unwrap();
        assert_eq!(stored.value, Some(json!({"b": 2})));
    }

    #[test]
    fn novelty_retraction_at_root() {
        let mut novelty = Novelty::new(space());
        novelty.claim(&addr(path![]), None).unwrap();
        let stored = novelty.get(&addr(path![])).unwrap();
        assert_eq!(stored.value, None);
    }

    #[test]
    fn history_detects_nested_conflict() {
        let mut history = History::new(space());
        history
            .claim(&addr(path!["profile"]), Some(json!({"name": "Alice"})))
            .unwrap();
        let err = history
            .claim(&addr(path!["profile", "name"]), Some(json!("Bob")))
            .unwrap_err();
        match err {
            StorageError::Inconsistent { claimed, actual } => {
                assert_eq!(claimed.value, Some(json!("Bob")));
                assert_eq!(actual.value, Some(json!({"name": "Alice"})));
            }
            other => panic!("unexpected error: {other}"),
        }
        // a consistent child observation is redundant and adds no entry
        history
            .claim(&addr(path!["profile", "name"]), Some(json!("Alice")))
            .unwrap();
        assert_eq!(history.iter().count(), 1);
    }

    #[test]
    fn history_subsumes_consistent_descendants() {
        let mut history = History::new(space());
        history
            .claim(&addr(path!["profile", "name"]), Some(json!("Alice")))
            .unwrap();
        history
            .claim(&addr(path!["profile", "age"]), Some(json!(30)))
            .unwrap();
        history
            .claim(
                &addr(path!["profile"]),
                Some(json!({"name": "Alice", "age": 30})),
            )
            .unwrap();
        let stored: Vec<_> = history.iter().collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].address.path, path!["profile"]);
    }

    #[test]
    fn history_rejects_inconsistent_parent() {
        let mut history = History::new(space());
        history
            .claim(&addr(path!["profile", "name"]), Some(json!("Alice")))
            .unwrap();
        let err = history
            .claim(&addr(path!["profile"]), Some(json!({"name": "Bob"})))
            .unwrap_err();
        assert!(matches!(err, StorageError::Inconsistent { .. }));
    }

    #[test]
    fn history_negative_observation() {
        let mut history = History::new(space());
        history.claim(&addr(path!["missing"]), None).unwrap();
        history.claim(&addr(path!["missing"]), None).unwrap();
        assert_eq!(history.iter().count(), 1);
        let err = history
            .claim(&addr(path!["missing"]), Some(json!(1)))
            .unwrap_err();
        assert!(matches!(err, StorageError::Inconsistent { .. }));
    }

    use crate::props::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn novelty_iteration_yields_minimal_forest(
            claims in prop::collection::vec((arb_address(), arb_value()), 0..12)
        ) {
            let mut novelty = Novelty::new(space());
            for (address, value) in claims {
                novelty.claim(&address, value).ok();
            }
            let stored: Vec<_> = novelty.iter().collect();
            for (i, a) in stored.iter().enumerate() {
                for b in stored.iter().skip(i + 1) {
                    if a.address.entity == b.address.entity && a.address.media == b.address.media {
                        prop_assert!(!a.address.path.as_path().is_ancestor(b.address.path.as_path()));
                        prop_assert!(!b.address.path.as_path().is_ancestor(a.address.path.as_path()));
                    }
                }
            }
        }

        #[test]
        fn history_get_projects_the_observation(
            doc in arb_json(),
            sub in arb_path()
        ) {
            let mut history = History::new(space());
            history.claim(&addr(path![]), Some(doc.clone())).unwrap();
            let deepest = history.get(&addr(sub.clone())).unwrap();
            prop_assert_eq!(deepest.address.path, path![]);
            let relative = sub.as_path();
            prop_assert_eq!(
                deepest.value.as_ref().and_then(|v| value::get(v, relative)),
                value::get(&doc, sub.as_path())
            );
        }

        #[test]
        fn redundant_history_claims_are_dropped(
            doc in arb_json(),
            sub in arb_path()
        ) {
            let mut history = History::new(space());
            history.claim(&addr(path![]), Some(doc.clone())).unwrap();
            let observed = value::get(&doc, sub.as_path()).cloned();
            history.claim(&addr(sub), observed).unwrap();
            prop_assert_eq!(history.iter().count(), 1);
        }
    }
}

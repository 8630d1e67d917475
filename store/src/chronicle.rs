//! The per-space journal of a storage transaction.
//!
//! A chronicle overlays the transaction's own writes on its reads, captures
//! every replica observation as a history invariant, and folds its write
//! set into one fact per entity when the transaction commits.

use crate::address::{Address, Attestation, Commit, Fact, SpaceId};
use crate::error::{Result, StorageError};
use crate::invariant::{History, Novelty};
use crate::replica::Replica;
use crate::value::{self, Projection};
use std::sync::Arc;

/// One space's transactional log: a read set, a write set and the replica
/// they are measured against.
pub struct Chronicle {
    space: SpaceId,
    replica: Arc<dyn Replica>,
    history: History,
    novelty: Novelty,
    closed: bool,
}

impl Chronicle {
    /// Opens a journal for `space` against `replica`.
    pub fn new(space: SpaceId, replica: Arc<dyn Replica>) -> Self {
        Self {
            history: History::new(space.clone()),
            novelty: Novelty::new(space.clone()),
            space,
            replica,
            closed: false,
        }
    }

    /// The space this journal writes to.
    pub fn space(&self) -> &SpaceId {
        &self.space
    }

    /// The replica this journal reads from.
    pub fn replica(&self) -> Arc<dyn Replica> {
        self.replica.clone()
    }

    /// Returns true if the journal holds neither reads nor writes.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.novelty.is_empty()
    }

    /// Reads the value at `address`.
    ///
    /// The transaction's own writes overlay the replica; otherwise the
    /// invariant snapshot captured by an earlier read wins; otherwise the
    /// replica is consulted and the observation recorded as a history
    /// invariant (a `None` observation is recorded even when the read
    /// itself fails with `NotFound`, so the negative read is honored at
    /// commit time).
    pub fn read(&mut self, address: &Address) -> Result<Attestation> {
        if self.closed {
            return Err(StorageError::Complete);
        }
        self.check_media(address)?;
        if let Some(written) = self.novelty.get(address) {
            let relative = address
                .path
                .as_path()
                .strip_prefix(written.address.path.as_path())
                .expect("novelty ancestor is a prefix");
            let projected = written
                .value
                .as_ref()
                .and_then(|v| value::get(v, relative))
                .cloned();
            tracing::debug!("read {} from write overlay", address);
            return Ok(Attestation::new(address.clone(), projected));
        }
        if let Some(observed) = self.history.get(address) {
            let relative = address
                .path
                .as_path()
                .strip_prefix(observed.address.path.as_path())
                .expect("history ancestor is a prefix");
            return match value::project(observed.value.as_ref(), relative) {
                Projection::Reached(projected) => {
                    Ok(Attestation::new(address.clone(), projected.cloned()))
                }
                Projection::Unreachable => Err(StorageError::NotFound {
                    space: self.space.clone(),
                    address: address.clone(),
                }),
            };
        }
        let fact = self.replica.get(&address.entity, &address.media)?;
        let root = fact.and_then(|fact| fact.value);
        match value::project(root.as_ref(), address.path.as_path()) {
            Projection::Reached(projected) => {
                let observed = projected.cloned();
                self.history.claim(address, observed.clone())?;
                Ok(Attestation::new(address.clone(), observed))
            }
            Projection::Unreachable => {
                self.history.claim(address, None)?;
                Err(StorageError::NotFound {
                    space: self.space.clone(),
                    address: address.clone(),
                })
            }
        }
    }

    /// Records the intent that `address` become `value`. `None` deletes.
    pub fn write(&mut self, address: &Address, value: Option<serde_json::Value>) -> Result<Attestation> {
        if self.closed {
            return Err(StorageError::Complete);
        }
        self.check_media(address)?;
        self.novelty.claim(address, value.clone())?;
        tracing::debug!("write {}", address);
        Ok(Attestation::new(address.clone(), value))
    }

    // only json documents can be addressed below their root; other media
    // are opaque to the engine
    fn check_media(&self, address: &Address) -> Result<()> {
        use crate::address::MediaType;
        if !address.path.is_empty() && address.media != MediaType::json() {
            return Err(StorageError::TypeMismatch {
                address: address.clone(),
                expected: MediaType::json().as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Closes the journal and derives its commit: the captured read
    /// invariants plus one fact per written entity, folded atop the latest
    /// known replica state. Roots folded to `None` become retractions.
    pub fn commit(&mut self) -> Result<Commit> {
        if self.closed {
            return Err(StorageError::Complete);
        }
        self.closed = true;
        let claims: Vec<Attestation> = self.history.iter().collect();
        let mut facts = Vec::new();
        for ((entity, media), writes) in self.novelty.entities() {
            let tip = self.replica.get(entity, media)?;
            let mut folded = match &tip {
                Some(fact) => fact.value.clone(),
                None => None,
            };
            for (path, written) in writes {
                value::set(&mut folded, path.as_path(), written.clone());
            }
            let fact = match &tip {
                Some(prior) => Fact::next(prior, folded),
                None => Fact::assert(entity.clone(), media.clone(), folded),
            };
            facts.push(fact);
        }
        Ok(Commit {
            space: self.space.clone(),
            claims,
            facts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::EntityId;
    use crate::path;
    use crate::replica::MemoryReplica;
    use serde_json::json;

    fn chronicle() -> Chronicle {
        let space = SpaceId::new("space1");
        Chronicle::new(space.clone(), Arc::new(MemoryReplica::new(space)))
    }

    fn addr(path: crate::path::PathBuf) -> Address {
        Address::json("space1", "doc:1", path)
    }

    #[test]
    fn write_then_read_projection() {
        let mut journal = chronicle();
        journal
            .write(&addr(path![]), Some(json!({"a": {"b": 2}})))
            .unwrap();
        let read = journal.read(&addr(path!["a", "b"])).unwrap();
        assert_eq!(read.value, Some(json!(2)));
    }

    #[test]
    fn read_missing_leaf_is_a_negative_observation() {
        let mut journal = chronicle();
        let read = journal.read(&addr(path![])).unwrap();
        assert_eq!(read.value, None);
        let commit = journal.commit().unwrap();
        assert_eq!(commit.claims.len(), 1);
        assert_eq!(commit.claims[0].value, None);
        assert!(commit.facts.is_empty());
    }

    #[test]
    fn read_through_scalar_records_invariant() {
        let space = SpaceId::new("space1");
        let replica = Arc::new(MemoryReplica::new(space.clone()));
        replica
            .apply(Commit {
                space: space.clone(),
                claims: vec![],
                facts: vec![Fact::assert(
                    EntityId::new("doc:1"),
                    crate::address::MediaType::json(),
                    Some(json!({"a": "text"})),
                )],
            })
            .unwrap();
        let mut journal = Chronicle::new(space, replica);
        let err = journal.read(&addr(path!["a", "b"])).unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        let commit = journal.commit().unwrap();
        assert_eq!(commit.claims.len(), 1);
        assert_eq!(commit.claims[0].value, None);
    }

    #[test]
    fn delete_through_scalar_reports_not_found() {
        let mut journal = chronicle();
        journal
            .write(&addr(path![]), Some(json!({"a": 5})))
            .unwrap();
        let err = journal.write(&addr(path!["a", "b"]), None).unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        // the impossible delete left the write set untouched
        let read = journal.read(&addr(path![])).unwrap();
        assert_eq!(read.value, Some(json!({"a": 5})));
    }

    #[test]
    fn novelty_folds_into_single_fact() {
        let mut journal = chronicle();
        journal
            .write(
                &addr(path![]),
                Some(json!({"profile": {"name": "Alice"}, "settings": {"theme": "light"}})),
            )
            .unwrap();
        journal
            .write(&addr(path!["profile", "name"]), Some(json!("Bob")))
            .unwrap();
        let read = journal.read(&addr(path![])).unwrap();
        assert_eq!(
            read.value,
            Some(json!({"profile": {"name": "Bob"}, "settings": {"theme": "light"}}))
        );
        let commit = journal.commit().unwrap();
        assert_eq!(commit.facts.len(), 1);
        assert_eq!(
            commit.facts[0].value,
            Some(json!({"profile": {"name": "Bob"}, "settings": {"theme": "light"}}))
        );
        assert_eq!(commit.facts[0].cause, None);
    }

    #[test]
    fn folding_threads_the_causal_chain() {
        let space = SpaceId::new("space1");
        let replica = Arc::new(MemoryReplica::new(space.clone()));
        let initial = Fact::assert(
            EntityId::new("doc:1"),
            crate::address::MediaType::json(),
            Some(json!({"n": 1})),
        );
        replica
            .apply(Commit {
                space: space.clone(),
                claims: vec![],
                facts: vec![initial.clone()],
            })
            .unwrap();
        let mut journal = Chronicle::new(space, replica);
        journal.write(&addr(path!["n"]), Some(json!(2))).unwrap();
        let commit = journal.commit().unwrap();
        assert_eq!(commit.facts[0].cause, Some(initial.id()));
        assert_eq!(commit.facts[0].value, Some(json!({"n": 2})));
    }

    #[test]
    fn opaque_media_cannot_be_addressed_below_the_root() {
        use crate::address::MediaType;
        let mut journal = chronicle();
        let address = Address::new(
            SpaceId::new("space1"),
            EntityId::new("doc:1"),
            MediaType::new("text/plain"),
            path!["line", 0],
        );
        let err = journal.read(&address).unwrap_err();
        assert!(matches!(err, StorageError::TypeMismatch { .. }));
        let root = Address::new(
            SpaceId::new("space1"),
            EntityId::new("doc:1"),
            MediaType::new("text/plain"),
            path![],
        );
        journal.write(&root, Some(json!("raw"))).unwrap();
    }

    #[test]
    fn closed_journal_refuses_operations() {
        let mut journal = chronicle();
        journal.commit().unwrap();
        assert!(matches!(
            journal.read(&addr(path![])).unwrap_err(),
            StorageError::Complete
        ));
        assert!(matches!(
            journal.write(&addr(path![]), None).unwrap_err(),
            StorageError::Complete
        ));
        assert!(matches!(
            journal.commit().unwrap_err(),
            StorageError::Complete
        ));
    }

    #[test]
    fn reads_see_the_invariant_snapshot() {
        let space = SpaceId::new("space1");
        let replica = Arc::new(MemoryReplica::new(space.clone()));
        let initial = Fact::assert(
            EntityId::new("doc:1"),
            crate::address::MediaType::json(),
            Some(json!({"name": "Alice"})),
        );
        replica
            .apply(Commit {
                space: space.clone(),
                claims: vec![],
                facts: vec![initial.clone()],
            })
            .unwrap();
        let mut journal = Chronicle::new(space, replica.clone());
        let first = journal.read(&addr(path![])).unwrap();
        assert_eq!(first.value, Some(json!({"name": "Alice"})));
        // the replica moves on behind the journal's back
        replica
            .apply(Commit {
                space: SpaceId::new("space1"),
                claims: vec![],
                facts: vec![Fact::next(&initial, Some(json!({"name": "Mallory"})))],
            })
            .unwrap();
        let second = journal.read(&addr(path!["name"])).unwrap();
        assert_eq!(second.value, Some(json!("Alice")));
    }

    use crate::props::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn reads_project_prior_writes(doc in arb_json(), sub in arb_path()) {
            let mut journal = chronicle();
            journal.write(&addr(path![]), Some(doc.clone())).unwrap();
            let read = journal.read(&addr(sub.clone())).unwrap();
            prop_assert_eq!(read.value.as_ref(), value::get(&doc, sub.as_path()));
        }
    }
}

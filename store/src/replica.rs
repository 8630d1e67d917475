//! The authoritative per-space store behind a transaction.
//!
//! [`Replica`] and [`Store`] are the seams to a real storage provider;
//! [`MemoryReplica`] is the in-process implementation used by tests and by
//! runtimes without a provider. It validates every claim of an incoming
//! commit against its current state, so a transaction's read invariants
//! are enforced at commit time.

use crate::address::{Attestation, Commit, EntityId, Fact, MediaType, SpaceId};
use crate::error::{Result, StorageError};
use crate::invariant::EntityKey;
use crate::value;
use fnv::FnvHashMap;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::sync::Arc;

/// A per-space authoritative store.
pub trait Replica: Send + Sync {
    /// Returns the current tip fact for an entity.
    fn get(&self, entity: &EntityId, media: &MediaType) -> Result<Option<Fact>>;

    /// Atomically validates a commit's claims against the current state
    /// and publishes its facts.
    fn commit(&self, commit: Commit) -> BoxFuture<'static, Result<()>>;
}

/// Opens replicas by memory space.
pub trait Store: Send + Sync {
    /// Returns the replica for `space`.
    fn open(&self, space: &SpaceId) -> Result<Arc<dyn Replica>>;
}

/// An in-process replica guarded by a mutex. Commits are serialized by
/// the lock; claims are checked against the tips it holds.
pub struct MemoryReplica {
    space: SpaceId,
    state: Mutex<FnvHashMap<EntityKey, Fact>>,
}

impl MemoryReplica {
    /// Creates an empty replica for `space`.
    pub fn new(space: SpaceId) -> Self {
        Self {
            space,
            state: Mutex::new(Default::default()),
        }
    }

    /// The space this replica is authoritative for.
    pub fn space(&self) -> &SpaceId {
        &self.space
    }

    /// Validates and applies a commit synchronously.
    pub fn apply(&self, commit: Commit) -> Result<()> {
        let mut state = self.state.lock();
        for claim in &commit.claims {
            let key = (claim.address.entity.clone(), claim.address.media.clone());
            let root = state.get(&key).and_then(|fact| fact.value.as_ref());
            let current = value::project(root, claim.address.path.as_path())
                .value()
                .cloned();
            if current != claim.value {
                tracing::info!("rejecting commit: {} changed", claim.address);
                return Err(StorageError::Inconsistent {
                    claimed: Box::new(claim.clone()),
                    actual: Box::new(Attestation::new(claim.address.clone(), current)),
                });
            }
        }
        for fact in commit.facts {
            let key = (fact.entity.clone(), fact.media.clone());
            let tip = state.get(&key).map(Fact::id);
            if fact.cause != tip {
                return Err(StorageError::Conflict(format!(
                    "stale fact for {}: expected cause {:?}, found {:?}",
                    fact.entity, tip, fact.cause
                )));
            }
            state.insert(key, fact);
        }
        Ok(())
    }

    /// Returns the current value of an entity, for inspection in tests.
    pub fn value(&self, entity: &EntityId, media: &MediaType) -> Option<serde_json::Value> {
        let state = self.state.lock();
        state
            .get(&(entity.clone(), media.clone()))
            .and_then(|fact| fact.value.clone())
    }
}

impl Replica for MemoryReplica {
    fn get(&self, entity: &EntityId, media: &MediaType) -> Result<Option<Fact>> {
        let state = self.state.lock();
        Ok(state.get(&(entity.clone(), media.clone())).cloned())
    }

    fn commit(&self, commit: Commit) -> BoxFuture<'static, Result<()>> {
        let result = self.apply(commit);
        future::ready(result).boxed()
    }
}

/// An in-process store that creates replicas on demand.
#[derive(Clone, Default)]
pub struct MemoryStore {
    replicas: Arc<Mutex<FnvHashMap<SpaceId, Arc<MemoryReplica>>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the replica for `space`, creating it if necessary.
    pub fn replica(&self, space: &SpaceId) -> Arc<MemoryReplica> {
        let mut replicas = self.replicas.lock();
        replicas
            .entry(space.clone())
            .or_insert_with(|| Arc::new(MemoryReplica::new(space.clone())))
            .clone()
    }
}

impl Store for MemoryStore {
    fn open(&self, space: &SpaceId) -> Result<Arc<dyn Replica>> {
        Ok(self.replica(space))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::path;
    use serde_json::json;

    #[test]
    fn commit_validates_claims() {
        let space = SpaceId::new("space1");
        let replica = MemoryReplica::new(space.clone());
        let fact = Fact::assert(
            EntityId::new("user"),
            MediaType::json(),
            Some(json!({"name": "Alice", "version": 1})),
        );
        replica
            .apply(Commit {
                space: space.clone(),
                claims: vec![],
                facts: vec![fact.clone()],
            })
            .unwrap();

        // a claim matching current state passes
        replica
            .apply(Commit {
                space: space.clone(),
                claims: vec![Attestation::new(
                    Address::json("space1", "user", path!["name"]),
                    Some(json!("Alice")),
                )],
                facts: vec![],
            })
            .unwrap();

        // the entity changes, so the same claim now fails
        replica
            .apply(Commit {
                space: space.clone(),
                claims: vec![],
                facts: vec![Fact::next(&fact, Some(json!({"name": "Bob", "version": 2})))],
            })
            .unwrap();
        let err = replica
            .apply(Commit {
                space,
                claims: vec![Attestation::new(
                    Address::json("space1", "user", path!["name"]),
                    Some(json!("Alice")),
                )],
                facts: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Inconsistent { .. }));
    }

    #[test]
    fn commit_rejects_stale_causes() {
        let space = SpaceId::new("space1");
        let replica = MemoryReplica::new(space.clone());
        let first = Fact::assert(EntityId::new("doc:1"), MediaType::json(), Some(json!(1)));
        replica
            .apply(Commit {
                space: space.clone(),
                claims: vec![],
                facts: vec![first.clone()],
            })
            .unwrap();
        // a second initial fact no longer matches the tip
        let err = replica
            .apply(Commit {
                space,
                claims: vec![],
                facts: vec![Fact::assert(
                    EntityId::new("doc:1"),
                    MediaType::json(),
                    Some(json!(2)),
                )],
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn retraction_keeps_the_chain() {
        let space = SpaceId::new("space1");
        let replica = MemoryReplica::new(space.clone());
        let first = Fact::assert(EntityId::new("doc:1"), MediaType::json(), Some(json!(1)));
        replica
            .apply(Commit {
                space: space.clone(),
                claims: vec![],
                facts: vec![first.clone()],
            })
            .unwrap();
        replica
            .apply(Commit {
                space,
                claims: vec![],
                facts: vec![Fact::next(&first, None)],
            })
            .unwrap();
        let entity = EntityId::new("doc:1");
        let tip = replica.get(&entity, &MediaType::json()).unwrap().unwrap();
        assert_eq!(tip.value, None);
        assert_eq!(tip.cause, Some(first.id()));
    }
}

//! # The weft transactional memory store
//!
//! Documents live in *memory spaces*: per-principal stores addressed by
//! `(space, entity, media-type, path)` where the path points into a JSON
//! document. A [`Transaction`] journals every read and write against the
//! spaces it touches and publishes its changes atomically.
//!
//! ## Invariants
//! Each per-space journal (a [`Chronicle`]) keeps two maps of
//! attestations, both maintaining a minimal forest per entity (no stored
//! path is a prefix of another):
//!
//! - [`Novelty`], the write set: what the transaction intends the store to
//!   become. A write extending an earlier write merges into it at the
//!   relative sub-path; a write above earlier writes shadows and evicts
//!   them.
//! - [`History`], the read set: what the transaction observed. A new
//!   observation consistent with an earlier one is redundant and dropped;
//!   an inconsistent one fails immediately with both attestations
//!   attached.
//!
//! Any invariant established by a read is violated if and only if the
//! observed sub-value changes: at commit time the replica re-checks every
//! claim against its current state and rejects the commit with
//! [`StorageError::Inconsistent`] on any divergence.
//!
//! ## Facts
//! Committed state is a chain of [`Fact`]s per entity: each fact carries
//! the document value (or none, for a retraction) and the identity of the
//! fact it supersedes. A commit folds the whole write set of an entity
//! into a single fact atop the latest known state.
//!
//! ## Transactions
//! A [`Transaction`] starts `ready`, accepts synchronous reads and writes,
//! and commits asynchronously: every space's branch is driven in parallel
//! and the transaction settles on the first error or on all-ok. Terminal
//! results are sticky; `abort` ends the transaction with its reason and
//! every later operation fails with [`StorageError::Complete`].
#![warn(missing_docs)]
mod address;
mod chronicle;
mod error;
mod invariant;
mod path;
#[cfg(test)]
mod props;
mod replica;
mod transaction;
mod value;

pub use crate::address::{
    Address, Attestation, Commit, EntityId, Fact, FactId, MediaType, SpaceId,
};
pub use crate::chronicle::Chronicle;
pub use crate::error::{Result, StorageError};
pub use crate::invariant::{History, Novelty};
pub use crate::path::{Path, PathBuf, Segment};
pub use crate::replica::{MemoryReplica, MemoryStore, Replica, Store};
pub use crate::transaction::{
    Activity, ReadOptions, StatusReport, Transaction, TransactionStatus,
};
pub use crate::value::{get, has, project, set, Projection};

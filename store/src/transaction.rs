//! The storage transaction: one chronicle per touched memory space,
//! driven through `ready → pending → done`.

use crate::address::{Address, Attestation, Commit, SpaceId};
use crate::chronicle::Chronicle;
use crate::error::{Result, StorageError};
use crate::path::Segment;
use crate::replica::{Replica, Store};
use fnv::FnvHashMap;
use serde_json::Value;
use std::sync::Arc;

/// One entry of the transaction's activity log, recording the user's
/// observation order faithfully.
#[derive(Clone, Debug)]
pub enum Activity {
    /// A read, with the caller-supplied metadata.
    Read {
        /// The address that was read.
        address: Address,
        /// Opaque metadata passed through [`ReadOptions`].
        meta: Option<Value>,
    },
    /// A write.
    Write {
        /// The address that was written.
        address: Address,
    },
}

/// Options accepted by [`Transaction::read`].
#[derive(Clone, Debug, Default)]
pub struct ReadOptions {
    /// Opaque metadata recorded in the activity log.
    pub meta: Option<Value>,
}

/// The observable state of a transaction.
#[derive(Clone, Debug)]
pub enum TransactionStatus {
    /// Accepting reads and writes.
    Ready,
    /// A commit is in flight.
    Pending,
    /// Terminal, successful.
    Done,
    /// Terminal, failed or aborted.
    Failed(StorageError),
}

/// A point-in-time view of a transaction.
#[derive(Clone, Debug)]
pub struct StatusReport {
    /// Current state.
    pub status: TransactionStatus,
    /// The spaces this transaction holds branches in.
    pub branches: Vec<SpaceId>,
    /// The activity log so far.
    pub activity: Vec<Activity>,
}

enum State {
    Ready,
    Pending,
    Done(Result<()>),
}

/// A transaction over one or more memory spaces.
///
/// Every space touched gets its own branch (a [`Chronicle`]); branches
/// commit independently and in parallel. Reads within the transaction see
/// its own earlier writes; every replica observation becomes a read
/// invariant that the replica re-validates at commit time.
pub struct Transaction {
    store: Arc<dyn Store>,
    branches: FnvHashMap<SpaceId, Chronicle>,
    state: State,
    activity: Vec<Activity>,
}

impl Transaction {
    /// Creates a transaction against `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            branches: Default::default(),
            state: State::Ready,
            activity: Vec::new(),
        }
    }

    /// Returns the current status, branches and activity log.
    pub fn status(&self) -> StatusReport {
        let status = match &self.state {
            State::Ready => TransactionStatus::Ready,
            State::Pending => TransactionStatus::Pending,
            State::Done(Ok(())) => TransactionStatus::Done,
            State::Done(Err(error)) => TransactionStatus::Failed(error.clone()),
        };
        StatusReport {
            status,
            branches: self.branches.keys().cloned().collect(),
            activity: self.activity.clone(),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            State::Ready => Ok(()),
            _ => Err(StorageError::Complete),
        }
    }

    fn branch(&mut self, space: &SpaceId) -> Result<&mut Chronicle> {
        if !self.branches.contains_key(space) {
            let replica = self.store.open(space)?;
            self.branches
                .insert(space.clone(), Chronicle::new(space.clone(), replica));
        }
        Ok(self.branches.get_mut(space).expect("branch was inserted"))
    }

    /// Reads the value at `address`.
    pub fn read(&mut self, address: &Address, options: ReadOptions) -> Result<Attestation> {
        self.ensure_ready()?;
        self.activity.push(Activity::Read {
            address: address.clone(),
            meta: options.meta,
        });
        let attestation = self.branch(&address.space)?.read(address)?;
        Ok(parse_source_reference(attestation))
    }

    /// Records the intent that `address` become `value`. `None` deletes.
    pub fn write(&mut self, address: &Address, value: Option<Value>) -> Result<Attestation> {
        self.ensure_ready()?;
        self.activity.push(Activity::Write {
            address: address.clone(),
        });
        self.branch(&address.space)?.write(address, value)
    }

    /// Aborts the transaction. The first reason wins; later aborts return
    /// it, and any other operation after abort fails with `Complete`.
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<()> {
        match &self.state {
            State::Ready => {
                let reason = reason.into();
                tracing::info!("transaction aborted: {}", reason);
                self.state = State::Done(Err(StorageError::Aborted { reason }));
                Ok(())
            }
            State::Done(Err(aborted @ StorageError::Aborted { .. })) => Err(aborted.clone()),
            _ => Err(StorageError::Complete),
        }
    }

    /// Commits every non-empty branch in parallel and settles all of them.
    ///
    /// Idempotent: once terminal, later calls return the same result. A
    /// commit after abort fails with the abort error.
    pub async fn commit(&mut self) -> Result<()> {
        match &self.state {
            State::Ready => {}
            State::Pending => return Err(StorageError::Complete),
            State::Done(result) => return result.clone(),
        }
        self.state = State::Pending;
        let mut staged: Vec<(Arc<dyn Replica>, Commit)> = Vec::new();
        for chronicle in self.branches.values_mut() {
            let replica = chronicle.replica();
            match chronicle.commit() {
                Ok(commit) if commit.is_empty() => {}
                Ok(commit) => staged.push((replica, commit)),
                Err(error) => {
                    self.state = State::Done(Err(error.clone()));
                    return Err(error);
                }
            }
        }
        let commits = staged
            .into_iter()
            .map(|(replica, commit)| replica.commit(commit));
        let settled = futures::future::join_all(commits).await;
        let result = match settled.into_iter().find_map(|branch| branch.err()) {
            Some(error) => Err(error),
            None => Ok(()),
        };
        match &result {
            Ok(()) => tracing::info!("transaction committed"),
            Err(error) => tracing::info!("transaction failed: {}", error),
        }
        self.state = State::Done(result.clone());
        result
    }
}

/// Legacy references store their source as a JSON string of the form
/// `{"/": ...}`; a read of the `source` field parses it back into an
/// object. Parse failures fall through to the raw string.
fn parse_source_reference(mut attestation: Attestation) -> Attestation {
    let is_source_path = attestation.address.path.len() == 1
        && attestation.address.path.as_path().first().and_then(Segment::field) == Some("source");
    if !is_source_path {
        return attestation;
    }
    if let Some(Value::String(text)) = &attestation.value {
        if text.starts_with("{\"/\":") {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                attestation.value = Some(parsed);
            }
        }
    }
    attestation
}

//! The runtime facade and the builder bound to it.

use crate::cell::{CellId, CellState, OpaqueRef};
use crate::error::{bail, BuilderError};
use crate::frame::{FrameId, FrameInit, FrameStack, SharedTransaction};
use crate::ifc::{Lattice, SetLattice};
use anyhow::Context;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use weft_store::{Address, EntityId, MemoryStore, Replica, SpaceId, Store, Transaction};

/// Clonable handle to a store, a classification lattice and the cell
/// identity mint. Everything a builder or scheduler shares.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    store: Arc<dyn Store>,
    lattice: Arc<dyn Lattice>,
    counter: AtomicU64,
}

impl Runtime {
    /// Creates a runtime over `store` with the default lattice.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_lattice(store, Arc::new(SetLattice))
    }

    /// Creates a runtime with an embedder-supplied lattice.
    pub fn with_lattice(store: Arc<dyn Store>, lattice: Arc<dyn Lattice>) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store,
                lattice,
                counter: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a runtime over an in-process store.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// The backing store.
    pub fn store(&self) -> Arc<dyn Store> {
        self.inner.store.clone()
    }

    /// The classification lattice.
    pub fn lattice(&self) -> Arc<dyn Lattice> {
        self.inner.lattice.clone()
    }

    /// Opens a fresh transaction against the store.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.inner.store.clone())
    }

    /// Opens a transaction that frames can share.
    pub fn shared_transaction(&self) -> SharedTransaction {
        Arc::new(Mutex::new(self.transaction()))
    }

    /// Opens the replica for `space`.
    pub fn replica(&self, space: &SpaceId) -> anyhow::Result<Arc<dyn Replica>> {
        self.inner
            .store
            .open(space)
            .with_context(|| format!("opening a replica for {}", space))
    }

    /// Creates a builder bound to this runtime, with a base frame pushed.
    pub fn builder(&self) -> Builder {
        Builder::new(self.clone())
    }

    /// Mints a stable entity URI for a builder cell from its frame's
    /// cause token and a process-wide counter.
    pub(crate) fn mint_entity(&self, cause: Option<&Value>) -> EntityId {
        let nonce = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = blake3::Hasher::new();
        if let Some(cause) = cause {
            hasher.update(&serde_json::to_vec(cause).expect("causes are valid json"));
        }
        hasher.update(&nonce.to_be_bytes());
        EntityId::new(format!("cell:{}", hasher.finalize().to_hex()))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

/// Graph construction bound to a [`Runtime`]. Owns the frame stack;
/// everything here assumes single-threaded construction.
pub struct Builder {
    runtime: Runtime,
    frames: RefCell<FrameStack>,
    next_cell: Cell<u64>,
}

impl Builder {
    pub(crate) fn new(runtime: Runtime) -> Self {
        let builder = Self {
            runtime: runtime.clone(),
            frames: RefCell::new(FrameStack::new()),
            next_cell: Cell::new(0),
        };
        builder.frames.borrow_mut().push(FrameInit {
            runtime: Some(runtime),
            ..Default::default()
        });
        builder
    }

    /// The runtime this builder is bound to.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Pushes a frame inheriting runtime, transaction and space from its
    /// parent unless overridden.
    pub fn push_frame(&self, init: FrameInit) -> FrameId {
        self.frames.borrow_mut().push(init)
    }

    /// Like [`Builder::push_frame`], carrying a cause token for stable
    /// identifier derivation.
    pub fn push_frame_from_cause(&self, cause: Value, mut init: FrameInit) -> FrameId {
        init.cause = Some(cause);
        self.push_frame(init)
    }

    /// Pops the top frame, or splices `frame` out of the stack when it is
    /// not on top. Popping an unknown frame is a no-op.
    pub fn pop_frame(&self, frame: Option<FrameId>) {
        self.frames.borrow_mut().pop(frame)
    }

    /// The current frame.
    pub fn top_frame(&self) -> Option<FrameId> {
        self.frames.borrow().top().map(|frame| frame.id)
    }

    /// The number of live frames.
    pub fn frame_depth(&self) -> usize {
        self.frames.borrow().depth()
    }

    /// The frame `frame` was pushed under, if both are still live.
    pub fn parent_frame(&self, frame: FrameId) -> Option<FrameId> {
        self.frames.borrow().get(frame).and_then(|frame| frame.parent)
    }

    pub(crate) fn frame_live(&self, frame: FrameId) -> bool {
        self.frames.borrow().contains(frame)
    }

    pub(crate) fn check_live(&self, reference: &OpaqueRef) {
        let frames = self.frames.borrow();
        if frames.contains(reference.frame_id()) {
            return;
        }
        // trusted embedders may bind references across torn-down frames
        if frames.top().map_or(false, |frame| frame.unsafe_binding) {
            return;
        }
        bail(BuilderError::ClosureCapture);
    }

    /// References created under `frame`, in creation order.
    pub fn frame_cells(&self, frame: FrameId) -> Vec<OpaqueRef> {
        self.frames
            .borrow()
            .get(frame)
            .map(|frame| frame.cells.clone())
            .unwrap_or_default()
    }

    /// True when the current frame was pushed for a handler invocation.
    pub fn in_handler(&self) -> bool {
        self.frames
            .borrow()
            .top()
            .map_or(false, |frame| frame.in_handler)
    }

    pub(crate) fn bump_counter(&self, frame: FrameId) -> u64 {
        let mut frames = self.frames.borrow_mut();
        let frame = frames.get_mut(frame).expect("frame is live");
        let counter = frame.counter;
        frame.counter += 1;
        counter
    }

    /// Allocates a cell in the current frame and returns its root
    /// reference. Requires a runtime in the frame.
    pub fn cell(&self, default: Option<Value>, schema: Option<Value>) -> OpaqueRef {
        self.make_cell(default, schema, false, None)
    }

    /// Allocates a stream cell, marked with the `$stream` sentinel.
    pub fn stream(&self) -> OpaqueRef {
        self.make_cell(Some(json!({"$stream": true})), None, true, None)
    }

    /// Wraps a preexisting cell at `address` as a reference.
    pub fn external(&self, address: Address, schema: Option<Value>) -> OpaqueRef {
        self.make_cell(None, schema, false, Some(address))
    }

    fn make_cell(
        &self,
        default: Option<Value>,
        schema: Option<Value>,
        stream: bool,
        external: Option<Address>,
    ) -> OpaqueRef {
        let mut frames = self.frames.borrow_mut();
        let Some(frame) = frames.top_mut() else {
            bail(BuilderError::MissingFrame);
        };
        let Some(runtime) = frame.runtime.clone() else {
            bail(BuilderError::MissingRuntime);
        };
        let entity = runtime.mint_entity(frame.cause.as_ref());
        if let (Some(tx), Some(space), Some(value)) = (&frame.tx, &frame.space, &default) {
            let address = Address::json(space.clone(), entity.clone(), weft_store::PathBuf::new());
            if let Err(error) = tx.lock().write(&address, Some(value.clone())) {
                tracing::warn!("failed to seed cell {}: {}", address, error);
            }
        }
        let id = CellId(self.next_cell.get());
        self.next_cell.set(id.0 + 1);
        let reference = OpaqueRef::create(CellState {
            id,
            entity,
            name: None,
            schema,
            default,
            nodes: Vec::new(),
            links: Default::default(),
            frame: frame.id,
            external,
            stream,
        });
        frame.cells.push(reference.clone());
        reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use weft_store::{MediaType, ReadOptions};

    #[test]
    fn minted_entities_are_stable_per_cause_and_counter() {
        let runtime = Runtime::memory();
        let a = runtime.mint_entity(Some(&json!({"event": 1})));
        let b = runtime.mint_entity(Some(&json!({"event": 1})));
        assert!(a.as_str().starts_with("cell:"));
        // the counter distinguishes cells sharing a cause
        assert_ne!(a, b);
    }

    #[test]
    fn cells_require_a_runtime_in_the_frame() {
        let builder = Runtime::memory().builder();
        // a frame explicitly without a runtime cannot back cells
        let bare = builder.frames.borrow_mut().push(FrameInit::default());
        builder.frames.borrow_mut().get_mut(bare).unwrap().runtime = None;
        let result = catch_unwind(AssertUnwindSafe(|| builder.cell(None, None)));
        assert_eq!(
            result.unwrap_err().downcast_ref::<BuilderError>(),
            Some(&BuilderError::MissingRuntime)
        );
        builder.pop_frame(Some(bare));
        let _ = builder.cell(None, None);
    }

    #[test]
    fn framed_cells_seed_their_transaction() {
        let runtime = Runtime::memory();
        let builder = runtime.builder();
        let tx = runtime.shared_transaction();
        let frame = builder.push_frame(FrameInit {
            tx: Some(tx.clone()),
            space: Some(SpaceId::new("space1")),
            ..Default::default()
        });
        let cell = builder.cell(Some(json!({"count": 0})), None);
        builder.pop_frame(Some(frame));

        let address = Address::json(
            SpaceId::new("space1"),
            cell.entity(),
            weft_store::PathBuf::new(),
        );
        let read = tx.lock().read(&address, ReadOptions::default()).unwrap();
        assert_eq!(read.value, Some(json!({"count": 0})));
        assert_eq!(address.media, MediaType::json());
    }

    #[test]
    fn frames_track_their_cells_and_flags() {
        let runtime = Runtime::memory();
        let builder = runtime.builder();
        let base = builder.top_frame().unwrap();
        let frame = builder.push_frame(FrameInit {
            in_handler: true,
            ..Default::default()
        });
        assert_eq!(builder.parent_frame(frame), Some(base));
        assert!(builder.in_handler());
        let first = builder.cell(None, None);
        let second = builder.cell(None, None);
        assert_eq!(builder.frame_cells(frame), vec![first, second]);
        builder.pop_frame(Some(frame));
        assert!(!builder.in_handler());
    }

    #[test]
    fn unsafe_binding_frames_accept_foreign_references() {
        let runtime = Runtime::memory();
        let builder = runtime.builder();
        let doomed = builder.push_frame(FrameInit::default());
        let foreign = builder.cell(None, None);
        builder.pop_frame(Some(doomed));

        let result = catch_unwind(AssertUnwindSafe(|| builder.derive(&foreign, |v| v)));
        assert_eq!(
            result.unwrap_err().downcast_ref::<BuilderError>(),
            Some(&BuilderError::ClosureCapture)
        );

        let trusted = builder.push_frame(FrameInit {
            unsafe_binding: true,
            ..Default::default()
        });
        let _ = builder.derive(&foreign, |v| v);
        builder.pop_frame(Some(trusted));
    }

    #[test]
    fn cause_tokens_flow_into_entity_identity() {
        let runtime = Runtime::memory();
        let builder = runtime.builder();
        let frame = builder.push_frame_from_cause(json!({"charm": "c1"}), FrameInit::default());
        let cell = builder.cell(None, None);
        assert!(cell.entity().as_str().starts_with("cell:"));
        builder.pop_frame(Some(frame));
    }
}

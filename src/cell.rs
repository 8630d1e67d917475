//! Builder-time handles to forthcoming cells.
//!
//! An [`OpaqueRef`] is a cheap clone of `(cell, path, schema scope)`; all
//! handles onto one cell share its state. References only live during the
//! frame that created them; a reference serialized from an enclosing frame
//! becomes a cross-frame alias.

use crate::error::{bail, BuilderError};
use crate::frame::FrameId;
use crate::node::Node;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use weft_store::{Address, EntityId, Path, PathBuf, Segment};

/// Children yielded by iteration before the destructuring bound trips.
pub const MAX_CHILDREN: usize = 50;

/// Arena identity of a cell under construction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CellId(pub(crate) u64);

pub(crate) struct CellState {
    pub id: CellId,
    pub entity: EntityId,
    pub name: Option<String>,
    pub schema: Option<Value>,
    pub default: Option<Value>,
    pub nodes: Vec<Arc<Node>>,
    pub links: BTreeMap<String, OpaqueRef>,
    pub frame: FrameId,
    pub external: Option<Address>,
    pub stream: bool,
}

/// A proxy over a forthcoming cell, addressed at a path into its root.
#[derive(Clone)]
pub struct OpaqueRef {
    id: CellId,
    cell: Arc<RwLock<CellState>>,
    path: PathBuf,
    schema: Option<Value>,
}

impl OpaqueRef {
    pub(crate) fn create(state: CellState) -> Self {
        Self {
            id: state.id,
            cell: Arc::new(RwLock::new(state)),
            path: PathBuf::new(),
            schema: None,
        }
    }

    /// Returns a proxy for the child at `segment`.
    pub fn key(&self, segment: impl Into<Segment>) -> OpaqueRef {
        let segment = segment.into();
        if self.path.is_empty() {
            if let Segment::Field(name) = &segment {
                if let Some(linked) = self.cell.read().links.get(name) {
                    return linked.clone();
                }
            }
        }
        let mut path = self.path.clone();
        path.push(segment);
        OpaqueRef {
            id: self.id,
            cell: self.cell.clone(),
            path,
            schema: None,
        }
    }

    /// Iterates child proxies at indices `0..50`, for destructuring into
    /// tuples. Take what you need; pulling a 51st child aborts.
    pub fn iter(&self) -> Children {
        Children {
            parent: self.clone(),
            next: 0,
        }
    }

    /// Assigns the cell's name. Only the root proxy may be named.
    pub fn set_name(&self, name: &str) {
        if !self.path.is_empty() {
            bail(BuilderError::NestedName);
        }
        self.cell.write().name = Some(name.to_string());
    }

    /// The cell's name, if assigned or derived.
    pub fn name(&self) -> Option<String> {
        self.cell.read().name.clone()
    }

    /// Returns this proxy with a schema attached to its scope. The root
    /// cell's schema is not affected.
    pub fn with_schema(self, schema: Value) -> Self {
        Self {
            schema: Some(schema),
            ..self
        }
    }

    /// The schema of this proxy scope.
    pub fn schema(&self) -> Option<Value> {
        self.schema.clone()
    }

    /// The schema of the root cell.
    pub fn root_schema(&self) -> Option<Value> {
        self.cell.read().schema.clone()
    }

    /// The root proxy of this reference's cell.
    pub fn root(&self) -> OpaqueRef {
        OpaqueRef {
            id: self.id,
            cell: self.cell.clone(),
            path: PathBuf::new(),
            schema: None,
        }
    }

    /// The path of this proxy into its root.
    pub fn path(&self) -> Path<'_> {
        self.path.as_path()
    }

    /// The cell's arena identity.
    pub fn cell_id(&self) -> CellId {
        self.id
    }

    /// The frame the cell was born in.
    pub fn frame_id(&self) -> FrameId {
        self.cell.read().frame
    }

    /// The entity backing the cell.
    pub fn entity(&self) -> EntityId {
        self.cell.read().entity.clone()
    }

    /// The cell's default value.
    pub fn default_value(&self) -> Option<Value> {
        self.cell.read().default.clone()
    }

    /// True for event streams.
    pub fn is_stream(&self) -> bool {
        self.cell.read().stream
    }

    /// The preexisting address this reference escapes to, if any.
    pub fn external(&self) -> Option<Address> {
        self.cell.read().external.clone()
    }

    /// Registers a node this cell participates in.
    pub(crate) fn connect(&self, node: &Arc<Node>) {
        let mut state = self.cell.write();
        if !state.nodes.iter().any(|known| Arc::ptr_eq(known, node)) {
            state.nodes.push(node.clone());
        }
    }

    /// The nodes this cell participates in.
    pub(crate) fn nodes(&self) -> Vec<Arc<Node>> {
        self.cell.read().nodes.clone()
    }

    /// Attaches another reference under a reserved key of the root.
    pub(crate) fn link(&self, key: &str, target: OpaqueRef) {
        self.cell.write().links.insert(key.to_string(), target);
    }

    /// Snapshot of everything known about this reference.
    pub fn export(&self) -> CellExport {
        let state = self.cell.read();
        let value = match &state.default {
            Some(default) => weft_store::get(default, self.path.as_path()).cloned(),
            None => None,
        };
        CellExport {
            cell: state.id,
            path: self.path.clone(),
            value,
            default_value: state.default.clone(),
            schema: self.schema.clone(),
            root_schema: state.schema.clone(),
            name: state.name.clone(),
            nodes: state.nodes.clone(),
            frame: state.frame,
            external: state.external.clone(),
        }
    }

    /// References have no primitive value during construction; this always
    /// aborts, pointing the caller at `derive()`.
    pub fn as_primitive(&self) -> ! {
        bail(BuilderError::PrimitiveCoercion)
    }
}

impl PartialEq for OpaqueRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.path == other.path
    }
}

impl Eq for OpaqueRef {}

impl std::hash::Hash for OpaqueRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.path.hash(state);
    }
}

impl std::fmt::Debug for OpaqueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "OpaqueRef({}", self.id.0)?;
        if !self.path.is_empty() {
            write!(f, ".{}", self.path)?;
        }
        write!(f, ")")
    }
}

/// Exported view of an [`OpaqueRef`].
pub struct CellExport {
    /// Arena identity.
    pub cell: CellId,
    /// Path of the proxy into its root.
    pub path: PathBuf,
    /// The default value projected to the proxy's path.
    pub value: Option<Value>,
    /// The root cell's default value.
    pub default_value: Option<Value>,
    /// Scope schema of the proxy.
    pub schema: Option<Value>,
    /// Schema of the root cell.
    pub root_schema: Option<Value>,
    /// Cell name.
    pub name: Option<String>,
    /// Nodes the cell participates in.
    pub nodes: Vec<Arc<Node>>,
    /// Frame the cell was born in.
    pub frame: FrameId,
    /// Preexisting address for external cells.
    pub external: Option<Address>,
}

/// Bounded child iterator; see [`OpaqueRef::iter`].
pub struct Children {
    parent: OpaqueRef,
    next: usize,
}

impl Iterator for Children {
    type Item = OpaqueRef;

    fn next(&mut self) -> Option<OpaqueRef> {
        if self.next >= MAX_CHILDREN {
            bail(BuilderError::IterationBound);
        }
        let child = self.parent.key(self.next);
        self.next += 1;
        Some(child)
    }
}

//! Pattern construction and serialization.
//!
//! A pattern is the portable artifact of graph construction:
//! `{argumentSchema, resultSchema, initial, result, nodes}` with every
//! reference rewritten as a `$alias` into the canonical cell layout
//! (`argument`, `resultRef`, `internal/<name>`). References from
//! enclosing frames serialize with a nesting depth; a reference whose
//! owner is not in scope at all leaves a shadow for the enclosing
//! serializer to resolve.

use crate::cell::{CellId, OpaqueRef};
use crate::error::{bail, BuilderError};
use crate::frame::{FrameId, FrameInit};
use crate::ifc;
use crate::node::{Module, Node, Term, Wrapper};
use crate::runtime::Builder;
use fnv::FnvHashMap;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use weft_store::PathBuf;

/// Reserved key under which a pattern's own output is reachable from its
/// argument reference.
pub const SELF_KEY: &str = "$self";

/// A constructed dataflow graph, ready to serialize or instantiate.
pub struct Pattern {
    argument_schema: Value,
    result_schema: Value,
    initial: Value,
    result: Term,
    nodes: Vec<Arc<Node>>,
    paths: FnvHashMap<CellId, PathBuf>,
}

impl Pattern {
    /// The pattern's argument schema.
    pub fn argument_schema(&self) -> &Value {
        &self.argument_schema
    }

    /// The pattern's result schema.
    pub fn result_schema(&self) -> &Value {
        &self.result_schema
    }

    /// Default values of internal cells, keyed by canonical path.
    pub fn initial(&self) -> &Value {
        &self.initial
    }

    /// The collected nodes.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Serializes the pattern to its portable JSON form.
    pub fn to_json(&self) -> Value {
        self.serialize_with(&AliasEnv::default())
    }

    fn serialize_with<'a>(&'a self, env: &AliasEnv<'a>) -> Value {
        let env = env.extended(&self.paths);
        json!({
            "argumentSchema": self.argument_schema.clone(),
            "resultSchema": self.result_schema.clone(),
            "initial": self.initial.clone(),
            "result": serialize_term(&self.result, &env),
            "nodes": self.nodes
                .iter()
                .map(|node| serialize_node(node, &env))
                .collect::<Vec<_>>(),
        })
    }

    /// Instantiates the pattern: a new node executes it over `inputs` and
    /// a fresh output reference is returned.
    pub fn call(self: &Arc<Self>, builder: &Builder, inputs: impl Into<Term>) -> OpaqueRef {
        builder.apply_node(Module::Pattern(self.clone()), inputs.into())
    }
}

impl serde::Serialize for Pattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde::Serialize::serialize(&self.to_json(), serializer)
    }
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("nodes", &self.nodes.len())
            .field("cells", &self.paths.len())
            .finish_non_exhaustive()
    }
}

/// Scopes visible while serializing: one canonical path map per pattern
/// nesting level, innermost last.
#[derive(Default)]
struct AliasEnv<'a> {
    levels: Vec<&'a FnvHashMap<CellId, PathBuf>>,
}

impl<'a> AliasEnv<'a> {
    fn extended(&self, paths: &'a FnvHashMap<CellId, PathBuf>) -> AliasEnv<'a> {
        let mut levels = self.levels.clone();
        levels.push(paths);
        AliasEnv { levels }
    }

    fn lookup(&self, id: CellId) -> Option<(usize, &'a PathBuf)> {
        for (depth, level) in self.levels.iter().rev().enumerate() {
            if let Some(path) = level.get(&id) {
                return Some((depth, path));
            }
        }
        None
    }
}

fn serialize_term<'a>(term: &'a Term, env: &AliasEnv<'a>) -> Value {
    match term {
        Term::Null => Value::Null,
        Term::Bool(b) => Value::Bool(*b),
        Term::Number(n) => Value::Number(n.clone()),
        Term::String(s) => Value::String(s.clone()),
        Term::Array(items) => Value::Array(items.iter().map(|item| serialize_term(item, env)).collect()),
        Term::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), serialize_term(value, env)))
                .collect(),
        ),
        Term::Ref(reference) => serialize_alias(reference, env),
        Term::Pattern(pattern) => pattern.serialize_with(env),
    }
}

fn serialize_alias(reference: &OpaqueRef, env: &AliasEnv) -> Value {
    let mut alias = Map::new();
    match env.lookup(reference.cell_id()) {
        Some((depth, canonical)) => {
            let path = canonical.join(reference.path());
            if depth > 0 {
                alias.insert("cell".to_string(), json!(depth));
            }
            alias.insert(
                "path".to_string(),
                serde_json::to_value(&path).expect("paths are valid json"),
            );
            if let Some(schema) = reference.schema() {
                alias.insert("schema".to_string(), schema);
                if !reference.path().is_empty() {
                    if let Some(root_schema) = reference.root_schema() {
                        alias.insert("rootSchema".to_string(), root_schema);
                    }
                }
            }
        }
        None => {
            // still-unresolved owner: the enclosing frame's serializer
            // sees this and substitutes its own canonical path
            alias.insert("cell".to_string(), json!({"shadow": reference.cell_id().0}));
            alias.insert(
                "path".to_string(),
                serde_json::to_value(reference.path().to_owned()).expect("paths are valid json"),
            );
        }
    }
    json!({ "$alias": alias })
}

fn serialize_node<'a>(node: &'a Node, env: &AliasEnv<'a>) -> Value {
    json!({
        "module": serialize_module(&node.module, env),
        "inputs": serialize_term(&node.inputs, env),
        "outputs": serialize_term(&node.outputs, env),
    })
}

fn serialize_module<'a>(module: &'a Module, env: &AliasEnv<'a>) -> Value {
    match module {
        Module::Javascript {
            implementation,
            argument_schema,
            result_schema,
            wrapper,
        } => {
            let mut obj = Map::new();
            obj.insert("type".to_string(), json!("javascript"));
            obj.insert("implementation".to_string(), json!(implementation.preview()));
            if let Some(schema) = argument_schema {
                obj.insert("argumentSchema".to_string(), schema.clone());
            }
            if let Some(schema) = result_schema {
                obj.insert("resultSchema".to_string(), schema.clone());
            }
            if let Some(Wrapper::Handler) = wrapper {
                obj.insert("wrapper".to_string(), json!("handler"));
            }
            Value::Object(obj)
        }
        Module::Ref(name) => json!({"type": "ref", "implementation": name}),
        Module::Pattern(pattern) => {
            json!({"type": "pattern", "implementation": pattern.serialize_with(env)})
        }
    }
}

fn gather_bindings(term: &Term, out: &mut Vec<(String, CellId)>) {
    match term {
        Term::Object(entries) => {
            for (key, value) in entries {
                if let Term::Ref(reference) = value {
                    out.push((key.clone(), reference.cell_id()));
                } else {
                    gather_bindings(value, out);
                }
            }
        }
        Term::Array(items) => {
            for item in items {
                gather_bindings(item, out);
            }
        }
        _ => {}
    }
}

impl Builder {
    /// Constructs a pattern: pushes a frame, allocates the argument and
    /// self-output cells, runs `f`, propagates input classifications to
    /// the outputs, collects the graph, assigns canonical paths and pops
    /// the frame.
    pub fn pattern<F>(&self, argument_schema: Value, result_schema: Value, f: F) -> Arc<Pattern>
    where
        F: FnOnce(&Builder, &OpaqueRef) -> Term,
    {
        let frame = self.push_frame(FrameInit::default());
        let inputs = self.cell(None, Some(argument_schema.clone()));
        let self_ref = self.cell(None, Some(result_schema.clone()));
        inputs.link(SELF_KEY, self_ref.clone());

        let outputs = f(self, &inputs);

        let lattice = self.runtime().lattice();
        let labels = ifc::collect_classifications(&argument_schema);
        let outputs = ifc::apply_input_ifc_to_output(lattice.as_ref(), &labels, &outputs);
        let result_schema =
            ifc::apply_argument_ifc_to_result(lattice.as_ref(), &argument_schema, result_schema);

        let (cells, nodes) = self.collect_graph(frame, &inputs, &outputs);
        let paths = self.assign_paths(frame, &inputs, &self_ref, &outputs, &cells, &nodes);

        let mut initial: Option<Value> = None;
        for cell in &cells {
            if cell.cell_id() == inputs.cell_id() || cell.cell_id() == self_ref.cell_id() {
                continue;
            }
            if let Some(default) = cell.default_value() {
                let path = &paths[&cell.cell_id()];
                weft_store::set(&mut initial, path.as_path(), Some(default));
            }
        }
        let initial = initial.unwrap_or_else(|| json!({}));

        self.pop_frame(Some(frame));
        Arc::new(Pattern {
            argument_schema,
            result_schema,
            initial,
            result: outputs,
            nodes,
            paths,
        })
    }

    /// Legacy name for [`Builder::pattern`].
    pub fn recipe<F>(&self, argument_schema: Value, result_schema: Value, f: F) -> Arc<Pattern>
    where
        F: FnOnce(&Builder, &OpaqueRef) -> Term,
    {
        self.pattern(argument_schema, result_schema, f)
    }

    /// Creates a `map` node: `op` is applied to every element of `list`.
    /// The op pattern rides along as an input and is serialized in the
    /// enclosing scope, so its references into this frame resolve.
    pub fn map(&self, list: impl Into<Term>, op: &Arc<Pattern>, params: Option<Term>) -> OpaqueRef {
        let mut inputs = vec![
            ("list".to_string(), list.into()),
            ("op".to_string(), Term::Pattern(op.clone())),
        ];
        if let Some(params) = params {
            inputs.push(("params".to_string(), params));
        }
        self.apply_node(Module::Ref("map".to_string()), Term::object(inputs))
    }

    /// Walks outputs and the argument cell, following node registrations
    /// transitively. Returns this frame's cells (first observation order)
    /// and nodes. References from live enclosing frames are left for
    /// serialization; references from dead frames abort.
    fn collect_graph(
        &self,
        frame: FrameId,
        inputs: &OpaqueRef,
        outputs: &Term,
    ) -> (Vec<OpaqueRef>, Vec<Arc<Node>>) {
        let mut queue: VecDeque<OpaqueRef> = VecDeque::new();
        queue.extend(outputs.refs());
        queue.push_back(inputs.clone());
        let mut seen_cells: BTreeSet<CellId> = BTreeSet::new();
        let mut seen_nodes: BTreeSet<usize> = BTreeSet::new();
        let mut cells: Vec<OpaqueRef> = Vec::new();
        let mut nodes: Vec<Arc<Node>> = Vec::new();
        while let Some(reference) = queue.pop_front() {
            let owner = reference.frame_id();
            if !self.frame_live(owner) {
                bail(BuilderError::ClosureCapture);
            }
            if owner != frame {
                continue;
            }
            if !seen_cells.insert(reference.cell_id()) {
                continue;
            }
            cells.push(reference.root());
            for node in reference.nodes() {
                if node.frame != frame {
                    continue;
                }
                if seen_nodes.insert(Arc::as_ptr(&node) as usize) {
                    queue.extend(node.inputs.refs());
                    queue.extend(node.outputs.refs());
                    nodes.push(node);
                }
            }
        }
        (cells, nodes)
    }

    /// Canonical layout: the argument cell at `argument`, the self cell
    /// at `resultRef` when reachable, everything else under
    /// `internal/<name>`. Names come from explicit assignment, then the
    /// key a cell is bound to in the result object, then the key it is
    /// passed under in some node's inputs; first observation wins and
    /// collisions silently skip. The rest are synthesized from the
    /// frame-local counter.
    fn assign_paths(
        &self,
        frame: FrameId,
        inputs: &OpaqueRef,
        self_ref: &OpaqueRef,
        outputs: &Term,
        cells: &[OpaqueRef],
        nodes: &[Arc<Node>],
    ) -> FnvHashMap<CellId, PathBuf> {
        let mut paths: FnvHashMap<CellId, PathBuf> = FnvHashMap::default();
        paths.insert(inputs.cell_id(), weft_store::path!["argument"]);
        if cells.iter().any(|cell| cell.cell_id() == self_ref.cell_id()) {
            paths.insert(self_ref.cell_id(), weft_store::path!["resultRef"]);
        }

        let special = |id: CellId| id == inputs.cell_id() || id == self_ref.cell_id();
        let mut used: BTreeSet<String> = BTreeSet::new();
        let mut names: FnvHashMap<CellId, String> = FnvHashMap::default();
        for cell in cells.iter().filter(|cell| !special(cell.cell_id())) {
            if let Some(name) = cell.name() {
                if used.insert(name.clone()) {
                    names.insert(cell.cell_id(), name);
                }
            }
        }
        let mut bindings: Vec<(String, CellId)> = Vec::new();
        gather_bindings(outputs, &mut bindings);
        for node in nodes {
            gather_bindings(&node.inputs, &mut bindings);
        }
        for (key, id) in bindings {
            // reserved wiring keys like $event and $ctx never name cells
            if key.starts_with('$') {
                continue;
            }
            if special(id) || names.contains_key(&id) {
                continue;
            }
            if !cells.iter().any(|cell| cell.cell_id() == id) {
                continue;
            }
            if used.insert(key.clone()) {
                names.insert(id, key);
            }
        }

        for cell in cells.iter().filter(|cell| !special(cell.cell_id())) {
            let id = cell.cell_id();
            let name = names.get(&id).cloned().unwrap_or_else(|| {
                let counter = self.bump_counter(frame);
                format!(
                    "__#{}{}",
                    counter,
                    if cell.is_stream() { "stream" } else { "" }
                )
            });
            let mut path = weft_store::path!["internal"];
            path.field(&name);
            paths.insert(id, path);
        }
        paths
    }
}

/// Returns true if the JSON value has the shape of a serialized pattern.
pub fn is_pattern(value: &Value) -> bool {
    value.get("nodes").map_or(false, Value::is_array)
        && value.get("result").is_some()
        && value.get("argumentSchema").is_some()
}

/// Legacy name for [`is_pattern`].
pub fn is_recipe(value: &Value) -> bool {
    is_pattern(value)
}

/// Returns true if the JSON value has the shape of a serialized module.
pub fn is_module(value: &Value) -> bool {
    matches!(
        value.get("type").and_then(Value::as_str),
        Some("javascript" | "ref" | "pattern" | "recipe")
    )
}

/// `action()` is rewritten by the pattern pre-processor; reaching this
/// body means the source was not transformed.
pub fn action() -> ! {
    bail(BuilderError::PreprocessorRequired)
}

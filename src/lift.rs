//! Lifting pure functions into node factories.

use crate::cell::OpaqueRef;
use crate::node::{Module, Node, Term};
use crate::runtime::Builder;
use serde_json::Value;
use std::panic::Location;
use std::sync::Arc;

const PREVIEW_LIMIT: usize = 200;

pub(crate) enum Code {
    Function(Arc<dyn Fn(Value) -> Value + Send + Sync>),
    Handler(Arc<dyn Fn(Value, Value) -> Value + Send + Sync>),
}

/// A wrapped implementation function with the source metadata tooling
/// needs: the construction site and a short preview.
pub struct Implementation {
    code: Code,
    name: &'static str,
    location: &'static Location<'static>,
    preview: String,
}

impl Implementation {
    pub(crate) fn function<F>(location: &'static Location<'static>, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let name = std::any::type_name::<F>();
        Self {
            code: Code::Function(Arc::new(f)),
            name,
            location,
            preview: preview_of(name, location),
        }
    }

    pub(crate) fn handler<F>(location: &'static Location<'static>, f: F) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        let name = std::any::type_name::<F>();
        Self {
            code: Code::Handler(Arc::new(f)),
            name,
            location,
            preview: preview_of(name, location),
        }
    }

    /// The implementation's type name.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Where the implementation was constructed.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// A preview of the implementation, at most 200 characters.
    pub fn preview(&self) -> &str {
        &self.preview
    }

    /// Runs the implementation. Handlers receive their argument in the
    /// wrapped `{"$event": ..., "$ctx": ...}` form.
    pub fn run(&self, argument: Value) -> Value {
        match &self.code {
            Code::Function(f) => f(argument),
            Code::Handler(f) => {
                let mut argument = argument;
                let event = argument
                    .get_mut("$event")
                    .map(Value::take)
                    .unwrap_or(Value::Null);
                let state = argument
                    .get_mut("$ctx")
                    .map(Value::take)
                    .unwrap_or(Value::Null);
                f(event, state)
            }
        }
    }
}

impl std::fmt::Debug for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Implementation({})", self.preview)
    }
}

fn preview_of(name: &str, location: &Location) -> String {
    let full = format!("{} at {}", name, location);
    if full.len() <= PREVIEW_LIMIT {
        return full;
    }
    let mut preview: String = full.chars().take(PREVIEW_LIMIT - 3).collect();
    preview.push_str("...");
    preview
}

/// A node factory wrapping a pure function. Each invocation allocates a
/// fresh output reference, wires the traversed input references into a
/// new node, and returns the output.
#[derive(Clone)]
pub struct Lift {
    argument_schema: Option<Value>,
    result_schema: Option<Value>,
    implementation: Arc<Implementation>,
}

impl Lift {
    /// Lifts `f` without schemas.
    #[track_caller]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self::build(None, None, Location::caller(), f)
    }

    /// Lifts `f` with argument and result schemas.
    #[track_caller]
    pub fn typed<F>(argument_schema: Value, result_schema: Value, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self::build(
            Some(argument_schema),
            Some(result_schema),
            Location::caller(),
            f,
        )
    }

    pub(crate) fn build<F>(
        argument_schema: Option<Value>,
        result_schema: Option<Value>,
        location: &'static Location<'static>,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self {
            argument_schema,
            result_schema,
            implementation: Arc::new(Implementation::function(location, f)),
        }
    }

    /// The wrapped implementation.
    pub fn implementation(&self) -> &Arc<Implementation> {
        &self.implementation
    }

    /// Applies the lift to `inputs`, returning the output reference.
    pub fn call(&self, builder: &Builder, inputs: impl Into<Term>) -> OpaqueRef {
        let module = Module::Javascript {
            implementation: self.implementation.clone(),
            argument_schema: self.argument_schema.clone(),
            result_schema: self.result_schema.clone(),
            wrapper: None,
        };
        builder.apply_node(module, inputs.into())
    }
}

impl Builder {
    /// Allocates an output cell and a node executing `module` over
    /// `inputs`, and wires every traversed reference to the node.
    pub(crate) fn apply_node(&self, module: Module, inputs: Term) -> OpaqueRef {
        let output = self.cell(None, None);
        let node = Arc::new(Node {
            module,
            inputs: inputs.clone(),
            outputs: Term::Ref(output.clone()),
            frame: output.frame_id(),
        });
        for reference in inputs.refs() {
            self.check_live(&reference);
            reference.connect(&node);
        }
        output.connect(&node);
        output
    }

    /// Lifts `f` and immediately applies it to `input`.
    #[track_caller]
    pub fn derive<F>(&self, input: impl Into<Term>, f: F) -> OpaqueRef
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Lift::build(None, None, Location::caller(), f).call(self, input)
    }

    /// Like [`Builder::derive`], with explicit schemas.
    #[track_caller]
    pub fn derive_typed<F>(
        &self,
        argument_schema: Value,
        result_schema: Value,
        input: impl Into<Term>,
        f: F,
    ) -> OpaqueRef
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Lift::build(
            Some(argument_schema),
            Some(result_schema),
            Location::caller(),
            f,
        )
        .call(self, input)
    }

    /// Lifts a closure taking no explicit inputs. The node's argument
    /// schema is `false` and its inputs are empty.
    #[track_caller]
    pub fn computed<F>(&self, f: F) -> OpaqueRef
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Lift::build(
            Some(Value::Bool(false)),
            None,
            Location::caller(),
            move |_| f(),
        )
        .call(self, Term::empty())
    }
}

//! Event handlers: node factories returning stream references.

use crate::cell::OpaqueRef;
use crate::lift::Implementation;
use crate::node::{Module, Node, Term, Wrapper};
use crate::runtime::Builder;
use serde_json::{json, Value};
use std::panic::Location;
use std::sync::Arc;

/// A node factory wrapping an event handler. Binding it yields a stream
/// reference that is also the node's own `$event` input; the remaining
/// inputs ride under `$ctx`.
#[derive(Clone)]
pub struct Handler {
    event_schema: Option<Value>,
    state_schema: Option<Value>,
    proxy: bool,
    implementation: Arc<Implementation>,
}

impl Handler {
    /// Wraps `f`, which receives the event and its bound state.
    #[track_caller]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        Self::build(None, None, Location::caller(), f)
    }

    /// Wraps `f` with event and state schemas.
    #[track_caller]
    pub fn typed<F>(event_schema: Value, state_schema: Value, f: F) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        Self::build(
            Some(event_schema),
            Some(state_schema),
            Location::caller(),
            f,
        )
    }

    fn build<F>(
        event_schema: Option<Value>,
        state_schema: Option<Value>,
        location: &'static Location<'static>,
        f: F,
    ) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        Self {
            event_schema,
            state_schema,
            proxy: false,
            implementation: Arc::new(Implementation::handler(location, f)),
        }
    }

    /// Marks the handler as expecting a writable proxy for its state.
    pub fn proxy(mut self) -> Self {
        self.proxy = true;
        self
    }

    /// True if the handler expects a writable proxy.
    pub fn expects_proxy(&self) -> bool {
        self.proxy
    }

    /// The wrapped implementation.
    pub fn implementation(&self) -> &Arc<Implementation> {
        &self.implementation
    }

    /// Binds `inputs` now and returns the stream.
    pub fn bind(&self, builder: &Builder, inputs: impl Into<Term>) -> OpaqueRef {
        let inputs = inputs.into();
        let stream = builder.stream();
        let argument_schema = json!({
            "type": "object",
            "properties": {
                "$event": self.event_schema.clone().unwrap_or(Value::Bool(true)),
                "$ctx": self.state_schema.clone().unwrap_or(Value::Bool(true)),
            }
        });
        let node = Arc::new(Node {
            module: Module::Javascript {
                implementation: self.implementation.clone(),
                argument_schema: Some(argument_schema),
                result_schema: None,
                wrapper: Some(Wrapper::Handler),
            },
            inputs: Term::object([
                ("$event", Term::from(&stream)),
                ("$ctx", inputs.clone()),
            ]),
            outputs: Term::empty(),
            frame: stream.frame_id(),
        });
        for reference in inputs.refs() {
            builder.check_live(&reference);
            reference.connect(&node);
        }
        stream.connect(&node);
        stream
    }

    /// Defers binding: the returned factory carries `inputs` and binds on
    /// demand.
    pub fn with(&self, inputs: impl Into<Term>) -> BoundHandler {
        BoundHandler {
            handler: self.clone(),
            inputs: inputs.into(),
        }
    }
}

/// A handler with its inputs attached, awaiting a builder to bind in.
#[derive(Clone)]
pub struct BoundHandler {
    handler: Handler,
    inputs: Term,
}

impl BoundHandler {
    /// Binds in `builder` and returns the stream.
    pub fn bind(&self, builder: &Builder) -> OpaqueRef {
        self.handler.bind(builder, self.inputs.clone())
    }
}

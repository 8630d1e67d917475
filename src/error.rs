/// Programmer errors raised during graph construction.
///
/// Construction-time misuse is a bug in the calling code, not a runtime
/// condition, so these abort with a structured panic instead of surfacing
/// as result values. Catch them in tests with `catch_unwind` and downcast
/// the payload.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BuilderError {
    /// A reference from a dead frame leaked into the current one through
    /// a closure.
    #[error("reactive reference cannot be accessed via closure; use computed() or derive() to bring it into scope")]
    ClosureCapture,

    /// The current frame has no runtime to back a new reference.
    #[error("creating a reactive reference requires a runtime in the current frame")]
    MissingRuntime,

    /// No frame has been pushed.
    #[error("no frame is active; push a frame before building")]
    MissingFrame,

    /// A reference was coerced to a number or string.
    #[error("a reactive reference has no primitive value; use derive() to compute with it")]
    PrimitiveCoercion,

    /// A reference was iterated past the destructuring bound.
    #[error("reactive references yield at most 50 children")]
    IterationBound,

    /// A name was assigned to a nested child instead of the root.
    #[error("names can only be assigned at the root of a reactive reference")]
    NestedName,

    /// `action()` was called from untransformed source code.
    #[error("action() only works in sources run through the pattern pre-processor")]
    PreprocessorRequired,
}

pub(crate) fn bail(error: BuilderError) -> ! {
    std::panic::panic_any(error)
}

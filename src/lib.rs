//! # weft
//!
//! A reactive-computation runtime: user programs ("patterns") are
//! declared as pure dataflow graphs and executed against transactional,
//! content-addressed memory spaces.
//!
//! ## Builder
//! Construction is frame-scoped. A [`Builder`] owns a stack of frames;
//! opaque references ([`OpaqueRef`]) are created against the top frame
//! and proxy cells that do not exist yet. [`Lift`] wraps a pure function
//! as a node factory, [`Handler`] wraps an event handler as a stream
//! factory, and [`Builder::pattern`] folds a construction run into a
//! portable JSON artifact: `{argumentSchema, resultSchema, initial,
//! result, nodes}` with every reference rewritten as a `$alias` into the
//! canonical cell layout. References across pattern boundaries serialize
//! with a nesting depth, so `map` ops can reach the frames enclosing
//! them.
//!
//! Classification labels attached to argument schemas propagate to every
//! reference reachable from a pattern's outputs through the
//! information-flow [`Lattice`].
//!
//! ## Storage
//! The storage engine lives in `weft-store` and is re-exported here:
//! transactions journal reads and writes per memory space, capture read
//! invariants, and commit atomically with invariant re-validation at the
//! replica. See the `weft-store` crate docs for the full model.
//!
//! ```
//! use serde_json::json;
//! use weft::{Lift, Runtime, Term};
//!
//! let runtime = Runtime::memory();
//! let builder = runtime.builder();
//! let double = Lift::new(|v| json!(v.as_i64().unwrap_or(0) * 2));
//! let pattern = builder.pattern(json!(true), json!(true), |b, x| {
//!     let doubled = double.call(b, x);
//!     Term::object([("doubled", Term::from(&doubled))])
//! });
//! let form = pattern.to_json();
//! assert_eq!(form["result"]["doubled"]["$alias"]["path"], json!(["internal", "doubled"]));
//! ```
#![warn(missing_docs)]
mod cell;
mod error;
mod frame;
mod handler;
mod ifc;
mod lift;
mod node;
mod pattern;
mod runtime;

pub use crate::cell::{CellExport, CellId, Children, OpaqueRef, MAX_CHILDREN};
pub use crate::error::BuilderError;
pub use crate::frame::{FrameId, FrameInit, SharedTransaction};
pub use crate::handler::{BoundHandler, Handler};
pub use crate::ifc::{
    apply_argument_ifc_to_result, apply_input_ifc_to_output, classification_of,
    collect_classifications, Lattice, SetLattice,
};
pub use crate::lift::{Implementation, Lift};
pub use crate::node::{Module, Node, Term, Wrapper};
pub use crate::pattern::{action, is_module, is_pattern, is_recipe, Pattern, SELF_KEY};
pub use crate::runtime::{Builder, Runtime};

pub use weft_store::{
    path, Activity, Address, Attestation, Chronicle, Commit, EntityId, Fact, FactId, History,
    MediaType, MemoryReplica, MemoryStore, Novelty, Path, PathBuf, ReadOptions, Replica, Segment,
    SpaceId, StatusReport, StorageError, Store, Transaction, TransactionStatus,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn init() {
        use tracing_subscriber::fmt::format::FmtSpan;
        use tracing_subscriber::EnvFilter;
        tracing_log::LogTracer::init().ok();
        let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_span_events(FmtSpan::ACTIVE | FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new(env))
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
        log_panics::init();
    }

    #[async_std::test]
    async fn test_api() -> anyhow::Result<()> {
        init();
        let runtime = Runtime::memory();

        let builder = runtime.builder();
        let increment = Lift::new(|v| json!(v.as_i64().unwrap_or(0) + 1));
        let pattern = builder.pattern(json!(true), json!(true), |b, x| {
            let next = increment.call(b, x);
            Term::object([("next", Term::from(&next))])
        });
        assert_eq!(pattern.nodes().len(), 1);
        assert_eq!(
            pattern.to_json()["result"]["next"]["$alias"]["path"],
            json!(["internal", "next"])
        );

        let mut tx = runtime.transaction();
        let address = Address::json("space1", "counter", path![]);
        tx.write(&address, Some(json!({"count": 1})))?;
        let read = tx.read(
            &Address::json("space1", "counter", path!["count"]),
            ReadOptions::default(),
        )?;
        assert_eq!(read.value, Some(json!(1)));
        tx.commit().await?;

        // a later transaction observes the committed fact
        let mut tx = runtime.transaction();
        let read = tx.read(&address, ReadOptions::default())?;
        assert_eq!(read.value, Some(json!({"count": 1})));
        tx.commit().await?;

        Ok(())
    }
}

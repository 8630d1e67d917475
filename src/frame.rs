//! Construction-time scopes.
//!
//! A frame is pushed before a builder function runs and popped after; all
//! reference creation happens against the top frame. The stack tolerates a
//! misnested pop by splicing the frame out of its current position, an
//! accommodation for teardown races in embedders.

use crate::cell::OpaqueRef;
use crate::runtime::Runtime;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use weft_store::{SpaceId, Transaction};

/// Identity of a construction frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FrameId(pub(crate) u64);

/// A transaction handle shareable between frames.
pub type SharedTransaction = Arc<Mutex<Transaction>>;

/// Overrides for a new frame. Anything left unset is inherited from the
/// parent frame, except `cause`, which never propagates.
#[derive(Default)]
pub struct FrameInit {
    /// Runtime backing reference creation.
    pub runtime: Option<Runtime>,
    /// Transaction cells are seeded through.
    pub tx: Option<SharedTransaction>,
    /// Space new cells belong to.
    pub space: Option<SpaceId>,
    /// Cause token for stable identifier derivation.
    pub cause: Option<Value>,
    /// True inside handler invocations.
    pub in_handler: bool,
    /// Permits binding references across frame boundaries without
    /// shadow promotion; used by trusted embedders only.
    pub unsafe_binding: bool,
}

pub(crate) struct Frame {
    pub id: FrameId,
    pub parent: Option<FrameId>,
    pub cause: Option<Value>,
    pub cells: Vec<OpaqueRef>,
    pub counter: u64,
    pub runtime: Option<Runtime>,
    pub tx: Option<SharedTransaction>,
    pub space: Option<SpaceId>,
    pub in_handler: bool,
    pub unsafe_binding: bool,
}

pub(crate) struct FrameStack {
    frames: Vec<Frame>,
    next: u64,
}

impl FrameStack {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            next: 0,
        }
    }

    pub fn push(&mut self, init: FrameInit) -> FrameId {
        let id = FrameId(self.next);
        self.next += 1;
        let top = self.frames.last();
        let frame = Frame {
            id,
            parent: top.map(|frame| frame.id),
            runtime: init
                .runtime
                .or_else(|| top.and_then(|frame| frame.runtime.clone())),
            tx: init.tx.or_else(|| top.and_then(|frame| frame.tx.clone())),
            space: init
                .space
                .or_else(|| top.and_then(|frame| frame.space.clone())),
            cause: init.cause,
            cells: Vec::new(),
            counter: 0,
            in_handler: init.in_handler,
            unsafe_binding: init.unsafe_binding,
        };
        self.frames.push(frame);
        id
    }

    pub fn pop(&mut self, frame: Option<FrameId>) {
        let Some(id) = frame else {
            self.frames.pop();
            return;
        };
        if self.frames.last().map(|frame| frame.id) == Some(id) {
            self.frames.pop();
        } else if let Some(ix) = self.frames.iter().position(|frame| frame.id == id) {
            tracing::debug!("splicing misnested frame out of the stack");
            self.frames.remove(ix);
        }
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.iter().find(|frame| frame.id == id)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.frames.iter_mut().find(|frame| frame.id == id)
    }

    pub fn contains(&self, id: FrameId) -> bool {
        self.frames.iter().any(|frame| frame.id == id)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_inherits_from_parent() {
        let mut stack = FrameStack::new();
        let outer = stack.push(FrameInit {
            space: Some(SpaceId::new("space1")),
            ..Default::default()
        });
        let inner = stack.push(FrameInit::default());
        assert_eq!(stack.top().unwrap().id, inner);
        assert_eq!(stack.top().unwrap().parent, Some(outer));
        assert_eq!(stack.top().unwrap().space, Some(SpaceId::new("space1")));
        let overridden = stack.push(FrameInit {
            space: Some(SpaceId::new("space2")),
            ..Default::default()
        });
        assert_eq!(stack.top().unwrap().id, overridden);
        assert_eq!(stack.top().unwrap().space, Some(SpaceId::new("space2")));
    }

    #[test]
    fn misnested_pop_splices() {
        let mut stack = FrameStack::new();
        let a = stack.push(FrameInit::default());
        let b = stack.push(FrameInit::default());
        let c = stack.push(FrameInit::default());
        stack.pop(Some(b));
        assert_eq!(stack.depth(), 2);
        assert!(stack.contains(a));
        assert!(!stack.contains(b));
        assert_eq!(stack.top().unwrap().id, c);
        // popping an unknown frame is a no-op
        stack.pop(Some(b));
        assert_eq!(stack.depth(), 2);
    }
}

//! Render-target regions
//!
//! The runtime never touches render-target nodes. It only remembers which
//! region a component occupies so hooks can be told about it.

use lumen_types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE: AtomicU64 = AtomicU64::new(1);

/// Allocate a node id not handed out before in this process
pub fn fresh_node() -> NodeId {
    NodeId(NEXT_NODE.fetch_add(1, Ordering::Relaxed))
}

/// Region of the render target owned by a rendered block
pub trait Bounds: Send + Sync + fmt::Debug {
    fn parent_element(&self) -> NodeId;

    fn first_node(&self) -> NodeId;

    fn last_node(&self) -> NodeId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleBounds {
    parent: NodeId,
    first: NodeId,
    last: NodeId,
}

impl SimpleBounds {
    pub fn new(parent: NodeId, first: NodeId, last: NodeId) -> Self {
        Self {
            parent,
            first,
            last,
        }
    }

    /// Bounds covering exactly one node
    pub fn single(parent: NodeId, node: NodeId) -> Self {
        Self::new(parent, node, node)
    }
}

impl Bounds for SimpleBounds {
    fn parent_element(&self) -> NodeId {
        self.parent
    }

    fn first_node(&self) -> NodeId {
        self.first
    }

    fn last_node(&self) -> NodeId {
        self.last
    }
}

//! Shared types for lumen
//!
//! This crate provides the identifiers used across the lumen crates:
//! render roots, component instances, render-target nodes and iteration keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a render root registered with a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RootId(pub u64);

impl RootId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root#{}", self.0)
    }
}

/// Identifier of a component instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl ComponentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// Opaque handle to a node owned by the render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Key of an item produced by a keyed iteration
///
/// Keys are unique within one iteration pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(key.as_ref().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemKey {
    fn from(key: &str) -> Self {
        ItemKey::new(key)
    }
}

impl From<String> for ItemKey {
    fn from(key: String) -> Self {
        ItemKey(key)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_key_equality() {
        let a = ItemKey::new("x");
        let b: ItemKey = "x".into();
        let c: ItemKey = String::from("y").into();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "x");
    }

    #[test]
    fn test_node_id_conversion() {
        let node: NodeId = 7.into();
        assert_eq!(u64::from(node), 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(RootId::new(3).to_string(), "root#3");
        assert_eq!(ComponentId::new(4).to_string(), "component#4");
    }

    #[test]
    fn test_item_key_serde() {
        let key = ItemKey::new("row-1");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"row-1\"");
    }
}

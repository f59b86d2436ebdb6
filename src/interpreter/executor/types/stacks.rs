//! The three machine stacks
//!
//! Everything the VM knows about a run in progress lives here, as plain data.
//! A [`Snapshot`] taken between two instructions is a complete description of
//! progress.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::sql::Row;

/// The implicit current-value variable.
pub const REGISTER: &str = "prompt";

/// Prefix given to a callee's variables when they are merged into the caller.
pub const OUTPUT_PREFIX: &str = "out.";

/* ===================== Environment ===================== */

/// One scope of name → text bindings.
pub type Scope = BTreeMap<String, String>;

/// Ordered scopes, innermost last. The outermost scope is never popped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    layers: Vec<Scope>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            layers: vec![Scope::new()],
        }
    }

    /// Read a variable, innermost scope first.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(name))
            .map(String::as_str)
    }

    /// Write a variable into the innermost scope.
    pub fn set(&mut self, name: &str, value: String) {
        if let Some(layer) = self.layers.last_mut() {
            layer.insert(name.to_string(), value);
        }
    }

    pub fn push(&mut self) {
        self.layers.push(Scope::new());
        debug!(depth = self.layers.len(), "pushed environment");
    }

    /// Drop the innermost scope, merging it into the next one.
    ///
    /// The register is written back under its own name; every other binding
    /// is written back as `out.<name>`. Returns `false` (and changes nothing)
    /// when only the outermost scope is left.
    pub fn pop(&mut self) -> bool {
        if self.layers.len() <= 1 {
            return false;
        }
        let Some(dropped) = self.layers.pop() else {
            return false;
        };
        for (name, value) in dropped {
            if name == REGISTER {
                self.set(REGISTER, value);
            } else {
                self.set(&format!("{}{}", OUTPUT_PREFIX, name), value);
            }
        }
        debug!(depth = self.layers.len(), "popped environment");
        true
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/* ===================== Calls ===================== */

/// One active procedure and the index of its next instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub procedure: String,
    pub ip: usize,
}

impl Frame {
    pub fn new(procedure: impl Into<String>) -> Self {
        Frame {
            procedure: procedure.into(),
            ip: 0,
        }
    }
}

/* ===================== Iterators ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum IteratorItem {
    /// A line or paragraph; replaces the register
    Text(String),
    /// A query row; sets one variable per column
    Row(Row),
}

/// Pending items of one active loop.
pub type ItemQueue = VecDeque<IteratorItem>;

/* ===================== Snapshot ===================== */

/// Serializable copy of the machine stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub environment: Environment,
    pub calls: Vec<Frame>,
    pub iterators: Vec<ItemQueue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_scans_outward() {
        let mut env = Environment::new();
        env.set("a", "outer".into());
        env.set("b", "outer".into());
        env.push();
        env.set("a", "inner".into());
        assert_eq!(env.get("a"), Some("inner"));
        assert_eq!(env.get("b"), Some("outer"));
        assert_eq!(env.get("missing"), None);
    }

    #[test]
    fn test_pop_merges_register_and_outputs() {
        let mut env = Environment::new();
        env.set(REGISTER, "before".into());
        env.push();
        env.set(REGISTER, "after".into());
        env.set("summary", "short".into());
        assert!(env.pop());

        assert_eq!(env.depth(), 1);
        assert_eq!(env.get(REGISTER), Some("after"));
        assert_eq!(env.get("out.summary"), Some("short"));
        assert_eq!(env.get("summary"), None);
    }

    #[test]
    fn test_outermost_scope_is_never_popped() {
        let mut env = Environment::new();
        env.set("x", "1".into());
        assert!(!env.pop());
        assert_eq!(env.depth(), 1);
        assert_eq!(env.get("x"), Some("1"));
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let mut env = Environment::new();
        env.set(REGISTER, "hi".into());
        let snapshot = Snapshot {
            environment: env,
            calls: vec![Frame::new("main")],
            iterators: vec![VecDeque::from(vec![
                IteratorItem::Text("line".into()),
                IteratorItem::Row(vec![("id".into(), "1".into())]),
            ])],
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}

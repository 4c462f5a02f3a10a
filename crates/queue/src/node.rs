//! Nodes and labels: where tasks may run.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How a node accepts work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Use this node as much as possible.
    #[default]
    Normal,
    /// Leave this node for tasks tied to it by label.
    Exclusive,
}

/// Whether a node is the coordinator itself or a remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Coordinator,
    #[default]
    Agent,
}

/// Static description of a machine that hosts executors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub mode: Mode,
    pub num_executors: usize,
    pub labels: BTreeSet<String>,
}

impl Node {
    pub fn coordinator(num_executors: usize) -> Self {
        Self {
            name: "coordinator".to_string(),
            kind: NodeKind::Coordinator,
            mode: Mode::Normal,
            num_executors,
            labels: BTreeSet::new(),
        }
    }

    pub fn agent(name: impl Into<String>, num_executors: usize) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Agent,
            mode: Mode::Normal,
            num_executors,
            labels: BTreeSet::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_agent(&self) -> bool {
        self.kind == NodeKind::Agent
    }

    pub fn is_exclusive(&self) -> bool {
        self.mode == Mode::Exclusive
    }

    /// A node satisfies its own name as a label, plus every configured label.
    pub fn has_label(&self, label: &str) -> bool {
        self.name == label || self.labels.contains(label)
    }
}

/// A placement constraint: tasks with a label only run on nodes carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn contains(&self, node: &Node) -> bool {
        node.has_label(&self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

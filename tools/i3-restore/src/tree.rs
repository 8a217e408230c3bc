//! Typed view of the i3 container tree.
//!
//! The raw `get_tree` JSON is decoded into [`RawNode`] and converted once at
//! the boundary into [`WorkspaceTree`]/[`ContainerNode`], so traversal never
//! has to probe JSON shapes.

use crate::errors::RestoreError;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub swallows: Vec<Value>,
    #[serde(default)]
    pub window: Option<u64>,
    #[serde(default)]
    pub window_properties: Option<WindowProperties>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct WindowProperties {
    #[serde(default)]
    pub class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowLeaf {
    pub window_id: Option<u64>,
    pub class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerNode {
    Split(Vec<ContainerNode>),
    /// Layout template waiting to swallow a window. Never a real window.
    Placeholder,
    Window(WindowLeaf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceTree {
    pub name: String,
    pub nodes: Vec<ContainerNode>,
}

impl ContainerNode {
    pub fn from_raw(raw: &RawNode) -> Self {
        if !raw.nodes.is_empty() {
            return Self::Split(raw.nodes.iter().map(Self::from_raw).collect());
        }
        if !raw.swallows.is_empty() {
            return Self::Placeholder;
        }
        Self::Window(WindowLeaf {
            window_id: raw.window,
            class: raw
                .window_properties
                .as_ref()
                .and_then(|props| props.class.clone()),
        })
    }

    fn collect_windows<'a>(&'a self, out: &mut Vec<&'a WindowLeaf>) {
        match self {
            Self::Split(children) => {
                for child in children {
                    child.collect_windows(out);
                }
            }
            Self::Placeholder => {}
            Self::Window(leaf) => out.push(leaf),
        }
    }
}

impl WorkspaceTree {
    pub fn from_raw(raw: &RawNode) -> Self {
        Self {
            name: raw.name.clone().unwrap_or_default(),
            nodes: raw.nodes.iter().map(ContainerNode::from_raw).collect(),
        }
    }

    /// Real windows of this workspace in tree traversal order.
    pub fn windows(&self) -> Vec<&WindowLeaf> {
        let mut out = Vec::new();
        for node in &self.nodes {
            node.collect_windows(&mut out);
        }
        out
    }
}

pub fn parse_tree(text: &str) -> Result<RawNode, RestoreError> {
    serde_json::from_str(text).map_err(|e| RestoreError::Tree(format!("invalid i3 tree json: {e}")))
}

/// Workspaces of every output. The first output is i3's internal `__i3`
/// output and is skipped; workspaces live under each output's `con` area.
pub fn workspaces(root: &RawNode) -> Vec<WorkspaceTree> {
    root.nodes
        .iter()
        .skip(1)
        .flat_map(|output| output.nodes.iter())
        .filter(|area| area.kind.as_deref() == Some("con"))
        .flat_map(|area| area.nodes.iter())
        .map(WorkspaceTree::from_raw)
        .collect()
}

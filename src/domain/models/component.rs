//! Component tree domain model.
//!
//! A decomposition tree is an arena of [`ComponentNode`]s addressed by stable
//! string ids. Parent links are weak back-references; child lists own their
//! subtrees. Declared dependencies may point anywhere in the tree.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::errors::{DomainError, DomainResult};

/// Stable component identifier.
pub type ComponentId = String;

/// Lifecycle status of a component node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Pending,
    Contracted,
    Tested,
    Validated,
    Implementing,
    Implemented,
    Integrating,
    Integrated,
    Failed,
}

impl Default for ComponentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Contracted => "contracted",
            Self::Tested => "tested",
            Self::Validated => "validated",
            Self::Implementing => "implementing",
            Self::Implemented => "implemented",
            Self::Integrating => "integrating",
            Self::Integrated => "integrated",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "contracted" => Some(Self::Contracted),
            "tested" => Some(Self::Tested),
            "validated" => Some(Self::Validated),
            "implementing" => Some(Self::Implementing),
            "implemented" => Some(Self::Implemented),
            "integrating" => Some(Self::Integrating),
            "integrated" => Some(Self::Integrated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Status the component last settled in. Work still in flight counts as
    /// not started, so a crash mid-dispatch never satisfies a dependent.
    pub const fn settled(self) -> Self {
        match self {
            Self::Implementing | Self::Integrating => Self::Validated,
            other => other,
        }
    }

    /// Position along the forward pipeline. `Failed` sits outside it.
    const fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Contracted => Some(1),
            Self::Tested => Some(2),
            Self::Validated => Some(3),
            Self::Implementing => Some(4),
            Self::Implemented => Some(5),
            Self::Integrating => Some(6),
            Self::Integrated => Some(7),
            Self::Failed => None,
        }
    }

    /// Whether this status has settled at or past `target` on the forward
    /// pipeline.
    ///
    /// A failed component is never at or past anything, so failures always
    /// block dependents.
    pub fn is_at_or_past(self, target: Self) -> bool {
        match (self.settled().rank(), target.rank()) {
            (Some(own), Some(wanted)) => own >= wanted,
            _ => false,
        }
    }

    /// Whether a winner or an integrated artifact exists for this component.
    pub fn has_artifact(self) -> bool {
        matches!(self, Self::Implemented | Self::Integrated)
    }
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single node of the decomposition tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentNode {
    pub id: ComponentId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Weak back-reference; ownership flows from parent to children.
    #[serde(default)]
    pub parent_id: Option<ComponentId>,
    #[serde(default)]
    pub children: Vec<ComponentId>,
    #[serde(default)]
    pub dependencies: BTreeSet<ComponentId>,
    #[serde(default)]
    pub status: ComponentStatus,
}

impl ComponentNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            parent_id: None,
            children: Vec::new(),
            dependencies: BTreeSet::new(),
            status: ComponentStatus::Pending,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// One component entry in a decomposition document, as handed over by the
/// decomposition collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub id: ComponentId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub children: Vec<ComponentId>,
    #[serde(default)]
    pub dependencies: Vec<ComponentId>,
}

/// Serialized decomposition handed to `init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeDocument {
    pub root: ComponentId,
    #[serde(default)]
    pub task: String,
    pub components: Vec<ComponentSpec>,
}

/// The decomposition tree: a root id plus an id-addressed node arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionTree {
    pub root_id: ComponentId,
    pub nodes: BTreeMap<ComponentId, ComponentNode>,
}

impl DecompositionTree {
    /// Create a tree holding only its root.
    pub fn new(root: ComponentNode) -> Self {
        let root_id = root.id.clone();
        let mut nodes = BTreeMap::new();
        nodes.insert(root_id.clone(), root);
        Self { root_id, nodes }
    }

    /// Build a tree from a decomposition document.
    ///
    /// Parent links are derived from the child lists. A child listed under two
    /// parents or a child id with no entry is rejected here; dependency ids are
    /// left for the validator so that every unresolved reference is reported.
    pub fn from_document(doc: TreeDocument) -> DomainResult<Self> {
        let mut nodes: BTreeMap<ComponentId, ComponentNode> = BTreeMap::new();
        for spec in &doc.components {
            if nodes.contains_key(&spec.id) {
                return Err(DomainError::InvalidTree(format!(
                    "component '{}' is declared twice",
                    spec.id
                )));
            }
            let mut node = ComponentNode::new(
                spec.id.clone(),
                spec.name.clone().unwrap_or_else(|| spec.id.clone()),
            )
            .with_description(spec.description.clone())
            .with_dependencies(spec.dependencies.iter().cloned());
            node.children.clone_from(&spec.children);
            nodes.insert(spec.id.clone(), node);
        }

        if !nodes.contains_key(&doc.root) {
            return Err(DomainError::InvalidTree(format!(
                "root '{}' has no component entry",
                doc.root
            )));
        }

        for spec in &doc.components {
            for child in &spec.children {
                let node = nodes.get_mut(child).ok_or_else(|| {
                    DomainError::InvalidTree(format!(
                        "child '{}' of '{}' has no component entry",
                        child, spec.id
                    ))
                })?;
                if let Some(existing) = &node.parent_id {
                    return Err(DomainError::InvalidTree(format!(
                        "component '{}' is a child of both '{}' and '{}'",
                        child, existing, spec.id
                    )));
                }
                node.parent_id = Some(spec.id.clone());
            }
        }

        Ok(Self {
            root_id: doc.root,
            nodes,
        })
    }

    /// Parse a YAML (or JSON, which is valid YAML) decomposition document.
    pub fn from_yaml(text: &str) -> DomainResult<Self> {
        let doc: TreeDocument = serde_yaml::from_str(text)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;
        Self::from_document(doc)
    }

    /// Attach `node` as the last child of `parent_id`.
    pub fn insert_child(&mut self, parent_id: &str, mut node: ComponentNode) -> DomainResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(DomainError::InvalidTree(format!(
                "component '{}' already exists",
                node.id
            )));
        }
        let parent = self
            .nodes
            .get_mut(parent_id)
            .ok_or_else(|| DomainError::ComponentNotFound(parent_id.to_string()))?;
        parent.children.push(node.id.clone());
        node.parent_id = Some(parent_id.to_string());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Delete a node together with its whole subtree. Returns the removed ids.
    ///
    /// The root cannot be removed.
    pub fn remove_subtree(&mut self, id: &str) -> DomainResult<Vec<ComponentId>> {
        if id == self.root_id {
            return Err(DomainError::InvalidTree("the root cannot be removed".to_string()));
        }
        let parent_id = self
            .nodes
            .get(id)
            .ok_or_else(|| DomainError::ComponentNotFound(id.to_string()))?
            .parent_id
            .clone();

        let removed = self.subtree(id);
        for rid in &removed {
            self.nodes.remove(rid);
        }
        if let Some(parent) = parent_id.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| c != id);
        }
        Ok(removed)
    }

    /// All ids in the subtree rooted at `id`, in pre-order.
    pub fn subtree(&self, id: &str) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                out.push(current.clone());
                for child in node.children.iter().rev() {
                    stack.push(child.clone());
                }
            }
        }
        out
    }

    pub fn get(&self, id: &str) -> Option<&ComponentNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ComponentNode> {
        self.nodes.get_mut(id)
    }

    pub fn root(&self) -> Option<&ComponentNode> {
        self.nodes.get(&self.root_id)
    }

    pub fn status_of(&self, id: &str) -> Option<ComponentStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    /// Set a node's status, failing if the id is unknown.
    pub fn set_status(&mut self, id: &str, status: ComponentStatus) -> DomainResult<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| DomainError::ComponentNotFound(id.to_string()))?;
        node.status = status;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of every node, ascending.
    pub fn ids(&self) -> impl Iterator<Item = &ComponentId> {
        self.nodes.keys()
    }
}

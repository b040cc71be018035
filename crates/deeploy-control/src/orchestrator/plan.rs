//! Ordered node transitions for one operation.

use std::collections::BTreeSet;

use crate::strategy::UpdateStrategy;

/// One step of a plan, applied to every listed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Stop the pipeline.
    Stop(Vec<String>),
    /// Start the pipeline from scratch.
    Create(Vec<String>),
    /// Push a new config to a running pipeline.
    Refresh(Vec<String>),
}

impl Transition {
    #[must_use]
    pub fn nodes(&self) -> &[String] {
        match self {
            Self::Stop(nodes) | Self::Create(nodes) | Self::Refresh(nodes) => nodes,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stop(_) => "stop",
            Self::Create(_) => "create",
            Self::Refresh(_) => "refresh",
        }
    }
}

/// Transitions executed in order. Steps with no nodes are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    transitions: Vec<Transition>,
}

fn minus(a: &[String], b: &[String]) -> Vec<String> {
    let b: BTreeSet<&String> = b.iter().collect();
    a.iter().filter(|n| !b.contains(n)).cloned().collect()
}

fn intersect(a: &[String], b: &[String]) -> Vec<String> {
    let b: BTreeSet<&String> = b.iter().collect();
    a.iter().filter(|n| b.contains(n)).cloned().collect()
}

impl Plan {
    fn push(mut self, transition: Transition) -> Self {
        if !transition.nodes().is_empty() {
            self.transitions.push(transition);
        }
        self
    }

    /// Fresh deployment.
    #[must_use]
    pub fn create(target: &[String]) -> Self {
        Self::default().push(Transition::Create(target.to_vec()))
    }

    /// Move a running deployment from `current` to `target`.
    ///
    /// `Recreate` stops every current node before starting the target set.
    /// `InPlace` only stops dropped nodes, refreshes kept ones and starts
    /// new ones.
    #[must_use]
    pub fn update(strategy: UpdateStrategy, current: &[String], target: &[String]) -> Self {
        match strategy {
            UpdateStrategy::Recreate => Self::default()
                .push(Transition::Stop(current.to_vec()))
                .push(Transition::Create(target.to_vec())),
            UpdateStrategy::InPlace => Self::default()
                .push(Transition::Stop(minus(current, target)))
                .push(Transition::Refresh(intersect(target, current)))
                .push(Transition::Create(minus(target, current))),
        }
    }

    /// Add workers: refresh the running ones, start the new ones.
    #[must_use]
    pub fn scale_up(current: &[String], added: &[String]) -> Self {
        Self::default()
            .push(Transition::Refresh(current.to_vec()))
            .push(Transition::Create(minus(added, current)))
    }

    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Nodes that end up running the pipeline, in plan order.
    #[must_use]
    pub fn serving_nodes(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.transitions
            .iter()
            .filter(|t| !matches!(t, Transition::Stop(_)))
            .flat_map(Transition::nodes)
            .filter(|n| seen.insert(n.as_str()))
            .cloned()
            .collect()
    }
}

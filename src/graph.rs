//! Flow graph construction
//!
//! Turns a recipe list and a target into a directed network of machine and
//! item nodes. Nothing here is solved yet; edges only carry the per-machine
//! rate that the solver later scales by each machine's multiplier.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::models::{RecipeDef, TargetSpec};

/// Errors detected while building the graph, before any solver call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("no recipes given")]
    EmptyInput,

    #[error("no production target given")]
    NoTarget,

    #[error("target item '{0}' does not appear in any recipe")]
    UnknownItem(String),

    #[error("target rate {rate} for '{item}' must be positive and finite")]
    InvalidTarget { item: String, rate: f64 },

    #[error("recipe #{index} ({name}): {reason}")]
    InvalidRecipe {
        index: usize,
        name: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MachineId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ItemId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeId(pub usize);

/// Whether an edge feeds a machine or leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EdgeDirection {
    /// item -> machine
    Input,
    /// machine -> item
    Output,
}

#[derive(Debug, Clone)]
pub struct MachineNode {
    pub id: MachineId,
    /// Stable short label ("M0", "M1", ...) used in constraint names.
    pub label: String,
    pub recipe: RecipeDef,
}

#[derive(Debug, Clone)]
pub struct ItemNode {
    pub id: ItemId,
    pub name: String,
    pub producer_edges: Vec<EdgeId>,
    pub consumer_edges: Vec<EdgeId>,
}

impl ItemNode {
    /// No machine makes this item, so it is drawn from outside the factory.
    pub fn is_raw_source(&self) -> bool {
        self.producer_edges.is_empty()
    }

    pub fn is_byproduct(&self) -> bool {
        !self.producer_edges.is_empty() && self.consumer_edges.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FlowEdge {
    pub id: EdgeId,
    pub machine: MachineId,
    pub item: ItemId,
    pub direction: EdgeDirection,
    /// Items per second moved by a single machine (multiplier 1).
    pub unit_rate: f64,
}

impl FlowEdge {
    /// Contribution of this edge to its item's net production per unit of
    /// multiplier: positive for outputs, negative for inputs.
    pub fn signed_unit_rate(&self) -> f64 {
        match self.direction {
            EdgeDirection::Output => self.unit_rate,
            EdgeDirection::Input => -self.unit_rate,
        }
    }
}

/// A target pinned to an item node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub item: ItemId,
    pub rate: f64,
}

/// Machines, items and edges for one build/solve cycle.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    machines: Vec<MachineNode>,
    items: Vec<ItemNode>,
    edges: Vec<FlowEdge>,
    targets: Vec<Target>,
    item_index: HashMap<String, ItemId>,
}

impl FlowGraph {
    /// Build the graph for `recipes` balanced against `targets`.
    ///
    /// Every recipe becomes its own machine, even when two recipes make the
    /// same item; they are then alternative producers.
    pub fn build(recipes: &[RecipeDef], targets: &TargetSpec) -> Result<Self, GraphError> {
        if recipes.is_empty() {
            return Err(GraphError::EmptyInput);
        }
        if targets.is_empty() {
            return Err(GraphError::NoTarget);
        }
        for (index, recipe) in recipes.iter().enumerate() {
            validate_recipe(index, recipe)?;
        }
        for (item, rate) in targets.iter() {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(GraphError::InvalidTarget {
                    item: item.to_string(),
                    rate,
                });
            }
        }

        let mut graph = Self {
            machines: Vec::with_capacity(recipes.len()),
            items: Vec::new(),
            edges: Vec::new(),
            targets: Vec::new(),
            item_index: HashMap::new(),
        };

        for recipe in recipes {
            let machine = MachineId(graph.machines.len());
            graph.machines.push(MachineNode {
                id: machine,
                label: format!("M{}", machine.0),
                recipe: recipe.clone(),
            });

            for (item, quantity) in &recipe.inputs {
                let rate = recipe.rate_per_second(*quantity);
                graph.add_edge(machine, item, EdgeDirection::Input, rate);
            }
            for (item, quantity) in &recipe.outputs {
                let rate = recipe.rate_per_second(*quantity);
                graph.add_edge(machine, item, EdgeDirection::Output, rate);
            }
        }

        for (item, rate) in targets.iter() {
            let id = graph
                .item_id(item)
                .ok_or_else(|| GraphError::UnknownItem(item.to_string()))?;
            graph.targets.push(Target { item: id, rate });
        }

        debug!(
            machines = graph.machines.len(),
            items = graph.items.len(),
            edges = graph.edges.len(),
            raw_sources = graph.items.iter().filter(|i| i.is_raw_source()).count(),
            "flow graph built"
        );

        Ok(graph)
    }

    fn add_edge(&mut self, machine: MachineId, item: &str, direction: EdgeDirection, unit_rate: f64) {
        let item = self.get_or_create_item(item);
        let id = EdgeId(self.edges.len());
        self.edges.push(FlowEdge {
            id,
            machine,
            item,
            direction,
            unit_rate,
        });
        let node = &mut self.items[item.0];
        match direction {
            EdgeDirection::Input => node.consumer_edges.push(id),
            EdgeDirection::Output => node.producer_edges.push(id),
        }
    }

    fn get_or_create_item(&mut self, name: &str) -> ItemId {
        if let Some(id) = self.item_index.get(name) {
            return *id;
        }
        let id = ItemId(self.items.len());
        self.items.push(ItemNode {
            id,
            name: name.to_string(),
            producer_edges: Vec::new(),
            consumer_edges: Vec::new(),
        });
        self.item_index.insert(name.to_string(), id);
        id
    }

    pub fn machines(&self) -> &[MachineNode] {
        &self.machines
    }

    pub fn items(&self) -> &[ItemNode] {
        &self.items
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn machine(&self, id: MachineId) -> &MachineNode {
        &self.machines[id.0]
    }

    pub fn item(&self, id: ItemId) -> &ItemNode {
        &self.items[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &FlowEdge {
        &self.edges[id.0]
    }

    pub fn item_id(&self, name: &str) -> Option<ItemId> {
        self.item_index.get(name).copied()
    }

    pub fn target_rate(&self, item: ItemId) -> Option<f64> {
        self.targets.iter().find(|t| t.item == item).map(|t| t.rate)
    }

    /// Edges touching `machine`, in creation order.
    pub fn machine_edges(&self, machine: MachineId) -> impl Iterator<Item = &FlowEdge> {
        self.edges.iter().filter(move |e| e.machine == machine)
    }
}

fn validate_recipe(index: usize, recipe: &RecipeDef) -> Result<(), GraphError> {
    let invalid = |reason: String| GraphError::InvalidRecipe {
        index,
        name: recipe.name.clone(),
        reason,
    };

    if recipe.inputs.is_empty() && recipe.outputs.is_empty() {
        return Err(invalid("recipe has neither inputs nor outputs".to_string()));
    }
    let seconds = recipe.duration.as_seconds();
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(invalid(format!("cycle duration {seconds}s must be positive")));
    }
    if !recipe.energy_per_tick.is_finite() || recipe.energy_per_tick < 0.0 {
        return Err(invalid(format!(
            "energy per tick {} must be non-negative",
            recipe.energy_per_tick
        )));
    }
    for (item, quantity) in recipe.inputs.iter().chain(recipe.outputs.iter()) {
        if !quantity.is_finite() || *quantity <= 0.0 {
            return Err(invalid(format!("quantity {quantity} of '{item}' must be positive")));
        }
    }
    Ok(())
}

//! Solved production graph
//!
//! The flow graph with every multiplier and rate filled in. This snapshot is
//! what reports and renderers consume; it is never mutated after assembly.

use serde::Serialize;

use crate::constraints::ConstraintError;
use crate::graph::{EdgeDirection, EdgeId, FlowGraph, ItemId, MachineId};
use crate::solver::Assignment;

/// How an item participates in the solved factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemRole {
    /// Drawn from outside; nothing in the factory makes it.
    RawSource,
    /// Made and consumed inside the factory.
    Intermediate,
    /// Made but never consumed; all of it is surplus.
    Byproduct,
    /// Requested output.
    Target,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolvedMachine {
    pub id: MachineId,
    pub label: String,
    pub recipe: String,
    pub multiplier: f64,
    /// Machines to build when each must run whole cycles.
    pub whole_machines: u64,
    pub cycle_seconds: f64,
    /// EU/t of a single machine.
    pub energy_per_machine: f64,
    /// EU/t of all `multiplier` machines together.
    pub energy_per_tick: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolvedItem {
    pub id: ItemId,
    pub name: String,
    pub role: ItemRole,
    /// Made by machines, per second.
    pub produced: f64,
    /// Fed into machines, per second.
    pub consumed: f64,
    /// Drawn from the implicit external source, per second.
    pub supplied: f64,
    /// Delivered to the target sink, per second.
    pub target: f64,
    /// Left over: produced + supplied - consumed - target.
    pub surplus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolvedEdge {
    pub id: EdgeId,
    pub machine: MachineId,
    pub item: ItemId,
    pub direction: EdgeDirection,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolvedGraph {
    pub machines: Vec<SolvedMachine>,
    pub items: Vec<SolvedItem>,
    pub edges: Vec<SolvedEdge>,
    /// Sum of all machine multipliers (the minimized objective).
    pub total_multiplier: f64,
    pub total_energy_per_tick: f64,
}

impl SolvedGraph {
    /// Combine `graph` with solved multipliers.
    ///
    /// Fails if any item would be consumed faster than it is made and
    /// supplied, which means the assignment does not satisfy the system it
    /// came from.
    pub fn assemble(graph: &FlowGraph, assignment: &Assignment, tolerance: f64) -> Result<Self, ConstraintError> {
        if assignment.values.len() != graph.machines().len() {
            return Err(ConstraintError::AssignmentSize {
                expected: graph.machines().len(),
                actual: assignment.values.len(),
            });
        }

        let machines: Vec<SolvedMachine> = graph
            .machines()
            .iter()
            .map(|node| {
                let multiplier = assignment.multiplier(node.id);
                // Any running machine needs at least one built.
                let whole_machines = if multiplier > 0.0 {
                    ((multiplier - tolerance).ceil() as u64).max(1)
                } else {
                    0
                };
                SolvedMachine {
                    id: node.id,
                    label: node.label.clone(),
                    recipe: node.recipe.name.clone(),
                    multiplier,
                    whole_machines,
                    cycle_seconds: node.recipe.duration.as_seconds(),
                    energy_per_machine: node.recipe.energy_per_tick,
                    energy_per_tick: node.recipe.energy_per_tick * multiplier,
                }
            })
            .collect();

        let edges: Vec<SolvedEdge> = graph
            .edges()
            .iter()
            .map(|edge| SolvedEdge {
                id: edge.id,
                machine: edge.machine,
                item: edge.item,
                direction: edge.direction,
                rate: edge.unit_rate * assignment.multiplier(edge.machine),
            })
            .collect();

        let mut items = Vec::with_capacity(graph.items().len());
        for node in graph.items() {
            let produced: f64 = node.producer_edges.iter().map(|e| edges[e.0].rate).sum();
            let consumed: f64 = node.consumer_edges.iter().map(|e| edges[e.0].rate).sum();
            let target = graph.target_rate(node.id).unwrap_or(0.0);
            let supplied = if node.is_raw_source() {
                (consumed + target - produced).max(0.0)
            } else {
                0.0
            };

            let mut surplus = produced + supplied - consumed - target;
            let slack = tolerance * produced.max(consumed).max(1.0);
            if surplus < -slack {
                return Err(ConstraintError::NegativeSurplus {
                    item: node.name.clone(),
                    surplus,
                });
            }
            if surplus.abs() <= slack {
                surplus = 0.0;
            }

            let role = if target > 0.0 {
                ItemRole::Target
            } else if node.is_raw_source() {
                ItemRole::RawSource
            } else if node.consumer_edges.is_empty() {
                ItemRole::Byproduct
            } else {
                ItemRole::Intermediate
            };

            items.push(SolvedItem {
                id: node.id,
                name: node.name.clone(),
                role,
                produced,
                consumed,
                supplied,
                target,
                surplus,
            });
        }

        Ok(Self {
            total_multiplier: machines.iter().map(|m| m.multiplier).sum(),
            total_energy_per_tick: machines.iter().map(|m| m.energy_per_tick).sum(),
            machines,
            items,
            edges,
        })
    }

    pub fn item(&self, name: &str) -> Option<&SolvedItem> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn machine(&self, id: MachineId) -> &SolvedMachine {
        &self.machines[id.0]
    }

    /// Machines that actually run.
    pub fn active_machines(&self) -> impl Iterator<Item = &SolvedMachine> {
        self.machines.iter().filter(|m| m.multiplier > 0.0)
    }

    /// Raw materials drawn from outside, with their rates.
    pub fn raw_inputs(&self) -> impl Iterator<Item = (&str, f64)> {
        self.items
            .iter()
            .filter(|i| i.supplied > 0.0)
            .map(|i| (i.name.as_str(), i.supplied))
    }

    /// Items left over, with their surplus rates.
    pub fn surpluses(&self) -> impl Iterator<Item = (&str, f64)> {
        self.items
            .iter()
            .filter(|i| i.surplus > 0.0)
            .map(|i| (i.name.as_str(), i.surplus))
    }

    pub fn edges_of(&self, machine: MachineId, direction: EdgeDirection) -> impl Iterator<Item = &SolvedEdge> {
        self.edges
            .iter()
            .filter(move |e| e.machine == machine && e.direction == direction)
    }
}

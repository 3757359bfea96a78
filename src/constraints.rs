//! Constraint compilation
//!
//! Walks a [`FlowGraph`] and emits a solver-neutral linear program: one
//! non-negative multiplier per machine, one conservation row per produced
//! item, one equality row per target, and a minimize-total objective.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::graph::{FlowGraph, ItemId, ItemNode};

/// Coefficients smaller than this are treated as cancelled out.
const ZERO_COEFFICIENT: f64 = 1e-12;

/// Internal invariant violations. These indicate a defect in this crate,
/// not a problem with the user's recipes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstraintError {
    #[error("row '{row}' has non-finite coefficient {coefficient}")]
    NonFiniteCoefficient { row: String, coefficient: f64 },

    #[error("row '{row}' has non-finite right-hand side {rhs}")]
    NonFiniteRhs { row: String, rhs: f64 },

    #[error("row '{row}' references unknown variable #{var}")]
    UnknownVariable { row: String, var: usize },

    #[error("row '{row}' references variable #{var} more than once")]
    DuplicateVariable { row: String, var: usize },

    #[error("variable '{variable}' has invalid bounds [{lower}, {upper}]")]
    InvalidBounds {
        variable: String,
        lower: f64,
        upper: f64,
    },

    #[error("assignment has {actual} values for {expected} variables")]
    AssignmentSize { expected: usize, actual: usize },

    #[error("item '{item}' ends with negative surplus {surplus}")]
    NegativeSurplus { item: String, surplus: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComparisonOp {
    Le,
    Ge,
    Eq,
}

impl ComparisonOp {
    /// Whether `lhs <op> rhs` holds within `tolerance`.
    pub fn holds(self, lhs: f64, rhs: f64, tolerance: f64) -> bool {
        match self {
            ComparisonOp::Le => lhs <= rhs + tolerance,
            ComparisonOp::Ge => lhs >= rhs - tolerance,
            ComparisonOp::Eq => (lhs - rhs).abs() <= tolerance,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComparisonOp::Le => "<=",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Eq => "=",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub objective: f64,
}

/// What a row stands for, kept so failures can point back at the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowKind {
    /// produced - consumed >= 0 for an item
    Conservation(ItemId),
    /// produced - consumed = rate for a target item
    Target(ItemId),
    /// sum of multipliers fixed to one (free-production probe only)
    Normalization,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constraint {
    pub name: String,
    pub kind: RowKind,
    pub terms: Vec<(VarId, f64)>,
    pub op: ComparisonOp,
    pub rhs: f64,
}

impl Constraint {
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coefficient)| coefficient * values.get(var.0).copied().unwrap_or(0.0))
            .sum()
    }

    /// A row that no assignment of non-negative variables can satisfy,
    /// judged from coefficient signs alone. Assumes lower bounds of zero.
    pub fn is_trivially_infeasible(&self) -> bool {
        let all_non_positive = self.terms.iter().all(|(_, c)| *c <= 0.0);
        let all_non_negative = self.terms.iter().all(|(_, c)| *c >= 0.0);
        match self.op {
            ComparisonOp::Ge => all_non_positive && self.rhs > 0.0,
            ComparisonOp::Le => all_non_negative && self.rhs < 0.0,
            ComparisonOp::Eq => {
                (all_non_positive && self.rhs > 0.0) || (all_non_negative && self.rhs < 0.0)
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        if self.terms.is_empty() {
            f.write_str("0")?;
        }
        for (i, (var, coefficient)) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "{coefficient}*x{}", var.0)?;
        }
        write!(f, " {} {}", self.op, self.rhs)
    }
}

/// A linear program in sparse form, independent of any engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintSystem {
    pub sense: Sense,
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
}

impl ConstraintSystem {
    pub fn new(sense: Sense) -> Self {
        Self {
            sense,
            variables: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn add_variable(&mut self, name: impl Into<String>, lower: f64, upper: f64, objective: f64) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(Variable {
            name: name.into(),
            lower,
            upper,
            objective,
        });
        id
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.variables
            .iter()
            .zip(values)
            .map(|(var, value)| var.objective * value)
            .sum()
    }

    /// Whether `values` satisfies every bound and row within `tolerance`.
    pub fn is_satisfied_by(&self, values: &[f64], tolerance: f64) -> bool {
        values.len() == self.variables.len()
            && self
                .variables
                .iter()
                .zip(values)
                .all(|(var, v)| *v >= var.lower - tolerance && *v <= var.upper + tolerance)
            && self
                .constraints
                .iter()
                .all(|row| row.op.holds(row.evaluate(values), row.rhs, tolerance))
    }

    /// Check the structural invariants the compiler promises.
    pub fn validate(&self) -> Result<(), ConstraintError> {
        for var in &self.variables {
            if var.lower.is_nan() || var.upper.is_nan() || var.lower > var.upper || !var.objective.is_finite() {
                return Err(ConstraintError::InvalidBounds {
                    variable: var.name.clone(),
                    lower: var.lower,
                    upper: var.upper,
                });
            }
        }
        for row in &self.constraints {
            if !row.rhs.is_finite() {
                return Err(ConstraintError::NonFiniteRhs {
                    row: row.name.clone(),
                    rhs: row.rhs,
                });
            }
            let mut seen = vec![false; self.variables.len()];
            for (var, coefficient) in &row.terms {
                if !coefficient.is_finite() {
                    return Err(ConstraintError::NonFiniteCoefficient {
                        row: row.name.clone(),
                        coefficient: *coefficient,
                    });
                }
                let slot = seen.get_mut(var.0).ok_or_else(|| ConstraintError::UnknownVariable {
                    row: row.name.clone(),
                    var: var.0,
                })?;
                if *slot {
                    return Err(ConstraintError::DuplicateVariable {
                        row: row.name.clone(),
                        var: var.0,
                    });
                }
                *slot = true;
            }
        }
        Ok(())
    }
}

/// Compile the balancing program for `graph`.
///
/// Variables follow machine order and rows follow item order, so identical
/// graphs always produce identical systems.
pub fn compile(graph: &FlowGraph) -> Result<ConstraintSystem, ConstraintError> {
    let mut system = ConstraintSystem::new(Sense::Minimize);
    for machine in graph.machines() {
        system.add_variable(machine.label.clone(), 0.0, f64::INFINITY, 1.0);
    }

    for item in graph.items() {
        let terms = net_terms(graph, item);
        match graph.target_rate(item.id) {
            Some(rate) => system.add_constraint(Constraint {
                name: format!("target[{}]", item.name),
                kind: RowKind::Target(item.id),
                terms,
                op: ComparisonOp::Eq,
                rhs: rate,
            }),
            // Raw sources have unlimited supply: nothing to conserve.
            None if item.is_raw_source() => {}
            None => system.add_constraint(Constraint {
                name: format!("item[{}]", item.name),
                kind: RowKind::Conservation(item.id),
                terms,
                op: ComparisonOp::Ge,
                rhs: 0.0,
            }),
        }
    }

    system.validate()?;
    debug!(
        variables = system.variables.len(),
        constraints = system.constraints.len(),
        "constraint system compiled"
    );
    for row in &system.constraints {
        tracing::trace!("{row}");
    }
    Ok(system)
}

/// Compile the self-reinforcing loop probe for `graph`.
///
/// Only machines that consume something may run; their multipliers sum to
/// one; every item, raw ones included, must keep a non-negative net flow;
/// the objective maximizes total net output. A strictly positive optimum
/// means some loop of recipes creates items out of nothing. Returns `None`
/// when no machine has inputs, since such a loop cannot exist.
pub fn compile_free_production_probe(graph: &FlowGraph) -> Result<Option<ConstraintSystem>, ConstraintError> {
    if graph.machines().iter().all(|m| m.recipe.is_infinite_source()) {
        return Ok(None);
    }

    let mut system = ConstraintSystem::new(Sense::Maximize);
    let mut normalization = Vec::new();
    for machine in graph.machines() {
        let net_output: f64 = graph.machine_edges(machine.id).map(|e| e.signed_unit_rate()).sum();
        let upper = if machine.recipe.is_infinite_source() { 0.0 } else { f64::INFINITY };
        let var = system.add_variable(machine.label.clone(), 0.0, upper, net_output);
        if upper > 0.0 {
            normalization.push((var, 1.0));
        }
    }

    for item in graph.items() {
        let terms = net_terms(graph, item);
        if terms.is_empty() {
            continue;
        }
        system.add_constraint(Constraint {
            name: format!("item[{}]", item.name),
            kind: RowKind::Conservation(item.id),
            terms,
            op: ComparisonOp::Ge,
            rhs: 0.0,
        });
    }
    system.add_constraint(Constraint {
        name: "normalization".to_string(),
        kind: RowKind::Normalization,
        terms: normalization,
        op: ComparisonOp::Eq,
        rhs: 1.0,
    });

    system.validate()?;
    Ok(Some(system))
}

/// Net per-multiplier contribution of each machine to `item`, sorted by
/// machine. A recipe that consumes and returns the same item is netted.
fn net_terms(graph: &FlowGraph, item: &ItemNode) -> Vec<(VarId, f64)> {
    let mut net: BTreeMap<VarId, f64> = BTreeMap::new();
    for edge_id in item.producer_edges.iter().chain(item.consumer_edges.iter()) {
        let edge = graph.edge(*edge_id);
        *net.entry(VarId(edge.machine.0)).or_default() += edge.signed_unit_rate();
    }
    net.into_iter()
        .filter(|(_, coefficient)| coefficient.abs() > ZERO_COEFFICIENT)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GameTime, RecipeDef, TargetSpec};

    fn second(name: &str) -> RecipeDef {
        RecipeDef::new(name, GameTime::from_seconds(1.0), 0.0)
    }

    fn chain() -> FlowGraph {
        let smelt = second("Smelter").input("ore", 2.0).output("ingot", 1.0);
        let press = second("Press").input("ingot", 3.0).output("plate", 2.0);
        FlowGraph::build(&[smelt, press], &TargetSpec::single("plate", 4.0)).unwrap()
    }

    #[test]
    fn one_variable_per_machine_minimizing_the_total() {
        let system = compile(&chain()).unwrap();
        assert_eq!(system.sense, Sense::Minimize);
        let names: Vec<_> = system.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["M0", "M1"]);
        assert!(system.variables.iter().all(|v| v.lower == 0.0 && v.objective == 1.0));
    }

    #[test]
    fn raw_sources_get_no_row_and_targets_get_equality() {
        let system = compile(&chain()).unwrap();
        let names: Vec<_> = system.constraints.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["item[ingot]", "target[plate]"]);

        let ingot = &system.constraints[0];
        assert_eq!(ingot.op, ComparisonOp::Ge);
        assert_eq!(ingot.terms, vec![(VarId(0), 1.0), (VarId(1), -3.0)]);

        let plate = &system.constraints[1];
        assert_eq!(plate.op, ComparisonOp::Eq);
        assert_eq!(plate.rhs, 4.0);
        assert_eq!(plate.terms, vec![(VarId(1), 2.0)]);
    }

    #[test]
    fn catalysts_net_out_of_the_row() {
        let reactor = second("Reactor")
            .input("catalyst", 1.0)
            .input("ore", 1.0)
            .output("catalyst", 1.0)
            .output("metal", 1.0);
        let graph = FlowGraph::build(&[reactor], &TargetSpec::single("metal", 1.0)).unwrap();
        let system = compile(&graph).unwrap();
        let catalyst = system
            .constraints
            .iter()
            .find(|c| c.name == "item[catalyst]")
            .unwrap();
        assert!(catalyst.terms.is_empty());
        assert!(!catalyst.is_trivially_infeasible());
    }

    #[test]
    fn target_without_producer_is_trivially_infeasible() {
        let burner = second("Burner").input("coal", 1.0).output("ash", 1.0);
        let graph = FlowGraph::build(&[burner], &TargetSpec::single("coal", 1.0)).unwrap();
        let system = compile(&graph).unwrap();
        let row = system.constraints.iter().find(|c| c.name == "target[coal]").unwrap();
        assert!(row.is_trivially_infeasible());
    }

    #[test]
    fn compilation_is_deterministic() {
        assert_eq!(compile(&chain()).unwrap(), compile(&chain()).unwrap());
    }

    #[test]
    fn satisfaction_check_uses_rows_and_bounds() {
        let system = compile(&chain()).unwrap();
        assert!(system.is_satisfied_by(&[6.0, 2.0], 1e-9));
        assert!(!system.is_satisfied_by(&[1.0, 2.0], 1e-9));
        assert!(!system.is_satisfied_by(&[-1.0, 2.0], 1e-9));
        assert_eq!(system.objective_value(&[6.0, 2.0]), 8.0);
    }

    #[test]
    fn validate_catches_broken_rows() {
        let mut system = ConstraintSystem::new(Sense::Minimize);
        let x = system.add_variable("x", 0.0, f64::INFINITY, 1.0);
        system.add_constraint(Constraint {
            name: "dup".to_string(),
            kind: RowKind::Normalization,
            terms: vec![(x, 1.0), (x, 2.0)],
            op: ComparisonOp::Eq,
            rhs: 1.0,
        });
        assert!(matches!(system.validate(), Err(ConstraintError::DuplicateVariable { .. })));

        system.constraints[0].terms = vec![(VarId(7), 1.0)];
        assert!(matches!(system.validate(), Err(ConstraintError::UnknownVariable { var: 7, .. })));

        system.constraints[0].terms = vec![(x, f64::NAN)];
        assert!(matches!(system.validate(), Err(ConstraintError::NonFiniteCoefficient { .. })));
    }

    #[test]
    fn probe_pins_infinite_sources_to_zero() {
        let pump = second("Pump").output("water", 1.0);
        let doubler = second("Doubler").input("seed", 1.0).output("seed", 2.0);
        let graph = FlowGraph::build(&[pump, doubler], &TargetSpec::single("seed", 1.0)).unwrap();
        let probe = compile_free_production_probe(&graph).unwrap().unwrap();
        assert_eq!(probe.sense, Sense::Maximize);
        assert_eq!(probe.variables[0].upper, 0.0);
        assert_eq!(probe.variables[1].objective, 1.0);
        let last = probe.constraints.last().unwrap();
        assert_eq!(last.kind, RowKind::Normalization);
        assert_eq!(last.terms, vec![(VarId(1), 1.0)]);
    }

    #[test]
    fn probe_is_skipped_for_source_only_graphs() {
        let pump = second("Pump").output("water", 1.0);
        let graph = FlowGraph::build(&[pump], &TargetSpec::single("water", 1.0)).unwrap();
        assert!(compile_free_production_probe(&graph).unwrap().is_none());
    }
}

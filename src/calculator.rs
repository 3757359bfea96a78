//! Production line balancing
//!
//! Chains graph construction, constraint compilation and the LP solve into
//! one call, and formats the solved factory for the terminal.

use std::fmt;

use tracing::{debug, info};

use crate::constraints::{self, ConstraintError};
use crate::graph::{EdgeDirection, FlowGraph, GraphError};
use crate::models::{RecipeDef, TargetSpec};
use crate::solution::{ItemRole, SolvedGraph};
use crate::solver::{SolveFailure, SolverAdapter, SolverEngine, SolverSettings};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BalanceError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("internal error: {0}")]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Solve(#[from] SolveFailure),
}

/// Balance `recipes` to deliver `targets` using the bundled LP engine.
pub fn balance(recipes: &[RecipeDef], targets: &TargetSpec, settings: &SolverSettings) -> Result<SolvedGraph, BalanceError> {
    let adapter = SolverAdapter::minilp(settings.clone());
    balance_with(&adapter, recipes, targets)
}

/// Balance `recipes` to deliver `targets` through `adapter`.
///
/// Graph errors are reported before any engine call. Every run is
/// independent: nothing is cached between calls.
pub fn balance_with<E: SolverEngine>(
    adapter: &SolverAdapter<E>,
    recipes: &[RecipeDef],
    targets: &TargetSpec,
) -> Result<SolvedGraph, BalanceError> {
    let graph = FlowGraph::build(recipes, targets)?;
    let system = constraints::compile(&graph)?;

    if adapter.settings().reject_free_production {
        check_free_production(adapter, &graph)?;
    }

    let assignment = adapter
        .solve(&system)
        .map_err(|failure| diagnose(&graph, failure))?;
    let solved = SolvedGraph::assemble(&graph, &assignment, adapter.settings().tolerance)?;

    info!(
        engine = adapter.engine_name(),
        machines = solved.active_machines().count(),
        total_multiplier = solved.total_multiplier,
        energy_per_tick = solved.total_energy_per_tick,
        "factory balanced"
    );
    Ok(solved)
}

/// Fail with `Unbounded` if some loop of recipes makes items from nothing.
fn check_free_production<E: SolverEngine>(adapter: &SolverAdapter<E>, graph: &FlowGraph) -> Result<(), BalanceError> {
    let Some(probe) = constraints::compile_free_production_probe(graph)? else {
        return Ok(());
    };
    let tolerance = adapter.settings().tolerance;

    match adapter.solve(&probe) {
        Ok(assignment) if assignment.objective > tolerance => {
            let machines: Vec<String> = graph
                .machines()
                .iter()
                .filter(|m| assignment.multiplier(m.id) > tolerance)
                .map(|m| format!("{} ({})", m.label, m.recipe.name))
                .collect();
            Err(SolveFailure::Unbounded {
                detail: format!("recipes {} create items from nothing", machines.join(", ")),
                machines,
            }
            .into())
        }
        Ok(_) | Err(SolveFailure::Infeasible { .. }) => {
            debug!("no self-reinforcing recipe loop");
            Ok(())
        }
        Err(failure) => Err(failure.into()),
    }
}

/// Attach the requested targets to an engine-level infeasibility.
///
/// Rows that fail on sign alone, such as a target nothing produces, are
/// already named by the solver's pre-check and pass through unchanged.
fn diagnose(graph: &FlowGraph, failure: SolveFailure) -> SolveFailure {
    match failure {
        SolveFailure::Infeasible { constraint: None, .. } => {
            let wanted: Vec<String> = graph
                .targets()
                .iter()
                .map(|t| format!("{} @ {}/s", graph.item(t.item).name, t.rate))
                .collect();
            SolveFailure::Infeasible {
                constraint: None,
                detail: format!(
                    "no non-negative machine counts deliver {} while keeping every intermediate item supplied",
                    wanted.join(", ")
                ),
            }
        }
        other => other,
    }
}

/// Format SI-scaled numbers the way machine energy is usually read (1.50k, 2.00M).
pub fn si(value: f64) -> String {
    const SUFFIXES: [&str; 7] = ["", "k", "M", "G", "T", "P", "E"];
    if value == 0.0 || !value.is_finite() {
        return format!("{value:.2}");
    }
    let degree = ((value.abs().log10() / 3.0).floor() as i32).clamp(0, SUFFIXES.len() as i32 - 1);
    let scaled = value / 1000f64.powi(degree);
    format!("{scaled:.2}{}", SUFFIXES[degree as usize])
}

/// Format a solved factory machine by machine
pub fn format_solution(solved: &SolvedGraph) -> String {
    let mut output = String::new();

    for machine in solved.active_machines() {
        output.push_str(&format!(
            "{:.2}x {} [{}] ({} EU/t, {:.2}s cycle)\n",
            machine.multiplier,
            machine.recipe,
            machine.label,
            si(machine.energy_per_tick),
            machine.cycle_seconds
        ));
        for edge in solved.edges_of(machine.id, EdgeDirection::Input) {
            output.push_str(&format!(
                "    needs {} @ {:.3}/s\n",
                solved.items[edge.item.0].name, edge.rate
            ));
        }
        for edge in solved.edges_of(machine.id, EdgeDirection::Output) {
            output.push_str(&format!(
                "    makes {} @ {:.3}/s\n",
                solved.items[edge.item.0].name, edge.rate
            ));
        }
    }

    output
}

/// Summary of a balanced factory
#[derive(Debug)]
pub struct FactorySummary {
    pub targets: Vec<(String, f64)>,
    pub machine_counts: Vec<(String, f64, u64)>,
    pub raw_inputs: Vec<(String, f64)>,
    pub surpluses: Vec<(String, f64)>,
    pub total_energy_per_tick: f64,
}

pub fn summarize(solved: &SolvedGraph) -> FactorySummary {
    let mut machine_counts: Vec<_> = solved
        .active_machines()
        .map(|m| (m.recipe.clone(), m.multiplier, m.whole_machines))
        .collect();
    machine_counts.sort_by(|a, b| a.0.cmp(&b.0));

    FactorySummary {
        targets: solved
            .items
            .iter()
            .filter(|i| i.role == ItemRole::Target)
            .map(|i| (i.name.clone(), i.target))
            .collect(),
        machine_counts,
        raw_inputs: solved.raw_inputs().map(|(n, r)| (n.to_string(), r)).collect(),
        surpluses: solved.surpluses().map(|(n, r)| (n.to_string(), r)).collect(),
        total_energy_per_tick: solved.total_energy_per_tick,
    }
}

impl fmt::Display for FactorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Factory Summary ===")?;
        for (item, rate) in &self.targets {
            writeln!(f, "Target: {} @ {:.3}/s", item, rate)?;
        }
        writeln!(f)?;

        writeln!(f, "Machines required:")?;
        for (recipe, multiplier, whole) in &self.machine_counts {
            writeln!(f, "  {:.2}x {} (build {})", multiplier, recipe, whole)?;
        }
        writeln!(f)?;

        writeln!(f, "Raw inputs required:")?;
        for (item, rate) in &self.raw_inputs {
            writeln!(f, "  {} @ {:.3}/s", item, rate)?;
        }

        if !self.surpluses.is_empty() {
            writeln!(f)?;
            writeln!(f, "Surplus:")?;
            for (item, rate) in &self.surpluses {
                writeln!(f, "  {} @ {:.3}/s", item, rate)?;
            }
        }
        writeln!(f)?;

        writeln!(f, "Power: {} EU/t", si(self.total_energy_per_tick))?;

        Ok(())
    }
}

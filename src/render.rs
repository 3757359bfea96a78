//! Graphviz rendering of a solved factory

use std::fmt::Write;

use crate::calculator::si;
use crate::graph::EdgeDirection;
use crate::solution::{ItemRole, SolvedGraph};

const EDGE_COLORS: [&str; 8] = [
    "#b58900", "#cb4b16", "#dc322f", "#d33682", "#6c71c4", "#268bd2", "#2aa198", "#859900",
];

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render `solved` as a Graphviz digraph.
///
/// Idle machines and the edges touching them are left out. Raw supply and
/// target delivery get their own source and sink nodes.
pub fn to_dot(solved: &SolvedGraph) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut out, solved);
    out
}

fn write_dot(out: &mut String, solved: &SolvedGraph) -> std::fmt::Result {
    writeln!(out, "digraph factory {{")?;
    writeln!(out, "    rankdir=LR;")?;
    writeln!(out, "    node [fontname=\"Helvetica\"];")?;

    for machine in solved.active_machines() {
        let label = format!(
            "{:.2}x {}\\n{} EU/t",
            machine.multiplier,
            machine.recipe,
            si(machine.energy_per_tick)
        );
        writeln!(out, "    {} [shape=box, label={}];", machine.label, quote(&label))?;
    }

    for item in &solved.items {
        if item.produced == 0.0 && item.consumed == 0.0 && item.target == 0.0 {
            continue;
        }
        writeln!(out, "    item{} [shape=ellipse, label={}];", item.id.0, quote(&item.name))?;

        let color = EDGE_COLORS[item.id.0 % EDGE_COLORS.len()];
        if item.supplied > 0.0 {
            writeln!(
                out,
                "    source{} [shape=invhouse, label={}];",
                item.id.0,
                quote(&format!("{} supply", item.name))
            )?;
            writeln!(
                out,
                "    source{0} -> item{0} [color=\"{1}\", label=\"{2}/s\"];",
                item.id.0,
                color,
                si(item.supplied)
            )?;
        }
        if item.role == ItemRole::Target {
            writeln!(
                out,
                "    sink{} [shape=house, label={}];",
                item.id.0,
                quote(&format!("{} target", item.name))
            )?;
            writeln!(
                out,
                "    item{0} -> sink{0} [color=\"{1}\", label=\"{2}/s\"];",
                item.id.0,
                color,
                si(item.target)
            )?;
        }
        if item.surplus > 0.0 {
            writeln!(
                out,
                "    surplus{} [shape=house, style=dashed, label={}];",
                item.id.0,
                quote(&format!("{} surplus", item.name))
            )?;
            writeln!(
                out,
                "    item{0} -> surplus{0} [color=\"{1}\", style=dashed, label=\"{2}/s\"];",
                item.id.0,
                color,
                si(item.surplus)
            )?;
        }
    }

    for edge in &solved.edges {
        if edge.rate <= 0.0 {
            continue;
        }
        let machine = solved.machine(edge.machine);
        let color = EDGE_COLORS[edge.item.0 % EDGE_COLORS.len()];
        let (from, to) = match edge.direction {
            EdgeDirection::Input => (format!("item{}", edge.item.0), machine.label.clone()),
            EdgeDirection::Output => (machine.label.clone(), format!("item{}", edge.item.0)),
        };
        writeln!(out, "    {from} -> {to} [color=\"{color}\", label=\"{}/s\"];", si(edge.rate))?;
    }

    writeln!(out, "}}")
}

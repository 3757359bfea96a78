//! Factory Balancer
//!
//! Computes how many machines of each recipe a GregTech-style factory needs
//! to deliver target item rates, by compiling the recipe graph into a linear
//! program and minimizing the total machine count.

pub mod calculator;
pub mod config;
pub mod constraints;
pub mod db;
pub mod electricity;
pub mod graph;
pub mod logging;
pub mod models;
pub mod render;
pub mod solution;
pub mod solver;

pub use calculator::{balance, balance_with, BalanceError};
pub use graph::{FlowGraph, GraphError};
pub use models::{GameTime, RecipeDef, TargetSpec};
pub use solution::SolvedGraph;
pub use solver::{SolveFailure, SolverAdapter, SolverSettings};

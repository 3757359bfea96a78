//! LP engine adapter
//!
//! Hands a [`ConstraintSystem`] to an engine behind the [`SolverEngine`]
//! trait and turns the answer into an [`Assignment`] or a [`SolveFailure`].
//! The engine runs on a worker thread only so that the call can be bounded
//! by a timeout; the caller still blocks until it returns or times out.
//! Each solve starts at most one engine call.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use minilp::{ComparisonOp as LpOp, LinearExpr, OptimizationDirection, Problem};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constraints::{ComparisonOp, ConstraintSystem, Sense};
use crate::graph::MachineId;

/// Knobs for one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    /// Wall-clock limit for a single engine call.
    pub timeout: Duration,
    /// Extra waits on the same engine call after a timeout.
    pub max_retries: u32,
    /// Absolute slack for comparing solved rates.
    pub tolerance: f64,
    /// Fail with `Unbounded` when recipes can create items from nothing.
    pub reject_free_production: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            tolerance: 1e-6,
            reject_free_production: true,
        }
    }
}

/// Why a solve produced no assignment.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveFailure {
    #[error("infeasible: {detail}")]
    Infeasible {
        /// Row proven unsatisfiable, when one can be singled out.
        constraint: Option<String>,
        detail: String,
    },

    #[error("unbounded: {detail}")]
    Unbounded { machines: Vec<String>, detail: String },

    #[error("solver timed out after {attempts} attempt(s) of {timeout:?} each")]
    SolverTimeout { timeout: Duration, attempts: u32 },

    #[error("{engine} solver error: {message}")]
    SolverError { engine: String, message: String },
}

/// Raw outcome reported by an engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("problem is infeasible")]
    Infeasible,
    #[error("problem is unbounded")]
    Unbounded,
    #[error("{0}")]
    Failed(String),
}

/// An LP engine able to solve a [`ConstraintSystem`].
///
/// Implementations return one value per variable, in variable order.
pub trait SolverEngine: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn solve(&self, system: &ConstraintSystem) -> Result<Vec<f64>, EngineError>;
}

/// Pure-Rust dense simplex engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinilpEngine;

impl SolverEngine for MinilpEngine {
    fn name(&self) -> &str {
        "minilp"
    }

    fn solve(&self, system: &ConstraintSystem) -> Result<Vec<f64>, EngineError> {
        let direction = match system.sense {
            Sense::Minimize => OptimizationDirection::Minimize,
            Sense::Maximize => OptimizationDirection::Maximize,
        };
        let mut problem = Problem::new(direction);
        let vars: Vec<_> = system
            .variables
            .iter()
            .map(|v| problem.add_var(v.objective, (v.lower, v.upper)))
            .collect();

        for row in &system.constraints {
            // Empty rows were already checked by the pre-solve pass.
            if row.terms.is_empty() {
                continue;
            }
            let mut expr = LinearExpr::empty();
            for (var, coefficient) in &row.terms {
                expr.add(vars[var.0], *coefficient);
            }
            let op = match row.op {
                ComparisonOp::Le => LpOp::Le,
                ComparisonOp::Ge => LpOp::Ge,
                ComparisonOp::Eq => LpOp::Eq,
            };
            problem.add_constraint(expr, op, row.rhs);
        }

        let solution = problem.solve().map_err(|err| match err {
            minilp::Error::Infeasible => EngineError::Infeasible,
            minilp::Error::Unbounded => EngineError::Unbounded,
            #[allow(unreachable_patterns)]
            other => EngineError::Failed(other.to_string()),
        })?;
        Ok(vars.iter().map(|v| solution[*v]).collect())
    }
}

/// Solved values, one per variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub values: Vec<f64>,
    pub objective: f64,
    /// Timeout windows waited, including the one the answer arrived in.
    pub attempts: u32,
}

impl Assignment {
    /// Multiplier of `machine`; machine variables share machine indices.
    pub fn multiplier(&self, machine: MachineId) -> f64 {
        self.values[machine.0]
    }
}

/// Runs constraint systems through a [`SolverEngine`] with a timeout and a
/// bounded number of extra waits.
pub struct SolverAdapter<E: SolverEngine = MinilpEngine> {
    engine: Arc<E>,
    settings: SolverSettings,
}

impl SolverAdapter<MinilpEngine> {
    pub fn minilp(settings: SolverSettings) -> Self {
        Self::new(MinilpEngine, settings)
    }
}

impl<E: SolverEngine> SolverAdapter<E> {
    pub fn new(engine: E, settings: SolverSettings) -> Self {
        Self {
            engine: Arc::new(engine),
            settings,
        }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Solve `system`.
    ///
    /// Rows that are unsatisfiable on sign alone fail immediately without an
    /// engine call. Otherwise the engine is called exactly once, on one
    /// worker thread. A timeout is retried by waiting on that same worker
    /// again, up to `max_retries` more times; infeasible and unbounded
    /// answers are returned as soon as they arrive. When every wait times
    /// out the worker is abandoned and may keep running until the engine
    /// returns, but no second solve is ever started for the same call.
    pub fn solve(&self, system: &ConstraintSystem) -> Result<Assignment, SolveFailure> {
        precheck(system)?;

        debug!(engine = self.engine.name(), "invoking LP engine");
        let results = self.spawn_worker(system)?;
        let waits = self.settings.max_retries.saturating_add(1);
        for attempt in 1..=waits {
            match results.recv_timeout(self.settings.timeout) {
                Ok(Ok(values)) => {
                    let assignment = self.finish(system, values, attempt)?;
                    info!(
                        objective = assignment.objective,
                        attempts = attempt,
                        "LP solved"
                    );
                    return Ok(assignment);
                }
                Ok(Err(err)) => return Err(self.engine_failure(err)),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        attempt,
                        of = waits,
                        timeout_ms = self.settings.timeout.as_millis() as u64,
                        "LP engine timed out"
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.engine_error("engine thread ended without a result".to_string()));
                }
            }
        }

        Err(SolveFailure::SolverTimeout {
            timeout: self.settings.timeout,
            attempts: waits,
        })
    }

    fn spawn_worker(&self, system: &ConstraintSystem) -> Result<Receiver<Result<Vec<f64>, EngineError>>, SolveFailure> {
        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(&self.engine);
        let system = system.clone();

        thread::Builder::new()
            .name("lp-engine".to_string())
            .spawn(move || {
                // The receiver is gone if the call already timed out.
                let _ = tx.send(engine.solve(&system));
            })
            .map_err(|err| self.engine_error(format!("cannot start solver thread: {err}")))?;
        Ok(rx)
    }

    fn engine_failure(&self, err: EngineError) -> SolveFailure {
        match err {
            EngineError::Infeasible => SolveFailure::Infeasible {
                constraint: None,
                detail: "no non-negative multipliers satisfy every constraint".to_string(),
            },
            EngineError::Unbounded => SolveFailure::Unbounded {
                machines: Vec::new(),
                detail: "objective can improve without limit".to_string(),
            },
            EngineError::Failed(message) => self.engine_error(message),
        }
    }

    /// Check engine output and clean up simplex round-off.
    ///
    /// A value is snapped to zero only when its largest contribution to any
    /// row is within tolerance, so a tiny multiplier on a high-rate recipe
    /// survives. Negative values inside the tolerance are clamped to the
    /// lower bound.
    fn finish(&self, system: &ConstraintSystem, mut values: Vec<f64>, attempts: u32) -> Result<Assignment, SolveFailure> {
        if values.len() != system.variables.len() {
            return Err(self.engine_error(format!(
                "returned {} values for {} variables",
                values.len(),
                system.variables.len()
            )));
        }

        let mut scale = vec![0.0f64; values.len()];
        for row in &system.constraints {
            for (var, coefficient) in &row.terms {
                scale[var.0] = scale[var.0].max(coefficient.abs());
            }
        }

        let tolerance = self.settings.tolerance;
        for ((value, var), scale) in values.iter_mut().zip(&system.variables).zip(scale) {
            if !value.is_finite() {
                return Err(self.engine_error(format!("non-finite value {value} for {}", var.name)));
            }
            if *value < var.lower - tolerance {
                return Err(self.engine_error(format!(
                    "value {value} for {} is below its bound {}",
                    var.name, var.lower
                )));
            }
            if *value < var.lower {
                *value = var.lower;
            }
            let scale = if scale > 0.0 { scale } else { 1.0 };
            if value.abs() * scale <= tolerance {
                *value = 0.0;
            }
        }
        let objective = system.objective_value(&values);
        Ok(Assignment {
            values,
            objective,
            attempts,
        })
    }

    fn engine_error(&self, message: String) -> SolveFailure {
        SolveFailure::SolverError {
            engine: self.engine.name().to_string(),
            message,
        }
    }
}

fn precheck(system: &ConstraintSystem) -> Result<(), SolveFailure> {
    if let Some(row) = system.constraints.iter().find(|row| row.is_trivially_infeasible()) {
        return Err(SolveFailure::Infeasible {
            constraint: Some(row.name.clone()),
            detail: format!("constraint cannot hold for non-negative multipliers ({row})"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{Constraint, RowKind, VarId};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// min x + y  s.t.  x + 2y >= 4,  x >= 1
    fn small_system() -> ConstraintSystem {
        let mut system = ConstraintSystem::new(Sense::Minimize);
        let x = system.add_variable("x", 0.0, f64::INFINITY, 1.0);
        let y = system.add_variable("y", 0.0, f64::INFINITY, 1.0);
        system.add_constraint(Constraint {
            name: "a".to_string(),
            kind: RowKind::Normalization,
            terms: vec![(x, 1.0), (y, 2.0)],
            op: ComparisonOp::Ge,
            rhs: 4.0,
        });
        system.add_constraint(Constraint {
            name: "b".to_string(),
            kind: RowKind::Normalization,
            terms: vec![(x, 1.0)],
            op: ComparisonOp::Ge,
            rhs: 1.0,
        });
        system
    }

    fn quick() -> SolverSettings {
        SolverSettings {
            timeout: Duration::from_millis(50),
            max_retries: 2,
            ..SolverSettings::default()
        }
    }

    /// Sleeps for `delay` on every call, then answers.
    struct SlowEngine {
        calls: Arc<AtomicU32>,
        running: Arc<AtomicU32>,
        delay: Duration,
        answer: Result<Vec<f64>, EngineError>,
    }

    impl SolverEngine for SlowEngine {
        fn name(&self) -> &str {
            "slow"
        }

        fn solve(&self, _system: &ConstraintSystem) -> Result<Vec<f64>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.running.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    struct Counters {
        calls: Arc<AtomicU32>,
        running: Arc<AtomicU32>,
    }

    fn slow(delay_ms: u64, answer: Result<Vec<f64>, EngineError>) -> (SlowEngine, Counters) {
        let counters = Counters {
            calls: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicU32::new(0)),
        };
        let engine = SlowEngine {
            calls: Arc::clone(&counters.calls),
            running: Arc::clone(&counters.running),
            delay: Duration::from_millis(delay_ms),
            answer,
        };
        (engine, counters)
    }

    #[test]
    fn minilp_finds_the_optimum() {
        let adapter = SolverAdapter::minilp(SolverSettings::default());
        let assignment = adapter.solve(&small_system()).unwrap();
        assert!((assignment.values[0] - 1.0).abs() < 1e-6);
        assert!((assignment.values[1] - 1.5).abs() < 1e-6);
        assert!((assignment.objective - 2.5).abs() < 1e-6);
        assert_eq!(assignment.attempts, 1);
    }

    #[test]
    fn minilp_reports_infeasibility() {
        let mut system = small_system();
        system.add_constraint(Constraint {
            name: "cap".to_string(),
            kind: RowKind::Normalization,
            terms: vec![(VarId(0), 1.0), (VarId(1), 1.0)],
            op: ComparisonOp::Le,
            rhs: 1.5,
        });
        let err = SolverAdapter::minilp(SolverSettings::default())
            .solve(&system)
            .unwrap_err();
        assert!(matches!(err, SolveFailure::Infeasible { constraint: None, .. }));
    }

    #[test]
    fn sign_infeasible_rows_fail_before_the_engine_runs() {
        let mut system = small_system();
        system.add_constraint(Constraint {
            name: "target[x]".to_string(),
            kind: RowKind::Normalization,
            terms: vec![(VarId(0), -1.0)],
            op: ComparisonOp::Eq,
            rhs: 3.0,
        });
        let (engine, counters) = slow(0, Ok(vec![0.0, 0.0]));
        let err = SolverAdapter::new(engine, quick()).solve(&system).unwrap_err();
        assert_eq!(
            err,
            SolveFailure::Infeasible {
                constraint: Some("target[x]".to_string()),
                detail: "constraint cannot hold for non-negative multipliers (target[x]: -1*x0 = 3)"
                    .to_string(),
            }
        );
        assert_eq!(counters.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_slow_answer_is_picked_up_by_a_later_wait() {
        crate::logging::init_test();
        let (engine, counters) = slow(150, Ok(vec![1.0, 1.5]));
        let settings = SolverSettings {
            timeout: Duration::from_millis(100),
            max_retries: 3,
            ..SolverSettings::default()
        };
        let assignment = SolverAdapter::new(engine, settings).solve(&small_system()).unwrap();
        assert!(assignment.attempts >= 2);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeouts_never_start_a_second_engine_call() {
        let (engine, counters) = slow(400, Ok(vec![1.0, 1.5]));
        let err = SolverAdapter::new(engine, quick()).solve(&small_system()).unwrap_err();
        assert_eq!(
            err,
            SolveFailure::SolverTimeout {
                timeout: Duration::from_millis(50),
                attempts: 3,
            }
        );
        assert!(counters.calls.load(Ordering::SeqCst) <= 1);
        assert!(counters.running.load(Ordering::SeqCst) <= 1);
    }

    #[test]
    fn infeasibility_is_never_retried() {
        let (engine, counters) = slow(0, Err(EngineError::Infeasible));
        let err = SolverAdapter::new(engine, quick()).solve(&small_system()).unwrap_err();
        assert!(matches!(err, SolveFailure::Infeasible { .. }));
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn engine_messages_are_passed_through() {
        let (engine, _) = slow(0, Err(EngineError::Failed("license expired".to_string())));
        let adapter = SolverAdapter::new(engine, quick());
        assert_eq!(adapter.engine_name(), "slow");
        let err = adapter.solve(&small_system()).unwrap_err();
        assert_eq!(
            err,
            SolveFailure::SolverError {
                engine: "slow".to_string(),
                message: "license expired".to_string(),
            }
        );
    }

    #[test]
    fn malformed_engine_output_is_an_engine_error() {
        let (engine, _) = slow(0, Ok(vec![1.0]));
        let err = SolverAdapter::new(engine, quick()).solve(&small_system()).unwrap_err();
        assert!(matches!(err, SolveFailure::SolverError { .. }));

        let (engine, _) = slow(0, Ok(vec![-2.0, 3.0]));
        let err = SolverAdapter::new(engine, quick()).solve(&small_system()).unwrap_err();
        assert!(matches!(err, SolveFailure::SolverError { .. }));
    }

    #[test]
    fn round_off_near_zero_is_snapped() {
        let (engine, _) = slow(0, Ok(vec![4.0, -1e-9]));
        let assignment = SolverAdapter::new(engine, quick()).solve(&small_system()).unwrap();
        assert_eq!(assignment.values, vec![4.0, 0.0]);
    }

    #[test]
    fn small_multipliers_on_fast_recipes_are_kept() {
        // 20000 items/s per machine, 0.01 items/s wanted.
        let mut system = ConstraintSystem::new(Sense::Minimize);
        let pump = system.add_variable("pump", 0.0, f64::INFINITY, 1.0);
        let idle = system.add_variable("idle", 0.0, f64::INFINITY, 1.0);
        system.add_constraint(Constraint {
            name: "target[water]".to_string(),
            kind: RowKind::Normalization,
            terms: vec![(pump, 20_000.0), (idle, 1.0)],
            op: ComparisonOp::Eq,
            rhs: 0.01,
        });

        let (engine, _) = slow(0, Ok(vec![5e-7, 1e-12]));
        let assignment = SolverAdapter::new(engine, quick()).solve(&system).unwrap();
        assert_eq!(assignment.values, vec![5e-7, 0.0]);

        let assignment = SolverAdapter::minilp(SolverSettings::default()).solve(&system).unwrap();
        assert!((assignment.values[0] - 5e-7).abs() < 1e-10);
    }
}

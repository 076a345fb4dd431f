//! Portfolio problems as linear programs solved by `clarabel`.
//!
//! Weights are split as `w = u - v` with `u, v >= 0` so the gross exposure
//! cap becomes the linear row `sum(u) + sum(v) <= cap`. Bands with equal
//! sides go to the zero cone; every other finite side becomes one
//! `a . x <= b` row of the nonnegative cone.

use super::{ConstrainedOptimizer, LinearForm, PortfolioProblem, TargetWeights};
use crate::error::SolverError;
use tracing::debug;

/// Weights closer to zero than this are reported as exactly zero.
const ZERO_WEIGHT: f64 = 1e-9;

/// Built-in [`ConstrainedOptimizer`] backed by the Clarabel interior-point solver.
#[derive(Debug, Clone)]
pub struct ClarabelOptimizer {
    max_iterations: u32,
}

impl Default for ClarabelOptimizer {
    fn default() -> Self {
        Self { max_iterations: 200 }
    }
}

impl ClarabelOptimizer {
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }
}

impl ConstrainedOptimizer for ClarabelOptimizer {
    fn solve(&self, problem: &PortfolioProblem) -> Result<TargetWeights, SolverError> {
        use clarabel::algebra::CscMatrix;
        use clarabel::solver::{
            DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
        };

        let form = problem.linear_form()?;
        let n = problem.len();
        if n == 0 {
            return Ok(TargetWeights::default());
        }

        let rows = constraint_rows(&form);
        let a = rows.matrix();
        let b = rows.rhs();
        let m = b.len();
        let equalities = rows.equality_count();

        // LP: no quadratic term
        let p = CscMatrix::new(2 * n, 2 * n, vec![0; 2 * n + 1], Vec::new(), Vec::new());

        // Minimize -objective . (u - v)
        let mut q = vec![0.0; 2 * n];
        for (i, c) in form.objective.iter().enumerate() {
            q[i] = -c;
            q[n + i] = *c;
        }

        let cones = [
            SupportedConeT::ZeroConeT(equalities),
            SupportedConeT::NonnegativeConeT(m - equalities),
        ];

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.max_iterations)
            .verbose(false)
            .build()
            .map_err(|e| SolverError::Numerical(format!("failed to build settings: {e}")))?;

        let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
            .map_err(|e| SolverError::Numerical(format!("failed to create solver: {e:?}")))?;

        solver.solve();

        match &solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {}
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                return Err(SolverError::Infeasible(format!(
                    "solver reported {:?}",
                    solver.solution.status
                )));
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                return Err(SolverError::Unbounded);
            }
            SolverStatus::MaxIterations => {
                return Err(SolverError::IterationLimit(self.max_iterations as usize));
            }
            status => {
                return Err(SolverError::Numerical(format!(
                    "optimization failed with status: {status:?}"
                )));
            }
        }

        let x = &solver.solution.x;
        let weights = problem
            .instruments
            .iter()
            .enumerate()
            .map(|(i, instrument)| {
                let w = x[i] - x[n + i];
                let w = if w.abs() < ZERO_WEIGHT { 0.0 } else { w };
                (instrument.clone(), w)
            })
            .collect();

        debug!(
            instruments = n,
            rows = m,
            iterations = solver.solution.iterations,
            objective = -solver.solution.obj_val,
            "Portfolio LP solved"
        );

        Ok(TargetWeights { weights })
    }
}

/// One row over `x = [u, v]`: `a . x = b` or `a . x <= b`.
struct Row {
    entries: Vec<(usize, f64)>,
    rhs: f64,
    equality: bool,
}

/// Constraint rows, stacked equalities first to match the cone order.
struct ConstraintRows {
    variables: usize,
    rows: Vec<Row>,
}

impl ConstraintRows {
    fn new(variables: usize) -> Self {
        Self {
            variables,
            rows: Vec::new(),
        }
    }

    fn push(&mut self, entries: impl IntoIterator<Item = (usize, f64)>, rhs: f64, equality: bool) {
        self.rows.push(Row {
            entries: entries.into_iter().filter(|(_, v)| *v != 0.0).collect(),
            rhs,
            equality,
        });
    }

    /// `coefficients . w` expanded over `u` and `v`, scaled.
    fn weight_entries(coefficients: &[f64], scale: f64) -> Vec<(usize, f64)> {
        let n = coefficients.len();
        coefficients
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != 0.0)
            .flat_map(|(i, c)| [(i, scale * c), (n + i, -scale * c)])
            .collect()
    }

    /// `lower <= coefficients . w <= upper`, skipping infinite sides.
    fn push_band(&mut self, coefficients: &[f64], lower: f64, upper: f64) {
        if lower == upper {
            self.push(Self::weight_entries(coefficients, 1.0), upper, true);
            return;
        }
        if upper.is_finite() {
            self.push(Self::weight_entries(coefficients, 1.0), upper, false);
        }
        if lower.is_finite() {
            self.push(Self::weight_entries(coefficients, -1.0), -lower, false);
        }
    }

    fn equality_count(&self) -> usize {
        self.rows.iter().filter(|r| r.equality).count()
    }

    fn rhs(&self) -> Vec<f64> {
        self.ordered().map(|r| r.rhs).collect()
    }

    fn ordered(&self) -> impl Iterator<Item = &Row> {
        self.rows
            .iter()
            .filter(|r| r.equality)
            .chain(self.rows.iter().filter(|r| !r.equality))
    }

    /// Column-major entries; row indices ascend within each column.
    fn columns(&self) -> Vec<Vec<(usize, f64)>> {
        let mut columns = vec![Vec::new(); self.variables];
        for (row, r) in self.ordered().enumerate() {
            for (column, value) in &r.entries {
                columns[*column].push((row, *value));
            }
        }
        columns
    }

    fn matrix(&self) -> clarabel::algebra::CscMatrix<f64> {
        let mut colptr = Vec::with_capacity(self.variables + 1);
        let mut rowval = Vec::new();
        let mut nzval = Vec::new();

        colptr.push(0);
        for column in self.columns() {
            for (row, value) in column {
                rowval.push(row);
                nzval.push(value);
            }
            colptr.push(rowval.len());
        }

        clarabel::algebra::CscMatrix::new(self.rows.len(), self.variables, colptr, rowval, nzval)
    }
}

fn constraint_rows(form: &LinearForm) -> ConstraintRows {
    let n = form.objective.len();
    let mut rows = ConstraintRows::new(2 * n);

    // u, v >= 0
    for j in 0..2 * n {
        rows.push([(j, -1.0)], 0.0, false);
    }

    let mut unit = vec![0.0; n];
    for i in 0..n {
        unit[i] = 1.0;
        rows.push_band(&unit, form.lower[i], form.upper[i]);
        unit[i] = 0.0;
    }

    for band in &form.bands {
        rows.push_band(&band.coefficients, band.lower, band.upper);
    }

    if let Some(cap) = form.gross_cap {
        rows.push((0..2 * n).map(|j| (j, 1.0)), cap, false);
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{GroupId, Instrument};
    use crate::solver::PortfolioConstraint;
    use ndarray::{array, Array1};

    const TOLERANCE: f64 = 1e-6;

    fn instruments(names: &[&str]) -> Vec<Instrument> {
        names.iter().map(|n| Instrument::from(*n)).collect()
    }

    #[test]
    fn test_long_short_pair() {
        let problem = PortfolioProblem {
            instruments: instruments(&["A", "B"]),
            objective: array![1.0, -1.0],
            constraints: vec![
                PortfolioConstraint::PositionConcentration { min: -1.0, max: 1.0 },
                PortfolioConstraint::MaxGrossExposure(1.0),
                PortfolioConstraint::DollarNeutral { tolerance: 0.0 },
            ],
        };

        let weights = ClarabelOptimizer::default().solve(&problem).unwrap();
        assert!((weights.get(&"A".into()) - 0.5).abs() < TOLERANCE);
        assert!((weights.get(&"B".into()) + 0.5).abs() < TOLERANCE);
    }

    #[test]
    fn test_concentration_binds() {
        let problem = PortfolioProblem {
            instruments: instruments(&["A", "B", "C", "D"]),
            objective: array![4.0, 3.0, -1.0, -2.0],
            constraints: vec![
                PortfolioConstraint::PositionConcentration { min: -0.3, max: 0.3 },
                PortfolioConstraint::MaxGrossExposure(1.0),
                PortfolioConstraint::DollarNeutral { tolerance: 0.0001 },
            ],
        };

        let weights = ClarabelOptimizer::default().solve(&problem).unwrap();
        for w in weights.weights.values() {
            assert!(w.abs() <= 0.3 + TOLERANCE);
        }
        assert!(weights.gross() <= 1.0 + TOLERANCE);
        assert!(weights.net().abs() <= 0.0001 + TOLERANCE);
        assert!(weights.get(&"A".into()) > 0.29);
        assert!(weights.get(&"D".into()) < -0.29);
    }

    #[test]
    fn test_group_and_factor_neutral() {
        let problem = PortfolioProblem {
            instruments: instruments(&["A", "B", "C", "D"]),
            objective: array![1.0, -1.0, 2.0, -0.5],
            constraints: vec![
                PortfolioConstraint::PositionConcentration { min: -0.5, max: 0.5 },
                PortfolioConstraint::MaxGrossExposure(1.0),
                PortfolioConstraint::FactorExposure {
                    loadings: array![[1.0, 0.0], [1.0, 0.0], [0.0, 2.0], [0.0, 1.0]],
                    min: vec![-0.01, -0.01],
                    max: vec![0.01, 0.01],
                },
                PortfolioConstraint::NetPartitionExposure {
                    labels: vec![
                        GroupId::from("G1"),
                        GroupId::from("G1"),
                        GroupId::from("G2"),
                        GroupId::from("G2"),
                    ],
                    min: -0.0001,
                    max: 0.0001,
                },
            ],
        };

        let weights = ClarabelOptimizer::default().solve(&problem).unwrap();
        let w = |s: &str| weights.get(&s.into());
        assert!((w("A") + w("B")).abs() <= 0.0001 + TOLERANCE);
        assert!((w("C") + w("D")).abs() <= 0.0001 + TOLERANCE);
        assert!((2.0 * w("C") + w("D")).abs() <= 0.01 + TOLERANCE);
        assert!(weights.gross() <= 1.0 + TOLERANCE);
        // Pair A/B carries the objective
        assert!(w("A") > 0.4);
    }

    #[test]
    fn test_jointly_infeasible_bands() {
        let problem = PortfolioProblem {
            instruments: instruments(&["A", "B"]),
            objective: array![1.0, 1.0],
            constraints: vec![
                PortfolioConstraint::PositionConcentration { min: -0.1, max: 0.1 },
                PortfolioConstraint::FactorExposure {
                    loadings: array![[1.0], [1.0]],
                    min: vec![0.5],
                    max: vec![0.6],
                },
            ],
        };

        let result = ClarabelOptimizer::default().solve(&problem);
        assert!(matches!(result, Err(SolverError::Infeasible(_))));
    }

    #[test]
    fn test_unbounded_without_limits() {
        let problem = PortfolioProblem {
            instruments: instruments(&["A"]),
            objective: array![1.0],
            constraints: vec![],
        };
        assert_eq!(
            ClarabelOptimizer::default().solve(&problem),
            Err(SolverError::Unbounded)
        );
    }

    #[test]
    fn test_empty_problem() {
        let problem = PortfolioProblem {
            instruments: vec![],
            objective: Array1::zeros(0),
            constraints: vec![PortfolioConstraint::MaxGrossExposure(1.0)],
        };
        let weights = ClarabelOptimizer::default().solve(&problem).unwrap();
        assert!(weights.weights.is_empty());
    }

    #[test]
    fn test_rows_skip_infinite_sides() {
        let form = PortfolioProblem {
            instruments: instruments(&["A", "B"]),
            objective: array![1.0, -1.0],
            constraints: vec![
                PortfolioConstraint::MaxGrossExposure(1.0),
                PortfolioConstraint::DollarNeutral { tolerance: 0.01 },
            ],
        }
        .linear_form()
        .unwrap();

        let rows = constraint_rows(&form);
        // 4 sign rows, 2 dollar-neutral sides, 1 gross cap; no position bounds
        assert_eq!(rows.equality_count(), 0);
        assert_eq!(rows.rhs(), vec![0.0, 0.0, 0.0, 0.0, 0.01, 0.01, 1.0]);
        let columns = rows.columns();
        assert_eq!(columns[0], vec![(0, -1.0), (4, 1.0), (5, -1.0), (6, 1.0)]);
        assert_eq!(columns[3], vec![(3, -1.0), (4, -1.0), (5, 1.0), (6, 1.0)]);
    }

    #[test]
    fn test_equal_sides_stacked_first() {
        let form = PortfolioProblem {
            instruments: instruments(&["A", "B"]),
            objective: array![1.0, -1.0],
            constraints: vec![
                PortfolioConstraint::MaxGrossExposure(1.0),
                PortfolioConstraint::DollarNeutral { tolerance: 0.0 },
            ],
        }
        .linear_form()
        .unwrap();

        let rows = constraint_rows(&form);
        assert_eq!(rows.equality_count(), 1);
        assert_eq!(rows.rhs(), vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows.columns()[2], vec![(0, -1.0), (3, -1.0), (5, 1.0)]);
    }
}

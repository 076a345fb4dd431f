//! Constrained portfolio optimization.
//!
//! The strategy describes a target portfolio as a [`PortfolioProblem`]
//! (linear objective plus exposure constraints) and hands it to a
//! [`ConstrainedOptimizer`]. [`ClarabelOptimizer`] is the built-in solver.

mod lp;

pub use lp::ClarabelOptimizer;

use crate::error::SolverError;
use crate::market::{GroupId, Instrument};
use ndarray::{Array1, Array2};
use std::collections::HashMap;

/// A constraint on the weight vector `w` (one weight per problem instrument).
#[derive(Debug, Clone)]
pub enum PortfolioConstraint {
    /// `min[f] <= loadings[:, f] . w <= max[f]` for every column `f`
    FactorExposure {
        loadings: Array2<f64>,
        min: Vec<f64>,
        max: Vec<f64>,
    },
    /// `min <= w_i <= max` for every instrument
    PositionConcentration { min: f64, max: f64 },
    /// `sum |w_i| <= cap`
    MaxGrossExposure(f64),
    /// `-tolerance <= sum w_i <= tolerance`
    DollarNeutral { tolerance: f64 },
    /// `min <= sum_{i in g} w_i <= max` for every label `g`; labels align with instruments
    NetPartitionExposure {
        labels: Vec<GroupId>,
        min: f64,
        max: f64,
    },
}

/// Maximize `objective . w` subject to `constraints`.
#[derive(Debug, Clone)]
pub struct PortfolioProblem {
    pub instruments: Vec<Instrument>,
    pub objective: Array1<f64>,
    pub constraints: Vec<PortfolioConstraint>,
}

/// `lower <= coefficients . w <= upper`; either side may be infinite.
#[derive(Debug, Clone)]
pub(crate) struct LinearBand {
    pub coefficients: Vec<f64>,
    pub lower: f64,
    pub upper: f64,
}

/// Problem flattened into variable bounds, linear bands and a gross cap.
#[derive(Debug, Clone)]
pub(crate) struct LinearForm {
    pub objective: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub bands: Vec<LinearBand>,
    pub gross_cap: Option<f64>,
}

impl PortfolioProblem {
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Check dimensions and reject contradictory bounds before solving.
    pub(crate) fn linear_form(&self) -> Result<LinearForm, SolverError> {
        let n = self.instruments.len();
        if self.objective.len() != n {
            return Err(SolverError::Dimension {
                what: "objective",
                expected: n,
                actual: self.objective.len(),
            });
        }

        let mut form = LinearForm {
            objective: self.objective.to_vec(),
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
            bands: Vec::new(),
            gross_cap: None,
        };

        for constraint in &self.constraints {
            match constraint {
                PortfolioConstraint::FactorExposure { loadings, min, max } => {
                    if loadings.nrows() != n {
                        return Err(SolverError::Dimension {
                            what: "factor loadings",
                            expected: n,
                            actual: loadings.nrows(),
                        });
                    }
                    let k = loadings.ncols();
                    if min.len() != k || max.len() != k {
                        return Err(SolverError::Dimension {
                            what: "factor exposure bounds",
                            expected: k,
                            actual: min.len().min(max.len()),
                        });
                    }
                    for f in 0..k {
                        check_band("factor exposure", f, min[f], max[f])?;
                        form.bands.push(LinearBand {
                            coefficients: loadings.column(f).to_vec(),
                            lower: min[f],
                            upper: max[f],
                        });
                    }
                }
                PortfolioConstraint::PositionConcentration { min, max } => {
                    check_band("position concentration", 0, *min, *max)?;
                    for i in 0..n {
                        form.lower[i] = form.lower[i].max(*min);
                        form.upper[i] = form.upper[i].min(*max);
                    }
                }
                PortfolioConstraint::MaxGrossExposure(cap) => {
                    if *cap < 0.0 {
                        return Err(SolverError::Infeasible(format!(
                            "gross exposure cap {cap} is negative"
                        )));
                    }
                    form.gross_cap = Some(form.gross_cap.map_or(*cap, |c| c.min(*cap)));
                }
                PortfolioConstraint::DollarNeutral { tolerance } => {
                    check_band("dollar neutral", 0, -tolerance, *tolerance)?;
                    form.bands.push(LinearBand {
                        coefficients: vec![1.0; n],
                        lower: -tolerance,
                        upper: *tolerance,
                    });
                }
                PortfolioConstraint::NetPartitionExposure { labels, min, max } => {
                    if labels.len() != n {
                        return Err(SolverError::Dimension {
                            what: "partition labels",
                            expected: n,
                            actual: labels.len(),
                        });
                    }
                    let mut distinct: Vec<&GroupId> = labels.iter().collect();
                    distinct.sort();
                    distinct.dedup();
                    for (g, label) in distinct.into_iter().enumerate() {
                        check_band("net partition exposure", g, *min, *max)?;
                        form.bands.push(LinearBand {
                            coefficients: labels
                                .iter()
                                .map(|l| if l == label { 1.0 } else { 0.0 })
                                .collect(),
                            lower: *min,
                            upper: *max,
                        });
                    }
                }
            }
        }

        for i in 0..n {
            check_band("position bounds", i, form.lower[i], form.upper[i])?;
        }

        Ok(form)
    }
}

fn check_band(what: &str, index: usize, min: f64, max: f64) -> Result<(), SolverError> {
    if min.is_nan() || max.is_nan() || min > max {
        return Err(SolverError::Infeasible(format!(
            "{what} bound {index}: min {min} exceeds max {max}"
        )));
    }
    Ok(())
}

/// Target weight per instrument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetWeights {
    pub weights: HashMap<Instrument, f64>,
}

impl TargetWeights {
    pub fn get(&self, instrument: &Instrument) -> f64 {
        self.weights.get(instrument).copied().unwrap_or(0.0)
    }

    pub fn gross(&self) -> f64 {
        self.weights.values().map(|w| w.abs()).sum()
    }

    pub fn net(&self) -> f64 {
        self.weights.values().sum()
    }
}

/// External constrained optimizer.
pub trait ConstrainedOptimizer: Send + Sync {
    /// Solve `problem`, failing with [`SolverError::Infeasible`] when the
    /// constraints cannot be jointly satisfied.
    fn solve(&self, problem: &PortfolioProblem) -> Result<TargetWeights, SolverError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn problem(constraints: Vec<PortfolioConstraint>) -> PortfolioProblem {
        PortfolioProblem {
            instruments: vec![Instrument::from("A"), Instrument::from("B")],
            objective: array![1.0, -1.0],
            constraints,
        }
    }

    #[test]
    fn test_contradictory_factor_band_infeasible() {
        let p = problem(vec![PortfolioConstraint::FactorExposure {
            loadings: array![[1.0], [0.5]],
            min: vec![0.02],
            max: vec![0.01],
        }]);
        assert!(matches!(p.linear_form(), Err(SolverError::Infeasible(_))));
    }

    #[test]
    fn test_dimension_mismatch() {
        let p = problem(vec![PortfolioConstraint::NetPartitionExposure {
            labels: vec![GroupId::from("X")],
            min: -0.1,
            max: 0.1,
        }]);
        assert!(matches!(p.linear_form(), Err(SolverError::Dimension { .. })));
    }

    #[test]
    fn test_partition_bands_per_label() {
        let p = PortfolioProblem {
            instruments: vec!["A".into(), "B".into(), "C".into()],
            objective: array![1.0, 0.0, -1.0],
            constraints: vec![PortfolioConstraint::NetPartitionExposure {
                labels: vec!["X".into(), "Y".into(), "X".into()],
                min: -0.1,
                max: 0.1,
            }],
        };
        let form = p.linear_form().unwrap();
        assert_eq!(form.bands.len(), 2);
        assert_eq!(form.bands[0].coefficients, vec![1.0, 0.0, 1.0]);
        assert_eq!(form.bands[1].coefficients, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_position_bounds_intersect() {
        let p = problem(vec![
            PortfolioConstraint::PositionConcentration { min: -0.5, max: 0.5 },
            PortfolioConstraint::PositionConcentration { min: -0.2, max: 0.8 },
        ]);
        let form = p.linear_form().unwrap();
        assert_eq!(form.lower, vec![-0.2, -0.2]);
        assert_eq!(form.upper, vec![0.5, 0.5]);
    }
}

//! Translation of assembled alpha and exposures into a portfolio problem.

use crate::config::OptimizerConfig;
use crate::error::SolverError;
use crate::model::AssembledPortfolioInput;
use crate::solver::{ConstrainedOptimizer, PortfolioConstraint, PortfolioProblem, TargetWeights};
use ndarray::Array1;
use tracing::{debug, info, warn};

/// Builds the objective and constraint set for one rebalance and asks a
/// [`ConstrainedOptimizer`] for target weights.
///
/// # Sign convention
///
/// The objective coefficient of every instrument is `-alpha`. A high
/// z-scored residual means the instrument outran its factors over the last
/// period, so the optimizer leans short on it and long on laggards. This
/// contrarian sign is intentional and must be preserved.
pub struct OptimizerAdapter {
    config: OptimizerConfig,
}

impl OptimizerAdapter {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Objective plus factor, concentration, gross, dollar and group constraints.
    pub fn build_problem(&self, input: &AssembledPortfolioInput) -> PortfolioProblem {
        let m = input.len();
        let k = input.factor_count();
        let objective: Array1<f64> = input.alpha.mapv(|a| -a);

        let per_name = if m == 0 {
            0.0
        } else {
            self.config.position_leverage / m as f64
        };

        let labels = input
            .universe
            .iter()
            .filter_map(|instrument| input.group_of.get(instrument).cloned())
            .collect();

        let mut constraints = Vec::with_capacity(5);
        if k > 0 {
            constraints.push(PortfolioConstraint::FactorExposure {
                loadings: input.exposures.clone(),
                min: vec![self.config.factor_exposure_min; k],
                max: vec![self.config.factor_exposure_max; k],
            });
        }
        constraints.push(PortfolioConstraint::PositionConcentration {
            min: -per_name,
            max: per_name,
        });
        constraints.push(PortfolioConstraint::MaxGrossExposure(
            self.config.max_gross_exposure,
        ));
        constraints.push(PortfolioConstraint::DollarNeutral {
            tolerance: self.config.dollar_neutral_tolerance,
        });
        constraints.push(PortfolioConstraint::NetPartitionExposure {
            labels,
            min: self.config.group_neutral_min,
            max: self.config.group_neutral_max,
        });

        debug!(
            instruments = m,
            factors = k,
            per_name_bound = per_name,
            "Built portfolio problem"
        );

        PortfolioProblem {
            instruments: input.universe.clone(),
            objective,
            constraints,
        }
    }

    /// Solve for target weights. Does not place orders.
    pub fn allocate(
        &self,
        input: &AssembledPortfolioInput,
        optimizer: &dyn ConstrainedOptimizer,
    ) -> Result<TargetWeights, SolverError> {
        if input.is_empty() {
            return Ok(TargetWeights::default());
        }

        let problem = self.build_problem(input);
        match optimizer.solve(&problem) {
            Ok(weights) => {
                info!(
                    instruments = problem.len(),
                    gross = weights.gross(),
                    net = weights.net(),
                    "Target allocation computed"
                );
                Ok(weights)
            }
            Err(e) => {
                warn!(error = %e, instruments = problem.len(), "Optimizer failed, no allocation");
                Err(e)
            }
        }
    }
}

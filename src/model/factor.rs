//! Per-group statistical factor model.
//!
//! Turns one group's daily closes into factor loadings (beta) and a
//! cross-sectional idiosyncratic return signal (alpha):
//!
//! 1. log returns of the closes
//! 2. principal components of the returns, as many as needed to reach the
//!    configured share of explained variance
//! 3. OLS of each instrument's returns on the components (with intercept)
//! 4. inverse-variance weighted regression of the latest cross-section on
//!    the loadings; the residuals, z-scored, are the alpha

use crate::config::FactorModelConfig;
use crate::error::FitError;
use crate::market::{Instrument, PriceHistory};
use crate::utils::linalg::{solve, symmetric_eigen};
use crate::utils::stats::{center_columns, column_variance, zscore};
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, Axis};
use std::collections::HashSet;
use tracing::debug;

/// Minimum number of return observations for a fit.
const MIN_OBSERVATIONS: usize = 3;

/// Relative eigenvalue below which a component is treated as noise.
const RANK_TOLERANCE: f64 = 1e-10;

/// Output of one group's fit. Rows of `alpha` and `beta` follow `instruments`.
#[derive(Debug, Clone)]
pub struct FactorFit {
    pub instruments: Vec<Instrument>,
    /// Z-scored idiosyncratic residual per instrument
    pub alpha: Array1<f64>,
    /// Loadings, rows = instruments, columns = latent factors
    pub beta: Array2<f64>,
    /// Share of return variance captured by the kept factors
    pub explained_variance: f64,
}

impl FactorFit {
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn factor_count(&self) -> usize {
        self.beta.ncols()
    }
}

/// Latent factor scores extracted from a return matrix.
struct LatentFactors {
    /// Rows = time steps, columns = components
    scores: Array2<f64>,
    explained_variance: f64,
}

/// Fits the factor model for one group at a time.
pub struct FactorModelFitter {
    config: FactorModelConfig,
}

impl FactorModelFitter {
    pub fn new(config: FactorModelConfig) -> Self {
        Self { config }
    }

    /// Fit on the eligible, gap-free columns of `history`.
    ///
    /// Instruments outside `eligible` are dropped even when prices exist.
    pub fn fit(
        &self,
        history: &PriceHistory,
        eligible: &HashSet<Instrument>,
    ) -> Result<FactorFit, FitError> {
        let prices = history.retain_complete(|instrument| eligible.contains(instrument));

        debug!(
            requested = history.width(),
            surviving = prices.width(),
            days = prices.days(),
            "Filtered price history"
        );

        self.fit_prices(&prices)
    }

    /// Fit on a history that is already filtered and gap-free.
    pub fn fit_prices(&self, prices: &PriceHistory) -> Result<FactorFit, FitError> {
        let n = prices.width();
        if n < self.config.min_group_size {
            return Err(FitError::TooFewInstruments {
                found: n,
                required: self.config.min_group_size,
            });
        }

        let returns = log_returns(prices.closes());
        if returns.nrows() < MIN_OBSERVATIONS {
            return Err(FitError::TooFewObservations {
                found: returns.nrows(),
                required: MIN_OBSERVATIONS,
            });
        }
        if returns.iter().any(|r| !r.is_finite()) {
            return Err(FitError::NonFinite("log returns"));
        }

        let variance = column_variance(&returns);
        if let Some(j) = variance.iter().position(|v| *v <= f64::EPSILON * f64::EPSILON) {
            return Err(FitError::ZeroVariance {
                instrument: prices.instruments()[j].clone(),
            });
        }

        let factors = self.latent_factors(&returns)?;
        let beta = factor_loadings(&returns, &factors.scores)?;
        let latest = returns.row(returns.nrows() - 1);
        let residuals = weighted_residuals(latest, &beta, &variance)?;
        let alpha = zscore(&residuals).ok_or(FitError::DegenerateResiduals)?;

        debug!(
            instruments = n,
            factors = beta.ncols(),
            explained = factors.explained_variance,
            "Factor model fitted"
        );

        Ok(FactorFit {
            instruments: prices.instruments().to_vec(),
            alpha,
            beta,
            explained_variance: factors.explained_variance,
        })
    }

    /// Principal component scores of the returns.
    ///
    /// Decomposes whichever of the covariance (n x n) or Gram (t x t)
    /// matrix is smaller; both give the same nonzero spectrum.
    fn latent_factors(&self, returns: &Array2<f64>) -> Result<LatentFactors, FitError> {
        let (t, n) = returns.dim();
        let centered = center_columns(returns);

        let (values, scores_basis) = if n <= t {
            let (values, vectors) = symmetric_eigen(&centered.t().dot(&centered));
            (values, centered.dot(&vectors))
        } else {
            let (values, vectors) = symmetric_eigen(&centered.dot(&centered.t()));
            let scaled = &vectors * &values.mapv(|v| v.max(0.0).sqrt());
            (values, scaled)
        };

        let values = values.mapv(|v| v.max(0.0));
        let total: f64 = values.sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(FitError::Singular("principal components"));
        }

        let rank = values
            .iter()
            .take_while(|v| **v > RANK_TOLERANCE * values[0])
            .count();
        let k = self.component_count(&values, total, rank, n);
        if k == 0 {
            return Err(FitError::Singular("principal components"));
        }

        let explained_variance = values.slice(s![..k]).sum() / total;
        Ok(LatentFactors {
            scores: scores_basis.slice(s![.., ..k]).to_owned(),
            explained_variance,
        })
    }

    /// Smallest k reaching the variance threshold, clamped to the configured
    /// bounds, the numerical rank, and `n - 1` so residuals keep a degree of freedom.
    fn component_count(&self, values: &Array1<f64>, total: f64, rank: usize, n: usize) -> usize {
        let mut cumulative = 0.0;
        let mut k = values.len();
        for (i, v) in values.iter().enumerate() {
            cumulative += v / total;
            if cumulative + 1e-12 >= self.config.variance_threshold {
                k = i + 1;
                break;
            }
        }

        let mut k = k.max(self.config.min_components);
        if let Some(max) = self.config.max_components {
            k = k.min(max);
        }
        k.min(rank).min(n.saturating_sub(1))
    }
}

/// First difference of log prices along time.
fn log_returns(closes: &Array2<f64>) -> Array2<f64> {
    let logs = closes.mapv(f64::ln);
    if logs.nrows() < 2 {
        return Array2::zeros((0, logs.ncols()));
    }
    &logs.slice(s![1.., ..]) - &logs.slice(s![..-1, ..])
}

/// OLS of each return column on `[1, factors]`; intercept dropped.
fn factor_loadings(returns: &Array2<f64>, factors: &Array2<f64>) -> Result<Array2<f64>, FitError> {
    let ones = Array2::<f64>::ones((factors.nrows(), 1));
    let design = concatenate(Axis(1), &[ones.view(), factors.view()])
        .map_err(|_| FitError::Singular("factor design matrix"))?;

    let gram = design.t().dot(&design);
    let rhs = design.t().dot(returns);
    let coefficients = solve(&gram, &rhs).ok_or(FitError::Singular("factor loadings"))?;

    let beta = coefficients.slice(s![1.., ..]).t().to_owned();
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(FitError::NonFinite("factor loadings"));
    }
    Ok(beta)
}

/// Residuals of the latest cross-section regressed on the loadings,
/// weighting each instrument by the inverse of its return variance.
fn weighted_residuals(
    latest: ArrayView1<f64>,
    beta: &Array2<f64>,
    variance: &Array1<f64>,
) -> Result<Array1<f64>, FitError> {
    let weights = variance.mapv(|v| 1.0 / v);
    let weighted_beta = beta * &weights.view().insert_axis(Axis(1));

    let gram = weighted_beta.t().dot(beta);
    let rhs = weighted_beta.t().dot(&latest).insert_axis(Axis(1));
    let coefficients = solve(&gram, &rhs).ok_or(FitError::Singular("cross-sectional regression"))?;

    let fitted = beta.dot(&coefficients.column(0));
    let residuals = &latest - &fitted;
    if residuals.iter().any(|r| !r.is_finite()) {
        return Err(FitError::NonFinite("cross-sectional residuals"));
    }
    Ok(residuals)
}

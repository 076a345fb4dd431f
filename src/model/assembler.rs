//! Merges per-group factor fits into one universe-wide optimizer input.

use super::factor::FactorFit;
use crate::market::{GroupId, Instrument};
use ndarray::{s, Array1, Array2};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Universe-wide alpha and block-diagonal exposures.
#[derive(Debug, Clone)]
pub struct AssembledPortfolioInput {
    /// Instruments in group order, each group's order preserved
    pub universe: Vec<Instrument>,
    /// Alpha aligned to `universe`
    pub alpha: Array1<f64>,
    /// Rows = `universe`, columns = every group's factors; zero off the diagonal blocks
    pub exposures: Array2<f64>,
    /// Group label of every instrument in `universe`
    pub group_of: HashMap<Instrument, GroupId>,
    /// Owning group of each exposure column
    pub factor_groups: Vec<GroupId>,
}

impl AssembledPortfolioInput {
    pub fn len(&self) -> usize {
        self.universe.len()
    }

    pub fn is_empty(&self) -> bool {
        self.universe.is_empty()
    }

    pub fn factor_count(&self) -> usize {
        self.exposures.ncols()
    }
}

/// Concatenates fits and places each group's beta in its own block.
pub struct PortfolioAssembler;

impl PortfolioAssembler {
    /// Assemble fits in the order given.
    ///
    /// Block-diagonal placement keeps one group's latent factors from loading
    /// on another group's instruments.
    pub fn assemble(fits: &[(GroupId, FactorFit)]) -> AssembledPortfolioInput {
        let rows: usize = fits.iter().map(|(_, fit)| fit.len()).sum();
        let cols: usize = fits.iter().map(|(_, fit)| fit.factor_count()).sum();

        let mut universe = Vec::with_capacity(rows);
        let mut alpha = Array1::<f64>::zeros(rows);
        let mut exposures = Array2::<f64>::zeros((rows, cols));
        let mut group_of = HashMap::with_capacity(rows);
        let mut factor_groups = Vec::with_capacity(cols);

        let (mut row, mut col) = (0, 0);
        for (group, fit) in fits {
            let (n, k) = (fit.len(), fit.factor_count());

            alpha.slice_mut(s![row..row + n]).assign(&fit.alpha);
            exposures
                .slice_mut(s![row..row + n, col..col + k])
                .assign(&fit.beta);

            for instrument in &fit.instruments {
                if let Some(previous) = group_of.insert(instrument.clone(), group.clone()) {
                    warn!(
                        %instrument,
                        %previous,
                        current = %group,
                        "Instrument assigned to more than one group"
                    );
                }
                universe.push(instrument.clone());
            }
            factor_groups.extend(std::iter::repeat(group.clone()).take(k));

            debug!(%group, instruments = n, factors = k, "Group placed in exposure matrix");
            row += n;
            col += k;
        }

        AssembledPortfolioInput {
            universe,
            alpha,
            exposures,
            group_of,
            factor_groups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fit(names: &[&str], alpha: Array1<f64>, beta: Array2<f64>) -> FactorFit {
        FactorFit {
            instruments: names.iter().map(|n| Instrument::from(*n)).collect(),
            alpha,
            beta,
            explained_variance: 0.95,
        }
    }

    fn two_groups() -> Vec<(GroupId, FactorFit)> {
        vec![
            (
                GroupId::from("ENERGY"),
                fit(
                    &["XOM", "CVX", "COP"],
                    array![1.0, -0.5, -0.5],
                    array![[0.3], [0.4], [0.5]],
                ),
            ),
            (
                GroupId::from("TECH"),
                fit(
                    &["AAPL", "MSFT"],
                    array![1.0, -1.0],
                    array![[0.1, 0.2], [0.3, 0.4]],
                ),
            ),
        ]
    }

    #[test]
    fn test_two_groups_block_diagonal() {
        let assembled = PortfolioAssembler::assemble(&two_groups());

        assert_eq!(assembled.exposures.dim(), (5, 3));
        assert_eq!(assembled.len(), 5);
        assert_eq!(assembled.alpha, array![1.0, -0.5, -0.5, 1.0, -1.0]);

        // Off-block entries are zero
        for r in 0..3 {
            for c in 1..3 {
                assert_eq!(assembled.exposures[[r, c]], 0.0);
            }
        }
        for r in 3..5 {
            assert_eq!(assembled.exposures[[r, 0]], 0.0);
        }
        // Structural positions carry the group betas
        assert_eq!(assembled.exposures[[2, 0]], 0.5);
        assert_eq!(assembled.exposures[[4, 2]], 0.4);

        let structural: usize = assembled
            .universe
            .iter()
            .map(|inst| {
                let group = &assembled.group_of[inst];
                assembled.factor_groups.iter().filter(|g| *g == group).count()
            })
            .sum();
        assert_eq!(structural, 3 * 1 + 2 * 2);
    }

    #[test]
    fn test_cross_group_positions_zero_by_label() {
        let assembled = PortfolioAssembler::assemble(&two_groups());
        for (r, instrument) in assembled.universe.iter().enumerate() {
            for (c, owner) in assembled.factor_groups.iter().enumerate() {
                if assembled.group_of[instrument] != *owner {
                    assert_eq!(assembled.exposures[[r, c]], 0.0);
                }
            }
        }
    }

    #[test]
    fn test_group_labels_emitted() {
        let assembled = PortfolioAssembler::assemble(&two_groups());
        assert_eq!(assembled.group_of[&Instrument::from("CVX")], GroupId::from("ENERGY"));
        assert_eq!(assembled.group_of[&Instrument::from("MSFT")], GroupId::from("TECH"));
        assert_eq!(assembled.group_of.len(), 5);
    }

    #[test]
    fn test_zero_groups() {
        let assembled = PortfolioAssembler::assemble(&[]);
        assert!(assembled.is_empty());
        assert_eq!(assembled.exposures.dim(), (0, 0));
        assert_eq!(assembled.factor_count(), 0);
    }

    #[test]
    fn test_single_group_passthrough() {
        let groups = two_groups();
        let single = vec![groups[1].clone()];
        let assembled = PortfolioAssembler::assemble(&single);
        assert_eq!(assembled.exposures, array![[0.1, 0.2], [0.3, 0.4]]);
        assert_eq!(assembled.alpha, array![1.0, -1.0]);
    }
}

//! Statistical model layer.
//!
//! - `factor`: per-group PCA factor model producing alpha and beta
//! - `assembler`: block-diagonal merge of all groups' fits

mod assembler;
mod factor;

pub use assembler::{AssembledPortfolioInput, PortfolioAssembler};
pub use factor::{FactorFit, FactorModelFitter};

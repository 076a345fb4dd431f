//! Shared numeric utilities.

pub mod decimal;
pub mod linalg;
pub mod stats;

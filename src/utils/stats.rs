//! Sample statistics used by the factor model.

use ndarray::{Array1, Array2, Axis};

/// Population variance (ddof = 0) of every column.
pub fn column_variance(x: &Array2<f64>) -> Array1<f64> {
    if x.nrows() == 0 {
        return Array1::zeros(x.ncols());
    }
    x.var_axis(Axis(0), 0.0)
}

/// Subtract each column's mean.
pub fn center_columns(x: &Array2<f64>) -> Array2<f64> {
    match x.mean_axis(Axis(0)) {
        Some(means) => x - &means,
        None => x.clone(),
    }
}

/// Standardize to zero mean and unit population standard deviation.
///
/// Returns `None` when the standard deviation is zero or not finite.
pub fn zscore(values: &Array1<f64>) -> Option<Array1<f64>> {
    let mean = values.mean()?;
    let std = values.std(0.0);
    if !std.is_finite() || std <= f64::EPSILON * mean.abs().max(1.0) {
        return None;
    }
    Some(values.mapv(|v| (v - mean) / std))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_zscore_properties() {
        let z = zscore(&array![1.0, 2.0, 3.0, 10.0]).unwrap();
        assert!(z.mean().unwrap().abs() < 1e-12);
        assert!((z.std(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zscore_constant_rejected() {
        assert!(zscore(&array![2.0, 2.0, 2.0]).is_none());
        assert!(zscore(&Array1::<f64>::zeros(0)).is_none());
    }

    #[test]
    fn test_column_variance_population() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let var = column_variance(&x);
        assert_eq!(var[0], 1.0);
        assert_eq!(var[1], 0.0);
    }

    #[test]
    fn test_center_columns() {
        let x = array![[1.0, 4.0], [3.0, 8.0]];
        let c = center_columns(&x);
        assert_eq!(c, array![[-1.0, -2.0], [1.0, 2.0]]);
    }
}

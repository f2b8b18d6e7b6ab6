//! Row-wise summary statistics over count matrices (rows = screening units,
//! columns = samples).

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, ScreenError};

/// Pseudocount geometric mean `exp(mean(ln(x + 1))) - 1`.
///
/// A single value is returned unchanged.
pub fn geometric_mean(values: ArrayView1<f64>) -> f64 {
    match values.len() {
        0 => f64::NAN,
        1 => values[0],
        n => (values.iter().map(|v| v.ln_1p()).sum::<f64>() / n as f64).exp_m1(),
    }
}

/// Geometric mean of every row.
pub fn row_geometric_means(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    if counts.ncols() == 0 {
        return Err(ScreenError::InvalidConfig {
            reason: "length of label should be at least 1".to_string(),
        });
    }
    Ok(counts.axis_iter(Axis(0)).map(geometric_mean).collect())
}

/// Unbiased sample variance; NaN with fewer than two values.
pub fn sample_variance(values: ArrayView1<f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = values.sum() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
}

pub fn row_variances(counts: ArrayView2<f64>) -> Array1<f64> {
    counts.axis_iter(Axis(0)).map(sample_variance).collect()
}

/// Median, averaging the two middle values for even lengths.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

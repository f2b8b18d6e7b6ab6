//! Mean-variance model of control replicates.
//!
//! Model: `Var = Mean + 2^b * Mean^k`, fit on the log scale as
//! `log2(Var - Mean + 1) = b + k * log2(Mean + 1)` by weighted least squares,
//! each row weighted by its geometric mean.

use ndarray::ArrayView2;
use tracing::{debug, info, warn};

use crate::analysis::stats::{row_geometric_means, row_variances};
use crate::error::Result;
use crate::models::DispersionModel;

/// Weighted simple linear regression `y = b + k * x`, returning `(k, b)`.
pub fn weighted_least_squares(x: &[f64], y: &[f64], w: &[f64]) -> (f64, f64) {
    let (mut sw, mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for ((&xi, &yi), &wi) in x.iter().zip(y).zip(w) {
        sw += wi;
        sx += wi * xi;
        sy += wi * yi;
        sxx += wi * xi * xi;
        sxy += wi * xi * yi;
    }
    let denom = sw * sxx - sx * sx;
    let k = (sw * sxy - sx * sy) / denom;
    let b = (sy * sxx - sx * sxy) / denom;
    (k, b)
}

/// Fits the model on the given replicate columns.
///
/// Only rows whose variance exceeds their geometric mean carry information
/// about over-dispersion. The result never predicts sub-Poisson variance:
/// `k >= 1`, `b >= 0`, and an unfittable input yields the Poisson floor.
pub fn fit_mean_variance(counts: ArrayView2<f64>) -> Result<DispersionModel> {
    let gm = row_geometric_means(counts)?;
    let var = row_variances(counts);

    let (mut x, mut y, mut w) = (Vec::new(), Vec::new(), Vec::new());
    for (&m, &v) in gm.iter().zip(var.iter()) {
        if m < v {
            x.push((m + 1.0).log2());
            y.push((v - m + 1.0).log2());
            w.push(m);
        }
    }
    debug!("{} of {} rows are over-dispersed", x.len(), gm.len());

    if x.len() < 2 {
        warn!("Too few over-dispersed rows to fit the mean-variance model, assuming Var = 2 * Mean");
        return Ok(DispersionModel::POISSON_FLOOR);
    }

    let (k, b) = weighted_least_squares(&x, &y, &w);
    if !k.is_finite() || !b.is_finite() {
        warn!("Mean-variance fit is degenerate, assuming Var = 2 * Mean");
        return Ok(DispersionModel::POISSON_FLOOR);
    }

    let model = DispersionModel {
        k: k.max(1.0),
        b: b.max(0.0),
    };
    info!(
        "Estimated: Var = Mean + {:.2} * Mean ^ {:.2}",
        model.alpha(),
        model.k
    );
    Ok(model)
}

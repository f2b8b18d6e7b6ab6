//! Per-sample scaling of count columns.

use ndarray::{Array1, ArrayView2, Axis};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::analysis::stats::median;
use crate::error::{Result, ScreenError};
use crate::helper_functions::count_matrix;
use crate::models::NormMethod;

/// Columns with a larger share of zero counts disable median scaling.
const MAX_ZERO_FRACTION: f64 = 0.45;

/// `mean(column sums) / column sum` for every column.
pub fn total_count_factors(counts: ArrayView2<f64>) -> Array1<f64> {
    let col_sums = counts.sum_axis(Axis(0));
    let mean_sum = col_sums.sum() / col_sums.len() as f64;
    col_sums.mapv(|s| mean_sum / s)
}

/// Median-of-ratios candidates: `1 / median(x / rowGeomean)` per column,
/// with the row geometric mean taken as `expm1(mean(ln(x + 1)))` and
/// non-positive means clamped to 1.
pub fn median_ratio_factors(counts: ArrayView2<f64>) -> Array1<f64> {
    let n_cols = counts.ncols() as f64;
    let row_gm: Vec<f64> = counts
        .axis_iter(Axis(0))
        .map(|row| {
            let gm = (row.iter().map(|v| v.ln_1p()).sum::<f64>() / n_cols).exp_m1();
            if gm > 0.0 {
                gm
            } else {
                1.0
            }
        })
        .collect();

    counts
        .axis_iter(Axis(1))
        .map(|column| {
            let mut ratios: Vec<f64> = column.iter().zip(&row_gm).map(|(x, gm)| x / gm).collect();
            1.0 / median(&mut ratios)
        })
        .collect()
}

/// Scaling factor of every column for the chosen method.
///
/// Degenerate median factors (a zero factor, or a column with too many zero
/// counts) fall back to total-count scaling.
pub fn normalization_factors(counts: ArrayView2<f64>, method: NormMethod) -> Array1<f64> {
    let total = total_count_factors(counts);
    match method {
        NormMethod::None => Array1::ones(counts.ncols()),
        NormMethod::Total => total,
        NormMethod::Median => {
            let candidates = median_ratio_factors(counts);
            let n_rows = counts.nrows() as f64;
            let too_many_zeros = counts.axis_iter(Axis(1)).any(|column| {
                column.iter().filter(|&&v| v == 0.0).count() as f64 / n_rows > MAX_ZERO_FRACTION
            });

            if candidates.iter().any(|&f| f == 0.0) {
                warn!("Median factor is zero, using total count normalization");
                total
            } else if too_many_zeros {
                warn!("Too many zeros in counts, using total count normalization");
                total
            } else {
                candidates
            }
        }
    }
}

/// Rescales the `labels` columns of `df`; every other column is kept as is.
pub fn normalize_counts(df: &DataFrame, labels: &[String], method: NormMethod) -> Result<DataFrame> {
    if labels.is_empty() {
        return Err(ScreenError::InvalidConfig {
            reason: "no sample columns to normalize".to_string(),
        });
    }
    if df.height() == 0 {
        return Err(ScreenError::InvalidCountTable {
            reason: "count table has no rows".to_string(),
        });
    }

    info!("Normalizing data ({:?})", method);
    let counts = count_matrix(df, labels)?;
    let factors = normalization_factors(counts.view(), method);
    debug!("Normalization factors: {:?}", factors);

    let mut normalized = df.clone();
    for (j, label) in labels.iter().enumerate() {
        let scaled: Vec<f64> = counts.column(j).iter().map(|v| v * factors[j]).collect();
        normalized.with_column(Column::new(label.as_str().into(), scaled))?;
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper_functions::column_f64;
    use polars::df;

    fn labels() -> Vec<String> {
        vec!["r1".to_string(), "r2".to_string()]
    }

    fn depth_biased() -> DataFrame {
        // r2 is sequenced twice as deep as r1
        df![
            "gene" => &["A", "B", "C", "D", "E"],
            "r1" => &[10.0, 40.0, 25.0, 300.0, 7.0],
            "r2" => &[20.0, 80.0, 50.0, 600.0, 14.0]
        ]
        .unwrap()
    }

    fn column_sum(df: &DataFrame, name: &str) -> f64 {
        column_f64(df, name).unwrap().iter().sum()
    }

    #[test]
    fn none_leaves_counts_untouched() {
        let df = depth_biased();
        let out = normalize_counts(&df, &labels(), NormMethod::None).unwrap();
        assert_eq!(column_sum(&out, "r1"), column_sum(&df, "r1"));
        assert_eq!(column_sum(&out, "r2"), column_sum(&df, "r2"));
        assert_eq!(column_f64(&out, "r1").unwrap(), column_f64(&df, "r1").unwrap());
    }

    #[test]
    fn median_removes_depth_bias() {
        let df = depth_biased();
        let out = normalize_counts(&df, &labels(), NormMethod::Median).unwrap();
        let r1 = column_f64(&out, "r1").unwrap();
        let r2 = column_f64(&out, "r2").unwrap();

        let before: f64 = column_f64(&df, "r2")
            .unwrap()
            .iter()
            .zip(column_f64(&df, "r1").unwrap())
            .map(|(b, a)| (b / a).ln().abs())
            .sum();
        let after: f64 = r2.iter().zip(&r1).map(|(b, a)| (b / a).ln().abs()).sum();
        assert!(after < before);
        for (a, b) in r1.iter().zip(&r2) {
            assert!((a - b).abs() / a < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn median_factors_use_pseudocount_geometric_mean() {
        let counts = ndarray::array![[1.0, 3.0], [2.0, 9.0], [10.0, 12.0]];
        let factors = median_ratio_factors(counts.view());
        // row 0 holds both column medians; its geometric mean is sqrt(2 * 4) - 1
        let gm = 8f64.sqrt() - 1.0;
        assert!((factors[0] - gm).abs() < 1e-12, "{}", factors[0]);
        assert!((factors[1] - gm / 3.0).abs() < 1e-12, "{}", factors[1]);
    }

    #[test]
    fn all_zero_row_is_clamped() {
        let counts = ndarray::array![[0.0, 0.0], [4.0, 4.0]];
        let factors = median_ratio_factors(counts.view());
        // ratios per column: [0 / 1, 4 / 4]
        for f in factors.iter() {
            assert!((f - 2.0).abs() < 1e-9, "{}", f);
        }
    }

    #[test]
    fn total_equalizes_library_sizes() {
        let out = normalize_counts(&depth_biased(), &labels(), NormMethod::Total).unwrap();
        assert!((column_sum(&out, "r1") - column_sum(&out, "r2")).abs() < 1e-9);
    }

    #[test]
    fn zero_heavy_column_falls_back_to_total_count() {
        let counts = ndarray::array![
            [10.0, 0.0],
            [20.0, 0.0],
            [30.0, 0.0],
            [40.0, 50.0],
            [50.0, 60.0]
        ];
        let factors = normalization_factors(counts.view(), NormMethod::Median);
        let total = total_count_factors(counts.view());
        assert_eq!(factors, total);
    }

    #[test]
    fn empty_labels_fail_fast() {
        let err = normalize_counts(&depth_biased(), &[], NormMethod::Median);
        assert!(matches!(err, Err(ScreenError::InvalidConfig { .. })));
    }
}

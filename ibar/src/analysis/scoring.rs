//! Per-row z-scores of treatment against the control mean-variance model.

use std::collections::HashMap;

use ndarray::Axis;
use polars::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info};

use crate::analysis::fdr::adjust_fdr;
use crate::analysis::stats::{row_geometric_means, row_variances};
use crate::error::{Result, ScreenError};
use crate::helper_functions::{column_f64, column_str, count_matrix};
use crate::models::{DispersionModel, SampleLayout};

/// Columns appended to the count table, in output order.
pub const SCORE_COLUMNS: [&str; 14] = [
    "controlmean",
    "treatmean",
    "controlvar",
    "estvar",
    "lfc",
    "lfc_bin",
    "large",
    "direction",
    "adjvar",
    "treat_z",
    "p.low",
    "p.high",
    "p.twoside",
    "fdr",
];

#[derive(Debug, Clone, Copy)]
pub struct ScoringOptions {
    /// Rows need more than `controls.len()` normalized values above this.
    pub norm_threshold: f64,
    /// Inflate the variance of guides whose barcodes disagree in direction.
    pub adjust_barcode_variance: bool,
}

/// Additive fold-change sign: `+1` above -0.1 plus `-1` below 0.1.
pub fn direction_sign(lfc: f64) -> i32 {
    let up = if lfc > -0.1 { 1 } else { 0 };
    let down = if lfc < 0.1 { -1 } else { 0 };
    up + down
}

/// Scores every row of a normalized count table, returning the table with
/// [`SCORE_COLUMNS`] appended.
pub fn score_table(
    df: &DataFrame,
    layout: &SampleLayout,
    model: &DispersionModel,
    options: &ScoringOptions,
) -> Result<DataFrame> {
    info!("Calculating means and variance of data");
    let controls = count_matrix(df, &layout.controls)?;
    let treatments = count_matrix(df, &layout.treatments)?;
    let model_counts = count_matrix(df, &layout.model_samples())?;
    let all_counts = count_matrix(df, &layout.all_samples())?;

    let control_mean = row_geometric_means(controls.view())?.to_vec();
    let treat_mean = row_geometric_means(treatments.view())?.to_vec();
    let control_var = row_variances(model_counts.view()).to_vec();
    let model_var: Vec<f64> = control_mean.iter().map(|&m| model.variance(m)).collect();

    info!("Calculating guide log2 fold change");
    let lfc: Vec<f64> = treat_mean
        .iter()
        .zip(&control_mean)
        .map(|(t, c)| (t + 1.0).log2() - (c + 1.0).log2())
        .collect();
    let lfc_sign: Vec<i32> = lfc.iter().map(|&v| direction_sign(v)).collect();

    let n_controls = layout.controls.len();
    let large: Vec<bool> = all_counts
        .axis_iter(Axis(0))
        .map(|row| row.iter().filter(|&&v| v > options.norm_threshold).count() > n_controls)
        .collect();
    let direction: Vec<i32> = lfc_sign
        .iter()
        .zip(&large)
        .map(|(&sign, &large)| sign * i32::from(large))
        .collect();

    let mut scores = df.clone();
    scores.with_column(Column::new("controlmean".into(), &control_mean))?;
    scores.with_column(Column::new("treatmean".into(), &treat_mean))?;
    let control_var_col: Vec<Option<f64>> = control_var
        .iter()
        .map(|&v| if v.is_nan() { None } else { Some(v) })
        .collect();
    scores.with_column(Column::new("controlvar".into(), control_var_col))?;
    scores.with_column(Column::new("estvar".into(), &model_var))?;
    scores.with_column(Column::new("lfc".into(), &lfc))?;
    scores.with_column(Column::new("lfc_bin".into(), lfc_sign))?;
    scores.with_column(Column::new("large".into(), large))?;
    scores.with_column(Column::new("direction".into(), direction))?;

    let adj_var: Vec<f64> = if options.adjust_barcode_variance {
        info!("Adjusting variance of data in guide level");
        let inflation = guide_variance_inflation(&scores)?;
        model_var.iter().zip(&inflation).map(|(m, extra)| m + extra).collect()
    } else {
        model_var.clone()
    };

    info!("Normalizing treatment values");
    let z: Vec<f64> = treat_mean
        .iter()
        .zip(&control_mean)
        .zip(&adj_var)
        .map(|((t, c), v)| (t - c) / v.sqrt())
        .collect();

    let normal = Normal::new(0.0, 1.0).map_err(|e| ScreenError::Distribution(e.to_string()))?;
    let p_low: Vec<f64> = z.iter().map(|&v| normal.cdf(v)).collect();
    let p_high: Vec<f64> = z.iter().map(|&v| normal.sf(v)).collect();
    let p_twoside: Vec<f64> = p_low
        .iter()
        .zip(&p_high)
        .map(|(&lo, &hi)| if lo < hi { 2.0 * lo } else { 2.0 * hi })
        .collect();
    let fdr = adjust_fdr(&p_twoside);

    scores.with_column(Column::new("adjvar".into(), adj_var))?;
    scores.with_column(Column::new("treat_z".into(), z))?;
    scores.with_column(Column::new("p.low".into(), p_low))?;
    scores.with_column(Column::new("p.high".into(), p_high))?;
    scores.with_column(Column::new("p.twoside".into(), p_twoside))?;
    scores.with_column(Column::new("fdr".into(), fdr))?;

    debug!("Score table shape: {:?}, appended {:?}", scores.shape(), SCORE_COLUMNS);
    Ok(scores)
}

/// Extra variance per row: the guide's mean control variance when its
/// barcodes point in opposite directions, zero otherwise.
fn guide_variance_inflation(scores: &DataFrame) -> Result<Vec<f64>> {
    let per_guide = scores
        .clone()
        .lazy()
        .group_by([col("guide")])
        .agg([
            col("controlvar").mean().alias("guide_var"),
            col("direction").max().alias("direction_max"),
            col("direction").min().alias("direction_min"),
        ])
        .collect()?;

    let guides = column_str(&per_guide, "guide")?;
    let guide_var = column_f64(&per_guide, "guide_var")?;
    let direction_max = column_f64(&per_guide, "direction_max")?;
    let direction_min = column_f64(&per_guide, "direction_min")?;

    let mut inflation: HashMap<String, f64> = HashMap::with_capacity(guides.len());
    let mut disagreeing = 0usize;
    for (i, guide) in guides.into_iter().enumerate() {
        let same_direction = direction_max[i] * direction_min[i] != -1.0;
        let extra = if same_direction || guide_var[i].is_nan() {
            0.0
        } else {
            disagreeing += 1;
            guide_var[i]
        };
        inflation.insert(guide, extra);
    }
    debug!("{} guides with barcodes of opposite direction", disagreeing);

    let rows = column_str(scores, "guide")?;
    Ok(rows
        .iter()
        .map(|guide| inflation.get(guide).copied().unwrap_or(0.0))
        .collect())
}

use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifier columns every count table carries, in output order.
pub const INFO_COLUMNS: [&str; 5] = ["gene", "guide", "gid", "barcode", "bid"];

/// Joins gene, guide and barcode into `gid` / `bid`.
pub const ID_DELIMITER: char = '.';

/// Anything that can produce a count table.
pub trait Dataset {
    fn load(&self) -> Result<DataFrame>;
}

/// Per-sample scaling applied before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormMethod {
    /// Counts are left untouched
    None,
    /// Median-of-ratios, falling back to total count on degenerate input
    #[default]
    Median,
    /// Scale every column to the mean library size
    Total,
}

/// Ranking direction of one aggregation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Depletion: items ranked by ascending z-score
    Low,
    /// Enrichment: items ranked by ascending negated z-score
    High,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Low, Direction::High];

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Low => "low",
            Direction::High => "high",
        }
    }

    /// Column suffix used when the two directions are merged.
    pub fn suffix(&self) -> String {
        format!(".{}", self.label())
    }
}

/// Control and treatment replicate columns of a screen.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLayout {
    pub controls: Vec<String>,
    pub treatments: Vec<String>,
}

impl SampleLayout {
    pub fn all_samples(&self) -> Vec<String> {
        self.controls.iter().chain(self.treatments.iter()).cloned().collect()
    }

    /// Columns the mean-variance model is fit on: the controls when there are
    /// replicates, every sample otherwise.
    pub fn model_samples(&self) -> Vec<String> {
        if self.controls.len() > 1 {
            self.controls.clone()
        } else {
            self.all_samples()
        }
    }
}

/// Power-law mean-variance link `Var = Mean + 2^b * Mean^k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispersionModel {
    pub k: f64,
    pub b: f64,
}

impl DispersionModel {
    /// Poisson floor used when nothing can be fit.
    pub const POISSON_FLOOR: DispersionModel = DispersionModel { k: 1.0, b: 0.0 };

    pub fn alpha(&self) -> f64 {
        2f64.powf(self.b)
    }

    pub fn variance(&self, mean: f64) -> f64 {
        mean.powf(self.k) * self.alpha() + mean
    }
}

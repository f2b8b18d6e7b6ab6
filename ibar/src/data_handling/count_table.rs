use std::collections::HashSet;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{debug, error, info};

use crate::config::AnalysisConfig;
use crate::error::{Result, ScreenError};
use crate::helper_functions::{column_str, read_delimited};
use crate::models::{Dataset, ID_DELIMITER, INFO_COLUMNS};

/// A raw count table on disk together with the columns to pull out of it.
pub struct CountTableFile {
    pub path: PathBuf,
    pub gene_column: String,
    pub guide_column: String,
    /// `None` when rows are plain guides.
    pub barcode_column: Option<String>,
    pub samples: Vec<String>,
}

impl CountTableFile {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            path: config.input.clone(),
            gene_column: config.gene_column.clone(),
            guide_column: config.guide_column.clone(),
            barcode_column: config.has_barcode.then(|| config.barcode_column.clone()),
            samples: config.layout().all_samples(),
        }
    }
}

/// Picks the field separator from the file extension.
fn separator_for(path: &Path) -> Result<u8> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => Ok(b','),
        Some("tsv") | Some("txt") => Ok(b'\t'),
        _ => {
            error!("Input file should be csv, tsv or txt, columns separated by , or tab");
            Err(ScreenError::UnsupportedInputFormat {
                path: path.display().to_string(),
            })
        }
    }
}

impl Dataset for CountTableFile {
    fn load(&self) -> Result<DataFrame> {
        let separator = separator_for(&self.path)?;
        info!("Reading count table from {}", self.path.display());

        let raw = read_delimited(&self.path, separator)?;
        info!(
            "Data with {} samples, {} rows",
            self.samples.len(),
            raw.height()
        );

        build_count_table(
            &raw,
            &self.gene_column,
            &self.guide_column,
            self.barcode_column.as_deref(),
            &self.samples,
        )
    }
}

/// Selects and renames the identifier columns, derives `gid` and `bid`, and
/// clamps zero counts to 1.
///
/// Without a barcode column the guide doubles as barcode, so `bid == gid`.
pub fn build_count_table(
    raw: &DataFrame,
    gene_column: &str,
    guide_column: &str,
    barcode_column: Option<&str>,
    samples: &[String],
) -> Result<DataFrame> {
    let required = [Some(gene_column), Some(guide_column), barcode_column]
        .into_iter()
        .flatten()
        .chain(samples.iter().map(String::as_str));
    for name in required {
        if raw.column(name).is_err() {
            return Err(ScreenError::InvalidCountTable {
                reason: format!("column '{}' not found", name),
            });
        }
    }

    let genes = column_str(raw, gene_column)?;
    let guides = column_str(raw, guide_column)?;
    let barcodes = match barcode_column {
        Some(name) => column_str(raw, name)?,
        None => guides.clone(),
    };

    let gids: Vec<String> = genes
        .iter()
        .zip(&guides)
        .map(|(gene, guide)| format!("{}{}{}", gene, ID_DELIMITER, guide))
        .collect();
    let bids: Vec<String> = match barcode_column {
        Some(_) => gids
            .iter()
            .zip(&barcodes)
            .map(|(gid, barcode)| format!("{}{}{}", gid, ID_DELIMITER, barcode))
            .collect(),
        None => gids.clone(),
    };

    let mut seen = HashSet::with_capacity(bids.len());
    if let Some(duplicate) = bids.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(ScreenError::InvalidCountTable {
            reason: format!("duplicate row id '{}'", duplicate),
        });
    }

    let [gene, guide, gid, barcode, bid] = INFO_COLUMNS;
    let mut columns = vec![
        Column::new(gene.into(), genes),
        Column::new(guide.into(), guides),
        Column::new(gid.into(), gids),
        Column::new(barcode.into(), barcodes),
        Column::new(bid.into(), bids),
    ];

    for label in samples {
        let casted = raw.column(label)?.cast(&DataType::Float64)?;
        let counts = casted.f64()?;
        if counts.null_count() > 0 {
            return Err(ScreenError::InvalidCountTable {
                reason: format!("column '{}' has missing or non-numeric counts", label),
            });
        }
        let clamped: Vec<f64> = counts
            .into_no_null_iter()
            .map(|c| if c == 0.0 { 1.0 } else { c })
            .collect();
        if clamped.iter().any(|&c| c < 0.0) {
            return Err(ScreenError::InvalidCountTable {
                reason: format!("column '{}' has negative counts", label),
            });
        }
        columns.push(Column::new(label.as_str().into(), clamped));
    }

    let df = DataFrame::new(columns)?;
    debug!("Count table shape: {:?}", df.shape());
    Ok(df)
}

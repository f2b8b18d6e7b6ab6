//! End-to-end run: normalize, fit, score, aggregate, merge.

use polars::prelude::*;
use tracing::info;

use crate::aggregation::{AggregationOrchestrator, LevelResults};
use crate::analysis::dispersion::fit_mean_variance;
use crate::analysis::normalization::normalize_counts;
use crate::analysis::scoring::{score_table, ScoringOptions};
use crate::config::{AnalysisConfig, FileRole};
use crate::error::Result;
use crate::helper_functions::{count_matrix, dataframe_to_tsv};
use crate::models::DispersionModel;
use crate::rra_processing::RankAggregator;

pub struct PipelineOutcome {
    pub model: DispersionModel,
    pub scores: DataFrame,
    pub levels: Vec<LevelResults>,
    /// Final gene table as written to disk.
    pub result: DataFrame,
}

/// Normalizes every sample, fits the mean-variance model and scores each row.
pub fn score_counts(counts: &DataFrame, config: &AnalysisConfig) -> Result<(DataFrame, DispersionModel)> {
    let layout = config.layout();
    let normalized = normalize_counts(counts, &layout.all_samples(), config.norm_method)?;

    info!("Modeling the mean and variance ...");
    let model_counts = count_matrix(&normalized, &layout.model_samples())?;
    let model = fit_mean_variance(model_counts.view())?;

    let adjust = config.adjust_barcode_variance();
    info!("Barcode variance adjustment: {}", if adjust { "on" } else { "off" });
    let options = ScoringOptions {
        norm_threshold: config.norm_threshold,
        adjust_barcode_variance: adjust,
    };
    let scores = score_table(&normalized, &layout, &model, &options)?;
    Ok((scores, model))
}

/// Mean row `lfc` per gene, keyed as `group_id`.
fn gene_lfc(scores: &DataFrame) -> PolarsResult<DataFrame> {
    let mut per_gene = scores
        .clone()
        .lazy()
        .group_by([col("gene")])
        .agg([col("lfc").mean()])
        .collect()?;
    per_gene.rename("gene", "group_id".into())?;
    Ok(per_gene)
}

pub fn run_analysis(
    counts: &DataFrame,
    config: &AnalysisConfig,
    aggregator: &dyn RankAggregator,
) -> Result<PipelineOutcome> {
    let files = config.output_files();
    let (mut scores, model) = score_counts(counts, config)?;

    let score_path = files.path(FileRole::ScoreTable);
    dataframe_to_tsv(&mut scores, &score_path)?;
    info!("Score table written to {}", score_path.display());

    let orchestrator = AggregationOrchestrator::new(
        aggregator,
        config.gene_test_threshold,
        config.aggregation_levels(),
    )?;
    let outcome = orchestrator.run(&scores)?;

    let mut result = outcome.merged.join(
        &gene_lfc(&scores)?,
        ["group_id"],
        ["group_id"],
        JoinArgs::new(JoinType::Left),
        None,
    )?;
    let result_path = files.path(FileRole::MergedResult);
    dataframe_to_tsv(&mut result, &result_path)?;
    info!("{} genes written to {}", result.height(), result_path.display());

    Ok(PipelineOutcome {
        model,
        scores,
        levels: outcome.levels,
        result,
    })
}

//! Gene-level calls from the score table through one or more rounds of rank
//! aggregation.
//!
//! Each level runs a low (depletion) and a high (enrichment) aggregation.
//! Level 0 ranks score-table rows; every later level ranks the groups the
//! previous level produced, collapsing one id component at a time
//! (`gene.guide` -> `gene`).

use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{Result, ScreenError};
use crate::helper_functions::{column_f64, column_str};
use crate::models::{Direction, ID_DELIMITER};
use crate::rra_processing::{sort_ranked, GroupResult, RankAggregator, RankJob, RankedItem};

/// Score-table column the first aggregation groups rows by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Gene,
    GuideId,
}

impl GroupKey {
    pub fn column(&self) -> &'static str {
        match self {
            GroupKey::Gene => "gene",
            GroupKey::GuideId => "gid",
        }
    }
}

/// Results of one level in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelResults {
    pub group_key: GroupKey,
    pub low: Vec<GroupResult>,
    pub high: Vec<GroupResult>,
}

impl LevelResults {
    fn direction(&self, direction: Direction) -> &[GroupResult] {
        match direction {
            Direction::Low => &self.low,
            Direction::High => &self.high,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    pub levels: Vec<LevelResults>,
    /// Last level, low and high joined on `group_id`.
    pub merged: DataFrame,
}

/// Drives the aggregator over a list of levels.
pub struct AggregationOrchestrator<'a> {
    aggregator: &'a dyn RankAggregator,
    gene_test_threshold: f64,
    levels: Vec<GroupKey>,
}

/// Share of values strictly below `threshold`; 0 for an empty list.
fn percentile_below(values: impl ExactSizeIterator<Item = f64>, threshold: f64) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.filter(|&v| v < threshold).count() as f64 / n as f64
}

/// Group id one level up: the id without its last component.
pub fn parent_id(id: &str) -> &str {
    id.rsplit_once(ID_DELIMITER).map_or(id, |(parent, _)| parent)
}

impl<'a> AggregationOrchestrator<'a> {
    pub fn new(
        aggregator: &'a dyn RankAggregator,
        gene_test_threshold: f64,
        levels: Vec<GroupKey>,
    ) -> Result<Self> {
        if levels.is_empty() {
            return Err(ScreenError::InvalidConfig {
                reason: "at least one aggregation level is required".to_string(),
            });
        }
        Ok(Self {
            aggregator,
            gene_test_threshold,
            levels,
        })
    }

    pub fn run(&self, scores: &DataFrame) -> Result<AggregationOutcome> {
        let first = self.levels[0];
        let mut results = Vec::with_capacity(self.levels.len());
        results.push(self.first_level(scores, first)?);

        for (level, &group_key) in self.levels.iter().enumerate().skip(1) {
            let previous = &results[level - 1];
            let next = self.next_level(level, group_key, previous)?;
            results.push(next);
        }

        let merged = match results.last() {
            Some(last) => merge_directions(&last.low, &last.high)?,
            None => DataFrame::empty(),
        };
        info!("Merged {} groups present in both directions", merged.height());

        Ok(AggregationOutcome {
            levels: results,
            merged,
        })
    }

    fn first_level(&self, scores: &DataFrame, group_key: GroupKey) -> Result<LevelResults> {
        let item_ids = column_str(scores, "bid")?;
        let group_ids = column_str(scores, group_key.column())?;
        let z = column_f64(scores, "treat_z")?;

        let mut low = Vec::new();
        let mut high = Vec::new();
        for direction in Direction::BOTH {
            info!("Robust Rank Aggregation of {} direction data", direction.label());
            let (sign, pcol) = match direction {
                Direction::Low => (1.0, "p.low"),
                Direction::High => (-1.0, "p.high"),
            };
            let items: Vec<RankedItem> = item_ids
                .iter()
                .zip(&group_ids)
                .zip(&z)
                .map(|((item, group), z)| RankedItem {
                    item_id: item.clone(),
                    group_id: group.clone(),
                    value: sign * z,
                })
                .collect();
            let pvalues = column_f64(scores, pcol)?;
            let percentile = percentile_below(pvalues.into_iter(), self.gene_test_threshold);

            let groups = self.aggregate(0, direction, percentile, items)?;
            match direction {
                Direction::Low => low = groups,
                Direction::High => high = groups,
            }
        }

        Ok(LevelResults { group_key, low, high })
    }

    fn next_level(
        &self,
        level: usize,
        group_key: GroupKey,
        previous: &LevelResults,
    ) -> Result<LevelResults> {
        let mut low = Vec::new();
        let mut high = Vec::new();
        for direction in Direction::BOTH {
            info!(
                "Robust Rank Aggregation of {} direction data, level {}",
                direction.label(),
                level
            );
            let groups = previous.direction(direction);
            let items: Vec<RankedItem> = groups
                .iter()
                .map(|g| RankedItem {
                    item_id: g.group_id.clone(),
                    group_id: parent_id(&g.group_id).to_string(),
                    value: g.statistic,
                })
                .collect();
            let percentile =
                percentile_below(groups.iter().map(|g| g.fdr), self.gene_test_threshold);

            let aggregated = self.aggregate(level, direction, percentile, items)?;
            match direction {
                Direction::Low => low = aggregated,
                Direction::High => high = aggregated,
            }
        }

        Ok(LevelResults { group_key, low, high })
    }

    fn aggregate(
        &self,
        level: usize,
        direction: Direction,
        percentile: f64,
        mut items: Vec<RankedItem>,
    ) -> Result<Vec<GroupResult>> {
        sort_ranked(&mut items);
        let job = RankJob {
            level,
            direction,
            percentile,
        };
        debug!("{:?} with {} items", job, items.len());
        let groups = self.aggregator.aggregate(&job, &items)?;
        debug!("{} groups returned", groups.len());
        Ok(groups)
    }
}

fn group_results_frame(results: &[GroupResult], suffix: &str) -> PolarsResult<DataFrame> {
    let named = |name: &str| PlSmallStr::from(format!("{}{}", name, suffix));
    DataFrame::new(vec![
        Column::new(
            "group_id".into(),
            results.iter().map(|r| r.group_id.clone()).collect::<Vec<_>>(),
        ),
        Column::new(
            named("items_in_group"),
            results.iter().map(|r| r.items_in_group).collect::<Vec<_>>(),
        ),
        Column::new(
            named("statistic"),
            results.iter().map(|r| r.statistic).collect::<Vec<_>>(),
        ),
        Column::new(named("p"), results.iter().map(|r| r.p_value).collect::<Vec<_>>()),
        Column::new(named("FDR"), results.iter().map(|r| r.fdr).collect::<Vec<_>>()),
        Column::new(
            named("best_item"),
            results.iter().map(|r| r.best_item.clone()).collect::<Vec<_>>(),
        ),
    ])
}

/// Inner join of the low and high results on `group_id`, every other column
/// suffixed `.low` / `.high`.
pub fn merge_directions(low: &[GroupResult], high: &[GroupResult]) -> PolarsResult<DataFrame> {
    let low = group_results_frame(low, &Direction::Low.suffix())?;
    let high = group_results_frame(high, &Direction::High.suffix())?;
    low.join(
        &high,
        ["group_id"],
        ["group_id"],
        JoinArgs::new(JoinType::Inner),
        None,
    )
}

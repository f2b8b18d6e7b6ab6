//! Analysis configuration and the role -> path map of output files.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregation::GroupKey;
use crate::error::{Result, ScreenError};
use crate::models::{Direction, NormMethod, SampleLayout};

/// User-defined parameters of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Count table, `.csv`, `.tsv` or `.txt`.
    pub input: PathBuf,

    /// Sample columns treated as control replicates.
    pub controls: Vec<String>,

    /// Sample columns treated as treatment replicates.
    pub treatments: Vec<String>,

    pub gene_column: String,
    pub guide_column: String,
    pub barcode_column: String,

    /// Whether rows are barcodes of a guide (iBAR) or plain guides.
    pub has_barcode: bool,

    pub norm_method: NormMethod,

    /// Normalized counts at or below this value mark a row as unreliable.
    pub norm_threshold: f64,

    /// One-sided p-value (or FDR at later levels) below which an item counts
    /// towards the aggregation percentile.
    pub gene_test_threshold: f64,

    /// Aggregate barcodes into guides first, then guides into genes.
    pub two_stage: bool,

    /// Path or name of the RRA executable.
    pub rra_path: String,

    /// Output prefix, e.g. `out` produces `out.gene.txt`.
    pub output_prefix: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            controls: Vec::new(),
            treatments: Vec::new(),
            gene_column: "gene".to_string(),
            guide_column: "guide".to_string(),
            barcode_column: "barcode".to_string(),
            has_barcode: true,
            norm_method: NormMethod::Median,
            norm_threshold: 10.0,
            gene_test_threshold: 0.25,
            two_stage: false,
            rra_path: "RRA".to_string(),
            output_prefix: "ibar".to_string(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        info!("Reading configuration from {}", path.display());
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(ScreenError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.controls.is_empty() {
            return invalid("at least one control column is required");
        }
        if self.treatments.is_empty() {
            return invalid("at least one treatment column is required");
        }
        if let Some(shared) = self.controls.iter().find(|c| self.treatments.contains(c)) {
            return Err(ScreenError::InvalidConfig {
                reason: format!("column '{}' is both control and treatment", shared),
            });
        }
        if !(self.norm_threshold >= 0.0) {
            return invalid("norm_threshold must be a non-negative number");
        }
        if !(self.gene_test_threshold > 0.0 && self.gene_test_threshold <= 1.0) {
            return invalid("gene_test_threshold must lie in (0, 1]");
        }
        if self.output_prefix.is_empty() {
            return invalid("output_prefix must not be empty");
        }
        Ok(())
    }

    pub fn layout(&self) -> SampleLayout {
        SampleLayout {
            controls: self.controls.clone(),
            treatments: self.treatments.clone(),
        }
    }

    /// Barcode variance adjustment is replaced by the guide-level
    /// aggregation in two-stage mode.
    pub fn adjust_barcode_variance(&self) -> bool {
        self.has_barcode && !self.two_stage
    }

    pub fn aggregation_levels(&self) -> Vec<GroupKey> {
        if self.two_stage {
            vec![GroupKey::GuideId, GroupKey::Gene]
        } else {
            vec![GroupKey::Gene]
        }
    }

    pub fn output_files(&self) -> OutputFiles {
        OutputFiles::new(
            &self.output_prefix,
            self.has_barcode || self.two_stage,
            self.aggregation_levels().len(),
        )
    }
}

/// Logical role of a file written during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    ScoreTable,
    RankInput { level: usize, direction: Direction },
    RankOutput { level: usize, direction: Direction },
    MergedResult,
}

/// Maps every [`FileRole`] to its path under the output prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFiles {
    prefix: String,
    barcode_level: bool,
    levels: usize,
}

impl OutputFiles {
    pub fn new(prefix: &str, barcode_level: bool, levels: usize) -> Self {
        Self {
            prefix: prefix.to_string(),
            barcode_level,
            levels,
        }
    }

    pub fn path(&self, role: FileRole) -> PathBuf {
        let suffix = match role {
            FileRole::ScoreTable if self.barcode_level => "barcode.txt".to_string(),
            FileRole::ScoreTable => "sgrna.txt".to_string(),
            FileRole::RankInput { level: 0, direction } => format!("p{}.txt", direction.label()),
            FileRole::RankInput { level, direction } => {
                format!("level{}.p{}.txt", level, direction.label())
            }
            FileRole::RankOutput { level, direction } if level + 1 >= self.levels => {
                format!("gene.{}.txt", direction.label())
            }
            FileRole::RankOutput { level: 0, direction } => format!("sgrna.{}.txt", direction.label()),
            FileRole::RankOutput { level, direction } => {
                format!("level{}.{}.txt", level, direction.label())
            }
            FileRole::MergedResult => "gene.txt".to_string(),
        };
        PathBuf::from(format!("{}.{}", self.prefix, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            input: "counts.csv".into(),
            controls: vec!["c1".into(), "c2".into()],
            treatments: vec!["t1".into(), "t2".into()],
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn validate_rejects_empty_labels() {
        let mut cfg = config();
        cfg.controls.clear();
        assert!(matches!(cfg.validate(), Err(ScreenError::InvalidConfig { .. })));

        let mut cfg = config();
        cfg.treatments.push("c1".into());
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.gene_test_threshold = 0.0;
        assert!(cfg.validate().is_err());

        assert!(config().validate().is_ok());
    }

    #[test]
    fn json_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"input": "x.tsv", "controls": ["c1"], "treatments": ["t1"], "norm_method": "none", "two_stage": true}"#,
        )
        .unwrap();

        let cfg = AnalysisConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.norm_method, NormMethod::None);
        assert_eq!(cfg.norm_threshold, 10.0);
        assert_eq!(cfg.gene_test_threshold, 0.25);
        assert_eq!(cfg.rra_path, "RRA");
        assert!(!cfg.adjust_barcode_variance());
        assert_eq!(cfg.aggregation_levels(), vec![GroupKey::GuideId, GroupKey::Gene]);
    }

    #[test]
    fn single_stage_file_names() {
        let files = OutputFiles::new("out", false, 1);
        assert_eq!(files.path(FileRole::ScoreTable), PathBuf::from("out.sgrna.txt"));
        assert_eq!(
            files.path(FileRole::RankInput { level: 0, direction: Direction::Low }),
            PathBuf::from("out.plow.txt")
        );
        assert_eq!(
            files.path(FileRole::RankOutput { level: 0, direction: Direction::High }),
            PathBuf::from("out.gene.high.txt")
        );
        assert_eq!(files.path(FileRole::MergedResult), PathBuf::from("out.gene.txt"));
    }

    #[test]
    fn two_stage_file_names() {
        let files = OutputFiles::new("out", true, 2);
        assert_eq!(files.path(FileRole::ScoreTable), PathBuf::from("out.barcode.txt"));
        assert_eq!(
            files.path(FileRole::RankOutput { level: 0, direction: Direction::Low }),
            PathBuf::from("out.sgrna.low.txt")
        );
        assert_eq!(
            files.path(FileRole::RankInput { level: 1, direction: Direction::High }),
            PathBuf::from("out.level1.phigh.txt")
        );
        assert_eq!(
            files.path(FileRole::RankOutput { level: 1, direction: Direction::Low }),
            PathBuf::from("out.gene.low.txt")
        );
    }
}

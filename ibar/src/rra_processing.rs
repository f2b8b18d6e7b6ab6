//! Ranked-list files and the Robust Rank Aggregation (RRA) executable.
//!
//! Input file, one item per line:
//!     <item id> <group id> <list id> <value> <probability> <chosen>
//! Output file, one group per line:
//!     <group id> <items in group> <statistic> <p> <FDR> <best item>

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, error, info};

use crate::config::{FileRole, OutputFiles};
use crate::error::{Result, ScreenError};
use crate::models::Direction;

/// List id written for every item; all items belong to one list.
pub const POOL_ID: &str = "list";

/// Group ids RRA is told to ignore.
pub const SKIP_GENE_TOKENS: [&str; 2] = ["NA", "na"];

const RANKED_LIST_HEADER: [&str; 6] = ["sgrna", "symbol", "pool", "value", "prob", "chosen"];

/// One line of a ranked-list file.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem {
    pub item_id: String,
    pub group_id: String,
    pub value: f64,
}

/// One line of RRA output.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupResult {
    pub group_id: String,
    pub items_in_group: u32,
    pub statistic: f64,
    pub p_value: f64,
    pub fdr: f64,
    pub best_item: String,
}

/// What a single aggregation call is for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankJob {
    pub level: usize,
    pub direction: Direction,
    /// RRA only considers items ranked below this percentile.
    pub percentile: f64,
}

/// Collapses a ranked list of items into per-group significance.
pub trait RankAggregator {
    fn aggregate(&self, job: &RankJob, items: &[RankedItem]) -> Result<Vec<GroupResult>>;
}

/// Sorts items ascending by value, the order RRA expects.
pub fn sort_ranked(items: &mut [RankedItem]) {
    items.sort_by(|a, b| a.value.total_cmp(&b.value));
}

/// Writes a tab-delimited ranked list with header. Probability and chosen
/// flags are always 1.
pub fn write_ranked_list<W: Write>(writer: W, items: &[RankedItem]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    wtr.write_record(RANKED_LIST_HEADER)?;
    for item in items {
        let value = item.value.to_string();
        wtr.write_record([
            item.item_id.as_str(),
            item.group_id.as_str(),
            POOL_ID,
            value.as_str(),
            "1",
            "1",
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Parses RRA output. Columns are read by position; the header names belong
/// to the RRA version in use.
pub fn read_group_results<R: Read>(reader: R) -> Result<Vec<GroupResult>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut results = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let line = idx + 2;
        if record.len() < 6 {
            return Err(ScreenError::MalformedAggregatorOutput {
                line,
                reason: format!("expected 6 columns, found {}", record.len()),
            });
        }
        let number = |col: usize| -> Result<f64> {
            record[col]
                .trim()
                .parse::<f64>()
                .map_err(|e| ScreenError::MalformedAggregatorOutput {
                    line,
                    reason: format!("column {}: '{}' ({})", col + 1, &record[col], e),
                })
        };
        let items_in_group = record[1].trim().parse::<u32>().map_err(|e| {
            ScreenError::MalformedAggregatorOutput {
                line,
                reason: format!("items_in_group '{}' ({})", &record[1], e),
            }
        })?;

        results.push(GroupResult {
            group_id: record[0].to_string(),
            items_in_group,
            statistic: number(2)?,
            p_value: number(3)?,
            fdr: number(4)?,
            best_item: record[5].to_string(),
        });
    }
    Ok(results)
}

/// Runs the RRA binary as a blocking subprocess, one call per job.
#[derive(Debug, Clone)]
pub struct RraExecutable {
    program: PathBuf,
    files: OutputFiles,
}

impl RraExecutable {
    /// Resolves `rra_path` on `PATH` (or as a path) so a missing binary fails
    /// before any scoring is done.
    pub fn locate(rra_path: &str, files: OutputFiles) -> Result<Self> {
        let program = which::which(rra_path).map_err(|source| ScreenError::AggregatorNotFound {
            program: rra_path.to_string(),
            source,
        })?;
        debug!("Using RRA at {}", program.display());
        Ok(Self { program, files })
    }

    fn command(&self, input: &Path, output: &Path, percentile: f64) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-p")
            .arg(percentile.to_string());
        for token in SKIP_GENE_TOKENS {
            cmd.arg("--skip-gene").arg(token);
        }
        cmd
    }
}

impl RankAggregator for RraExecutable {
    fn aggregate(&self, job: &RankJob, items: &[RankedItem]) -> Result<Vec<GroupResult>> {
        let input = self.files.path(FileRole::RankInput {
            level: job.level,
            direction: job.direction,
        });
        let output = self.files.path(FileRole::RankOutput {
            level: job.level,
            direction: job.direction,
        });

        write_ranked_list(BufWriter::new(File::create(&input)?), items)?;

        info!("RRA start: maximum percentile is {:.6}", job.percentile);
        let mut cmd = self.command(&input, &output, job.percentile);
        debug!("About to spawn: {:?}", cmd);
        let result = cmd.output()?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
            error!("RRA failed. Stderr:\n{}", stderr);
            return Err(ScreenError::AggregatorFailed {
                status: result.status.to_string(),
                stderr,
            });
        }
        info!("RRA finished, results in {}", output.display());

        read_group_results(BufReader::new(File::open(&output)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<RankedItem> {
        vec![
            RankedItem { item_id: "A.g1.b1".into(), group_id: "A".into(), value: 1.5 },
            RankedItem { item_id: "A.g1.b2".into(), group_id: "A".into(), value: -2.0 },
            RankedItem { item_id: "B.g2.b1".into(), group_id: "B".into(), value: 0.25 },
        ]
    }

    #[test]
    fn ranked_list_is_sorted_with_constant_columns() {
        let mut ranked = items();
        sort_ranked(&mut ranked);
        let mut buf = Vec::new();
        write_ranked_list(&mut buf, &ranked).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "sgrna\tsymbol\tpool\tvalue\tprob\tchosen");
        assert_eq!(lines[1], "A.g1.b2\tA\tlist\t-2\t1\t1");
        assert_eq!(lines[2], "B.g2.b1\tB\tlist\t0.25\t1\t1");
        assert_eq!(lines[3], "A.g1.b1\tA\tlist\t1.5\t1\t1");
    }

    #[test]
    fn parses_rra_output() {
        let text = "group_id\titems_in_group\tlo_value\tp\tFDR\tgoodsgrna\n\
                    A\t2\t0.0012\t0.003\t0.01\t2\n\
                    B\t1\t0.5\t0.61\t0.9\t0\n";
        let results = read_group_results(text.as_bytes()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].group_id, "A");
        assert_eq!(results[0].items_in_group, 2);
        assert_eq!(results[0].statistic, 0.0012);
        assert_eq!(results[1].fdr, 0.9);
        assert_eq!(results[1].best_item, "0");
    }

    #[test]
    fn rejects_short_rows() {
        let text = "group_id\titems_in_group\tlo_value\tp\tFDR\tgoodsgrna\nA\t2\t0.1\n";
        let err = read_group_results(text.as_bytes());
        assert!(matches!(
            err,
            Err(ScreenError::MalformedAggregatorOutput { line: 2, .. })
        ));
    }

    #[test]
    fn missing_executable_is_reported() {
        let files = OutputFiles::new("out", false, 1);
        let err = RraExecutable::locate("definitely-not-an-rra-binary-7f3a", files);
        assert!(matches!(err, Err(ScreenError::AggregatorNotFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn runs_executable_and_checks_status() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_rra.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 -i) in=\"$2\"; shift 2;;\n\
                 -o) out=\"$2\"; shift 2;;\n\
                 *) shift;;\n\
               esac\n\
             done\n\
             printf 'group_id\\titems_in_group\\tlo_value\\tp\\tFDR\\tgoodsgrna\\n' > \"$out\"\n\
             tail -n +2 \"$in\" | cut -f2 | sort -u | while read g; do\n\
               printf '%s\\t1\\t0.5\\t0.5\\t1\\t1\\n' \"$g\" >> \"$out\"\n\
             done\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let prefix = dir.path().join("run").display().to_string();
        let files = OutputFiles::new(&prefix, true, 1);
        let rra = RraExecutable::locate(script.to_str().unwrap(), files.clone()).unwrap();
        let job = RankJob { level: 0, direction: Direction::High, percentile: 0.2 };

        let mut ranked = items();
        sort_ranked(&mut ranked);
        let results = rra.aggregate(&job, &ranked).unwrap();
        let groups: Vec<&str> = results.iter().map(|r| r.group_id.as_str()).collect();
        assert_eq!(groups, vec!["A", "B"]);
        assert!(files.path(FileRole::RankInput { level: 0, direction: Direction::High }).exists());

        let failing_script = dir.path().join("failing_rra.sh");
        std::fs::write(&failing_script, "#!/bin/sh\necho broken >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&failing_script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let failing = RraExecutable::locate(failing_script.to_str().unwrap(), files).unwrap();
        match failing.aggregate(&job, &ranked) {
            Err(ScreenError::AggregatorFailed { stderr, .. }) => assert!(stderr.contains("broken")),
            other => panic!("expected AggregatorFailed, got {:?}", other),
        }
    }
}

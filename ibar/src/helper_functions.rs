use std::fs::File;
use std::path::Path;

use ndarray::Array2;
use polars::prelude::*;

/// Reads a delimited text table with a header row. Every column is read as a
/// string so identifiers like barcodes keep their leading zeros; numeric
/// columns are cast by the caller.
pub fn read_delimited(file_path: &Path, separator: u8) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

/// Writes a DataFrame as a tab-delimited file with header.
pub fn dataframe_to_tsv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(df)
}

/// Column values as `f64`, nulls mapped to NaN.
pub fn column_f64(df: &DataFrame, name: &str) -> PolarsResult<Vec<f64>> {
    let casted = df.column(name)?.cast(&DataType::Float64)?;
    let values = casted
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

/// Column values as owned strings, nulls mapped to "".
pub fn column_str(df: &DataFrame, name: &str) -> PolarsResult<Vec<String>> {
    let casted = df.column(name)?.cast(&DataType::String)?;
    let values = casted
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect();
    Ok(values)
}

/// Gathers the given sample columns into a rows x samples matrix.
pub fn count_matrix(df: &DataFrame, labels: &[String]) -> PolarsResult<Array2<f64>> {
    let mut matrix = Array2::<f64>::zeros((df.height(), labels.len()));
    for (j, label) in labels.iter().enumerate() {
        for (i, value) in column_f64(df, label)?.into_iter().enumerate() {
            matrix[[i, j]] = value;
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn count_matrix_follows_label_order() {
        let df = df![
            "gene" => &["A", "B"],
            "c1" => &[1i64, 2],
            "t1" => &[3.5, 4.5]
        ]
        .unwrap();
        let m = count_matrix(&df, &["t1".to_string(), "c1".to_string()]).unwrap();
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m[[0, 0]], 3.5);
        assert_eq!(m[[1, 1]], 2.0);
    }

    #[test]
    fn tsv_written_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut df = df!["gene" => &["A"], "treat_z" => &[1.5]].unwrap();
        dataframe_to_tsv(&mut df, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("gene\tz"));
        assert_eq!(lines.next(), Some("A\t1.5"));

        let back = read_delimited(&path, b'\t').unwrap();
        assert_eq!(column_str(&back, "gene").unwrap(), vec!["A"]);
        assert_eq!(column_f64(&back, "treat_z").unwrap(), vec![1.5]);
    }
}

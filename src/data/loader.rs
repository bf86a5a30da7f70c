use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

/// File extensions recognised as feature tables.
pub const TABLE_EXTENSIONS: [&str; 3] = ["parquet", "pq", "csv"];

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a feature table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` / `.pq` – any flat Parquet file (Pandas or Polars writers)
/// * `.csv`             – header row, column types inferred from the cells
pub fn load_file(path: &Path) -> Result<RecordBatch> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load every record batch of a Parquet file into one batch.
fn load_parquet(path: &Path) -> Result<RecordBatch> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let schema = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;

    let mut batches = Vec::new();
    for batch_result in reader {
        batches.push(batch_result.context("reading parquet record batch")?);
    }

    concat_batches(&schema, &batches).context("concatenating parquet record batches")
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// Inferred type for a CSV column, widened as cells are seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvColumnType {
    Int64,
    Float64,
    Boolean,
    Utf8,
}

/// CSV layout: header row with column names, one observation per line.
/// Empty cells are nulls; a column is Int64, Float64 or Boolean when every
/// non-empty cell parses as such, otherwise Utf8.
fn load_csv(path: &Path) -> Result<RecordBatch> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.len() != headers.len() {
            bail!(
                "CSV row {row_no}: expected {} fields but found {}",
                headers.len(),
                record.len()
            );
        }
        for (col_idx, value) in record.iter().enumerate() {
            cells[col_idx].push(value.to_string());
        }
    }

    let mut fields = Vec::with_capacity(headers.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(headers.len());
    for (name, values) in headers.iter().zip(&cells) {
        let (data_type, array) = build_csv_column(values);
        fields.push(Field::new(name, data_type, true));
        columns.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    if columns.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    RecordBatch::try_new(schema, columns).context("assembling CSV columns")
}

fn guess_cell_type(s: &str) -> CsvColumnType {
    if s.parse::<i64>().is_ok() {
        return CsvColumnType::Int64;
    }
    if s.parse::<f64>().is_ok() {
        return CsvColumnType::Float64;
    }
    if s == "true" || s == "false" {
        return CsvColumnType::Boolean;
    }
    CsvColumnType::Utf8
}

fn widen(current: Option<CsvColumnType>, cell: CsvColumnType) -> CsvColumnType {
    use CsvColumnType::*;
    match (current, cell) {
        (None, t) => t,
        (Some(a), b) if a == b => a,
        (Some(Int64), Float64) | (Some(Float64), Int64) => Float64,
        _ => Utf8,
    }
}

fn build_csv_column(values: &[String]) -> (DataType, ArrayRef) {
    let inferred = values
        .iter()
        .filter(|v| !v.is_empty())
        .fold(None, |acc, v| Some(widen(acc, guess_cell_type(v))))
        .unwrap_or(CsvColumnType::Utf8);

    let non_empty = |v: &String| -> Option<String> { (!v.is_empty()).then(|| v.clone()) };

    match inferred {
        CsvColumnType::Int64 => (
            DataType::Int64,
            Arc::new(Int64Array::from(
                values
                    .iter()
                    .map(|v| v.parse::<i64>().ok())
                    .collect::<Vec<_>>(),
            )),
        ),
        CsvColumnType::Float64 => (
            DataType::Float64,
            Arc::new(Float64Array::from(
                values
                    .iter()
                    .map(|v| v.parse::<f64>().ok())
                    .collect::<Vec<_>>(),
            )),
        ),
        CsvColumnType::Boolean => (
            DataType::Boolean,
            Arc::new(BooleanArray::from(
                values
                    .iter()
                    .map(|v| v.parse::<bool>().ok())
                    .collect::<Vec<_>>(),
            )),
        ),
        CsvColumnType::Utf8 => (
            DataType::Utf8,
            Arc::new(StringArray::from(
                values.iter().map(non_empty).collect::<Vec<_>>(),
            )),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{Float64Type, Int64Type};

    use super::*;

    #[test]
    fn csv_types_are_inferred_per_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "label,area,row,valid").unwrap();
        writeln!(file, "1,10.5,A,true").unwrap();
        writeln!(file, "2,11,B,false").unwrap();
        writeln!(file, "3,,C,").unwrap();
        drop(file);

        let batch = load_file(&path).unwrap();
        let schema = batch.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(3).data_type(), &DataType::Boolean);

        let area = batch.column(1).as_primitive::<Float64Type>();
        assert_eq!(area.value(1), 11.0);
        assert!(area.is_null(2));
        assert_eq!(batch.column(0).as_primitive::<Int64Type>().value(2), 3);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = load_file(Path::new("table.xlsx")).unwrap_err();
        assert!(err.to_string().contains(".xlsx"));
    }

    #[test]
    fn ragged_csv_rows_fail_with_row_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "a,b\n1,2\n3\n").unwrap();
        let err = load_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("CSV row 1"));
    }
}

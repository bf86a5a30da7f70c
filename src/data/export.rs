use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

use super::model::{column_values, CellValue};

// ---------------------------------------------------------------------------
// Export of the (unsampled) filtered table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Csv,
    Parquet,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 2] = [ExportFormat::Csv, ExportFormat::Parquet];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExportFormat::Csv => "CSV",
            ExportFormat::Parquet => "Parquet",
        }
    }
}

/// `"{table}_filtered.{ext}"`
pub fn export_file_name(table_name: &str, format: ExportFormat) -> String {
    format!("{table_name}_filtered.{}", format.extension())
}

/// Write `batch` as CSV: one header row, then one line per row.
pub fn write_csv<W: Write>(batch: &RecordBatch, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let schema = batch.schema();
    out.write_record(schema.fields().iter().map(|f| f.name().as_str()))
        .context("writing CSV header")?;

    let columns: Vec<Vec<CellValue>> = batch.columns().iter().map(column_values).collect();
    for row in 0..batch.num_rows() {
        out.write_record(columns.iter().map(|col| col[row].to_field()))
            .with_context(|| format!("writing CSV row {row}"))?;
    }
    out.flush().context("flushing CSV output")?;
    Ok(())
}

/// Write `batch` as a single-row-group Parquet file.
pub fn write_parquet<W: Write + Send>(batch: &RecordBatch, writer: W) -> Result<()> {
    let mut out =
        ArrowWriter::try_new(writer, batch.schema(), None).context("creating parquet writer")?;
    out.write(batch).context("writing parquet record batch")?;
    out.close().context("finalising parquet file")?;
    Ok(())
}

/// Write `batch` to `path` in the requested format.
pub fn export_to_path(batch: &RecordBatch, path: &Path, format: ExportFormat) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating export file {}", path.display()))?;
    let writer = std::io::BufWriter::new(file);
    match format {
        ExportFormat::Csv => write_csv(batch, writer),
        ExportFormat::Parquet => write_parquet(batch, writer),
    }?;
    log::info!(
        "Exported {} rows to {} ({})",
        batch.num_rows(),
        path.display(),
        format.label()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::load_file;
    use crate::data::model::tests::sample_table;
    use crate::data::model::{numeric_column, FeatureFrame};

    #[test]
    fn file_name_carries_table_and_extension() {
        assert_eq!(
            export_file_name("nuclei", ExportFormat::Parquet),
            "nuclei_filtered.parquet"
        );
    }

    #[test]
    fn csv_export_reloads_with_nulls() {
        let mut buffer = Vec::new();
        write_csv(&sample_table(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("area,intensity,row,column,label"));
        assert_eq!(lines.nth(2), Some(",30.0,B,1,9"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, text).unwrap();
        let reloaded = load_file(&path).unwrap();
        assert_eq!(reloaded.num_rows(), 4);
        assert!(numeric_column(&reloaded, "area").unwrap()[2].is_nan());
        assert_eq!(reloaded.schema().field(1).data_type(), &arrow::datatypes::DataType::Float64);
    }

    #[test]
    fn parquet_export_preserves_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(export_file_name("t", ExportFormat::Parquet));
        let table = sample_table();
        export_to_path(&table, &path, ExportFormat::Parquet).unwrap();

        let reloaded = load_file(&path).unwrap();
        assert_eq!(reloaded.num_rows(), table.num_rows());
        assert_eq!(reloaded.columns(), table.columns());
        let frame = FeatureFrame::classify(reloaded, &Default::default());
        assert_eq!(frame.features, vec!["area", "intensity"]);
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use feature_explorer::data::export::{export_to_path, ExportFormat};
use feature_explorer::data::model::{ColumnRoles, FeatureFrame};
use feature_explorer::explore::{heat_map, Aggregation};

const ROWS: [&str; 8] = ["A", "B", "C", "D", "E", "F", "G", "H"];
const COLUMNS: i64 = 12;
const CELLS_PER_WELL: usize = 60;

/// Box-Muller transform for normal distribution
fn gauss(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-15);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

/// One plate worth of per-cell features.
///
/// Wells further right get larger, brighter cells so heat maps have
/// something to show; a few areas are left empty.
fn plate_table(rng: &mut StdRng, plate_effect: f64) -> Result<RecordBatch> {
    let mut rows = Vec::new();
    let mut columns = Vec::new();
    let mut labels = Vec::new();
    let mut area = Vec::new();
    let mut intensity = Vec::new();
    let mut eccentricity = Vec::new();

    let mut label = 0i64;
    for row in ROWS {
        for column in 1..=COLUMNS {
            let dose = column as f64 / COLUMNS as f64;
            for _ in 0..CELLS_PER_WELL {
                label += 1;
                rows.push(row);
                columns.push(column);
                labels.push(label);
                let a = gauss(rng, 300.0 + 250.0 * dose * plate_effect, 40.0).max(20.0);
                area.push((rng.gen::<f64>() > 0.01).then_some(a));
                intensity.push(gauss(rng, 0.2 + 0.6 * dose, 0.08).clamp(0.0, 1.0) + a / 5000.0);
                eccentricity.push(rng.gen::<f64>().powf(1.5));
            }
        }
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("row", DataType::Utf8, false),
        Field::new("column", DataType::Int64, false),
        Field::new("label", DataType::Int64, false),
        Field::new("area", DataType::Float64, true),
        Field::new("intensity_mean", DataType::Float64, false),
        Field::new("eccentricity", DataType::Float64, false),
    ]));

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(rows)),
            Arc::new(Int64Array::from(columns)),
            Arc::new(Int64Array::from(labels)),
            Arc::new(Float64Array::from(area)),
            Arc::new(Float64Array::from(intensity)),
            Arc::new(Float64Array::from(eccentricity)),
        ],
    )
    .context("Failed to create RecordBatch")
}

/// Mean area per well, as a small second table.
fn well_table(cells: &RecordBatch) -> Result<RecordBatch> {
    let frame = FeatureFrame::classify(cells.clone(), &ColumnRoles::default());
    let grid = heat_map(&frame, "area", "row", "column", Aggregation::Mean)?;

    let mut rows = Vec::new();
    let mut columns = Vec::new();
    let mut mean_area = Vec::new();
    for (i, row) in grid.x_labels.iter().enumerate() {
        for (j, column) in grid.y_labels.iter().enumerate() {
            rows.push(row.to_string());
            columns.push(column.as_f64().unwrap_or_default() as i64);
            mean_area.push(grid.values[i][j]);
        }
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("row", DataType::Utf8, false),
        Field::new("column", DataType::Int64, false),
        Field::new("mean_area", DataType::Float64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(rows)),
            Arc::new(Int64Array::from(columns)),
            Arc::new(Float64Array::from(mean_area)),
        ],
    )
    .context("Failed to create well RecordBatch")
}

fn write_plate(dir: &Path, cells: &RecordBatch) -> Result<()> {
    let tables = dir.join("tables");
    std::fs::create_dir_all(&tables)
        .with_context(|| format!("Failed to create {}", tables.display()))?;
    export_to_path(cells, &tables.join("cells.parquet"), ExportFormat::Parquet)?;
    export_to_path(&well_table(cells)?, &tables.join("wells.csv"), ExportFormat::Csv)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_plates"));
    let mut rng = StdRng::seed_from_u64(42);

    for (i, effect) in [1.0, 0.6].into_iter().enumerate() {
        let plate = output_dir.join(format!("plate_{}.zarr", i + 1));
        let batch = plate_table(&mut rng, effect)?;
        write_plate(&plate, &batch)?;
        println!("Wrote {} cells to {}", batch.num_rows(), plate.display());
    }
    Ok(())
}

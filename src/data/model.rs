use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::error::{ExplorerError, Result};

// ---------------------------------------------------------------------------
// CellValue – a single cell of a feature table
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value.
/// Used as a set member and as a group key, so it must be `Ord` + `Hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

// -- Manual Eq/Ord so we can put CellValue in BTreeSet --

impl Eq for CellValue {}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use CellValue::*;
        fn discriminant(v: &CellValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
            }
        }
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => discriminant(self).cmp(&discriminant(other)),
        }
    }
}

impl std::hash::Hash for CellValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::String(s) => s.hash(state),
            CellValue::Integer(i) => i.hash(state),
            CellValue::Float(f) => f.to_bits().hash(state),
            CellValue::Bool(b) => b.hash(state),
            CellValue::Null => {}
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v:.4}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Null => write!(f, "<null>"),
        }
    }
}

impl CellValue {
    /// Try to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Full-precision text for export; nulls become empty fields.
    /// Floats always carry a decimal point so they reload as floats.
    pub fn to_field(&self) -> String {
        match self {
            CellValue::String(s) => s.clone(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Float(v) => format!("{v:?}"),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Null => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Arrow column helpers
// ---------------------------------------------------------------------------

/// Convert a whole Arrow column into cell values.
pub fn column_values(col: &ArrayRef) -> Vec<CellValue> {
    let n = col.len();
    match col.data_type() {
        DataType::Utf8 => {
            let s = col.as_string::<i32>();
            s.iter()
                .map(|v| v.map_or(CellValue::Null, |v| CellValue::String(v.to_string())))
                .collect()
        }
        DataType::LargeUtf8 => {
            let s = col.as_string::<i64>();
            s.iter()
                .map(|v| v.map_or(CellValue::Null, |v| CellValue::String(v.to_string())))
                .collect()
        }
        DataType::Boolean => col
            .as_boolean()
            .iter()
            .map(|v| v.map_or(CellValue::Null, CellValue::Bool))
            .collect(),
        dt if dt.is_integer() => match cast(col, &DataType::Int64) {
            Ok(ints) => ints
                .as_primitive::<Int64Type>()
                .iter()
                .map(|v| v.map_or(CellValue::Null, CellValue::Integer))
                .collect(),
            Err(_) => vec![CellValue::Null; n],
        },
        dt if dt.is_numeric() => match cast(col, &DataType::Float64) {
            Ok(floats) => floats
                .as_primitive::<Float64Type>()
                .iter()
                .map(|v| v.map_or(CellValue::Null, CellValue::Float))
                .collect(),
            Err(_) => vec![CellValue::Null; n],
        },
        other => match cast(col, &DataType::Utf8) {
            Ok(text) => column_values(&text),
            Err(_) => vec![CellValue::String(format!("{other:?}")); n],
        },
    }
}

/// Read a numeric column as `f64`, nulls as `NaN`.
///
/// A missing or non-numeric column is a configuration problem of whoever
/// asked for it, not of the table.
pub fn numeric_column(table: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let col = table
        .column_by_name(name)
        .ok_or_else(|| ExplorerError::configuration(format!("column '{name}' not found in table")))?;
    if !col.data_type().is_numeric() {
        return Err(ExplorerError::configuration(format!(
            "column '{name}' is not numeric ({:?})",
            col.data_type()
        )));
    }
    let floats = cast(col, &DataType::Float64)
        .map_err(|e| ExplorerError::configuration(format!("column '{name}': {e}")))?;
    Ok(floats
        .as_primitive::<Float64Type>()
        .iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

// ---------------------------------------------------------------------------
// TableSchema – comparable, serializable schema fingerprint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Column names and types of a table, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl From<&Schema> for TableSchema {
    fn from(schema: &Schema) -> Self {
        TableSchema {
            columns: schema
                .fields()
                .iter()
                .map(|f| ColumnSchema {
                    name: f.name().clone(),
                    data_type: format!("{:?}", f.data_type()),
                    nullable: f.is_nullable(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Column classification
// ---------------------------------------------------------------------------

/// Name hints used when splitting columns into features/categorical/others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnRoles {
    /// Columns treated as categorical regardless of their dtype.
    pub categorical: Vec<String>,
    /// Auxiliary columns that are neither features nor categories.
    pub others: Vec<String>,
}

impl Default for ColumnRoles {
    fn default() -> Self {
        Self {
            categorical: ["row", "column", "path_in_well", "plate_name", "source_name"]
                .map(String::from)
                .to_vec(),
            others: ["label", "image_url", "reference_label"]
                .map(String::from)
                .to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureFrame – a table plus its column classification
// ---------------------------------------------------------------------------

/// A feature table and the role of each of its columns.
///
/// Frames are cheap to clone (Arrow columns are reference counted) and are
/// never mutated in place: filters return new frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub table: RecordBatch,
    /// Numeric columns usable as plot axes and filter targets.
    pub features: Vec<String>,
    pub categorical: Vec<String>,
    pub others: Vec<String>,
}

impl FeatureFrame {
    /// Build a frame from an explicit classification, checking it against the
    /// table schema.
    pub fn new(
        table: RecordBatch,
        features: Vec<String>,
        categorical: Vec<String>,
        others: Vec<String>,
    ) -> Result<Self> {
        let frame = FeatureFrame {
            table,
            features,
            categorical,
            others,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Classify every column of `table` by dtype and the `roles` hints.
    pub fn classify(table: RecordBatch, roles: &ColumnRoles) -> Self {
        let mut features = Vec::new();
        let mut categorical = Vec::new();
        let mut others = Vec::new();

        for field in table.schema().fields() {
            let name = field.name().clone();
            let dt = field.data_type();
            if roles.others.contains(&name) {
                others.push(name);
            } else if roles.categorical.contains(&name)
                || matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Boolean)
            {
                categorical.push(name);
            } else if dt.is_numeric() {
                features.push(name);
            } else {
                others.push(name);
            }
        }

        FeatureFrame {
            table,
            features,
            categorical,
            others,
        }
    }

    /// Check that all listed columns exist and the role lists are disjoint.
    pub fn validate(&self) -> Result<()> {
        let schema = self.table.schema();
        let mut seen = BTreeSet::new();
        for name in self
            .features
            .iter()
            .chain(&self.categorical)
            .chain(&self.others)
        {
            if schema.index_of(name).is_err() {
                return Err(ExplorerError::invariant(format!(
                    "frame lists column '{name}' which the table does not have"
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(ExplorerError::invariant(format!(
                    "column '{name}' is listed under more than one role"
                )));
            }
        }
        Ok(())
    }

    /// Same classification over a new set of rows.
    pub fn with_table(&self, table: RecordBatch) -> Self {
        FeatureFrame {
            table,
            features: self.features.clone(),
            categorical: self.categorical.clone(),
            others: self.others.clone(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.table.schema().index_of(name).is_ok()
    }

    pub fn schema(&self) -> TableSchema {
        TableSchema::from(self.table.schema().as_ref())
    }

    /// All values of one row, in schema order.
    pub fn row_detail(&self, row: usize) -> Option<RowDetail> {
        if row >= self.num_rows() {
            return None;
        }
        let schema = self.table.schema();
        let values = schema
            .fields()
            .iter()
            .zip(self.table.columns())
            .map(|(field, col)| {
                let single = col.slice(row, 1);
                let value = column_values(&single)
                    .into_iter()
                    .next()
                    .unwrap_or(CellValue::Null);
                (field.name().clone(), value)
            })
            .collect();
        Some(RowDetail { row, values })
    }
}

/// One row shown in the out-of-band detail view after a point selection.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDetail {
    /// Row index in the frame the selection was made on.
    pub row: usize,
    pub values: Vec<(String, CellValue)>,
}

impl RowDetail {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }
}

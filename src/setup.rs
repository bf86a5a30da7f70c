//! Setup-stage selection: which plates, rows, columns, acquisitions and
//! wells to analyse, and an optional condition table joined onto the
//! feature table.
//!
//! ```text
//!   sources ──► load table ──► join condition table ──► classify ──► SetupSelection::apply ──► pipeline
//! ```
//!
//! The selection lives in the `setup` scope, so switching feature tables
//! keeps it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::{take, take_record_batch};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::data::model::{column_values, CellValue, FeatureFrame};
use crate::data::source::SOURCE_COLUMN;
use crate::error::{ExplorerError, Result};
use crate::filters::keep_rows;
use crate::state::{Scope, ScopedKey, ScopedStore};

pub const ACQUISITION_COLUMN: &str = "path_in_well";

/// Columns a condition table is matched on, when both tables have them.
pub const JOIN_KEYS: [&str; 4] = [SOURCE_COLUMN, "row", "column", ACQUISITION_COLUMN];

pub fn selection_key() -> ScopedKey {
    Scope::Setup.key("selection")
}

// ---------------------------------------------------------------------------
// Axes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupAxis {
    Plate,
    Row,
    Column,
    Acquisition,
    Well,
}

impl SetupAxis {
    pub const ALL: [SetupAxis; 5] = [
        SetupAxis::Plate,
        SetupAxis::Row,
        SetupAxis::Column,
        SetupAxis::Acquisition,
        SetupAxis::Well,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SetupAxis::Plate => "Plates",
            SetupAxis::Row => "Rows",
            SetupAxis::Column => "Columns",
            SetupAxis::Acquisition => "Acquisitions",
            SetupAxis::Well => "Wells",
        }
    }

    /// Per-row value of this axis, or `None` when the table lacks the
    /// columns it is built from. A well is its row name followed by its
    /// column number ("B03" stays "B03", row "B" column 3 gives "B3").
    fn row_values(self, table: &RecordBatch) -> Option<Vec<Option<String>>> {
        let single = |name: &str| -> Option<Vec<Option<String>>> {
            let col = table.column_by_name(name)?;
            Some(column_values(col).iter().map(key_text).collect())
        };
        match self {
            SetupAxis::Plate => single(SOURCE_COLUMN),
            SetupAxis::Row => single("row"),
            SetupAxis::Column => single("column"),
            SetupAxis::Acquisition => single(ACQUISITION_COLUMN),
            SetupAxis::Well => {
                let rows = single("row")?;
                let columns = single("column")?;
                Some(
                    rows.into_iter()
                        .zip(columns)
                        .map(|(r, c)| Some(format!("{}{}", r?, c?)))
                        .collect(),
                )
            }
        }
    }
}

/// Exact text of a key cell; nulls never match anything.
fn key_text(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Null => None,
        v => Some(v.to_field()),
    }
}

/// Distinct values of `axis` in `frame`, in natural order (numbers sort
/// numerically). Empty when the table has no such axis.
pub fn axis_options(frame: &FeatureFrame, axis: SetupAxis) -> Vec<String> {
    let direct = match axis {
        SetupAxis::Plate => Some(SOURCE_COLUMN),
        SetupAxis::Row => Some("row"),
        SetupAxis::Column => Some("column"),
        SetupAxis::Acquisition => Some(ACQUISITION_COLUMN),
        SetupAxis::Well => None,
    };
    match direct {
        Some(name) => {
            let Some(col) = frame.table.column_by_name(name) else {
                return Vec::new();
            };
            let distinct: BTreeSet<CellValue> = column_values(col).into_iter().collect();
            distinct.iter().filter_map(key_text).collect()
        }
        None => {
            let Some(values) = axis.row_values(&frame.table) else {
                return Vec::new();
            };
            let distinct: BTreeSet<String> = values.into_iter().flatten().collect();
            distinct.into_iter().collect()
        }
    }
}

// ---------------------------------------------------------------------------
// SetupSelection
// ---------------------------------------------------------------------------

/// What the user picked on the setup page.
///
/// An axis without an entry is unrestricted. An entry with an empty set
/// selects nothing, the same as a set filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupSelection {
    pub choices: BTreeMap<SetupAxis, BTreeSet<String>>,
    /// Table joined onto the feature table on the shared well keys.
    pub condition_table: Option<String>,
}

impl SetupSelection {
    pub fn load(store: &ScopedStore) -> Self {
        store.get(&selection_key(), SetupSelection::default())
    }

    pub fn save(&self, store: &mut ScopedStore) -> Result<()> {
        store.set(&selection_key(), self)
    }

    pub fn is_restricted(&self) -> bool {
        !self.choices.is_empty()
    }

    pub fn is_selected(&self, axis: SetupAxis, value: &str) -> bool {
        self.choices
            .get(&axis)
            .map_or(true, |chosen| chosen.contains(value))
    }

    /// Flip one value. `options` is every value the axis offers; selecting
    /// all of them again lifts the restriction.
    pub fn toggle(&mut self, axis: SetupAxis, value: &str, options: &[String]) {
        let chosen = self
            .choices
            .entry(axis)
            .or_insert_with(|| options.iter().cloned().collect());
        if !chosen.remove(value) {
            chosen.insert(value.to_string());
        }
        if options.iter().all(|o| chosen.contains(o)) {
            self.choices.remove(&axis);
        }
    }

    pub fn select_all(&mut self, axis: SetupAxis) {
        self.choices.remove(&axis);
    }

    pub fn select_none(&mut self, axis: SetupAxis) {
        self.choices.insert(axis, BTreeSet::new());
    }

    /// Keep the rows matching every restricted axis.
    pub fn apply(&self, frame: &FeatureFrame) -> Result<FeatureFrame> {
        if !self.is_restricted() {
            return Ok(frame.clone());
        }
        let mut mask = vec![true; frame.num_rows()];
        for (axis, chosen) in &self.choices {
            let values = axis.row_values(&frame.table).ok_or_else(|| {
                ExplorerError::configuration(format!(
                    "the table has no {} to select from",
                    axis.label().to_lowercase()
                ))
            })?;
            for (keep, value) in mask.iter_mut().zip(values) {
                *keep &= value.is_some_and(|v| chosen.contains(&v));
            }
        }
        keep_rows(frame, mask)
    }
}

// ---------------------------------------------------------------------------
// Condition tables
// ---------------------------------------------------------------------------

/// Inner join of `conditions` onto `features` on the [`JOIN_KEYS`] both
/// tables carry; `row` and `column` are required.
///
/// Feature columns come first; condition columns that the feature table
/// already has are not repeated. Rows without a matching condition are
/// dropped, and a feature row matching several conditions appears once per
/// match.
pub fn join_condition_table(features: &RecordBatch, conditions: &RecordBatch) -> Result<RecordBatch> {
    let keys: Vec<&str> = JOIN_KEYS
        .into_iter()
        .filter(|k| features.column_by_name(k).is_some() && conditions.column_by_name(k).is_some())
        .collect();
    for required in ["row", "column"] {
        if !keys.contains(&required) {
            return Err(ExplorerError::configuration(format!(
                "condition table and feature table must both have a '{required}' column"
            )));
        }
    }

    let mut index: HashMap<Vec<String>, Vec<u32>> = HashMap::new();
    for (row, key) in join_keys(conditions, &keys).into_iter().enumerate() {
        if let Some(key) = key {
            index.entry(key).or_default().push(row as u32);
        }
    }

    let mut feature_rows = Vec::new();
    let mut condition_rows = Vec::new();
    for (row, key) in join_keys(features, &keys).into_iter().enumerate() {
        let Some(matches) = key.and_then(|k| index.get(&k)) else {
            continue;
        };
        for &c in matches {
            feature_rows.push(row as u32);
            condition_rows.push(c);
        }
    }
    log::info!(
        "Joined condition table on {keys:?}: {} of {} feature rows matched",
        feature_rows.len(),
        features.num_rows()
    );

    let arrow_err = |e: arrow::error::ArrowError| ExplorerError::invariant(format!("joining condition table: {e}"));
    let feature_rows = UInt32Array::from(feature_rows);
    let condition_rows = UInt32Array::from(condition_rows);
    let joined = take_record_batch(features, &feature_rows).map_err(arrow_err)?;

    let mut fields: Vec<Field> = joined.schema().fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut columns: Vec<ArrayRef> = joined.columns().to_vec();
    let condition_schema = conditions.schema();
    for (field, column) in condition_schema.fields().iter().zip(conditions.columns()) {
        if features.column_by_name(field.name()).is_some() {
            continue;
        }
        columns.push(take(column.as_ref(), &condition_rows, None).map_err(arrow_err)?);
        fields.push(field.as_ref().clone().with_nullable(true));
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).map_err(arrow_err)
}

fn join_keys(table: &RecordBatch, keys: &[&str]) -> Vec<Option<Vec<String>>> {
    let columns: Vec<Vec<CellValue>> = keys
        .iter()
        .filter_map(|k| table.column_by_name(k))
        .map(column_values)
        .collect();
    (0..table.num_rows())
        .map(|row| columns.iter().map(|c| key_text(&c[row])).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use arrow::datatypes::DataType;

    use super::*;
    use crate::data::model::tests::sample_table;
    use crate::data::model::{numeric_column, ColumnRoles};

    fn frame() -> FeatureFrame {
        FeatureFrame::classify(sample_table(), &ColumnRoles::default())
    }

    fn conditions() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("row", DataType::Utf8, false),
            Field::new("column", DataType::Int64, false),
            Field::new("drug", DataType::Utf8, false),
            Field::new("dose", DataType::Float64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["A", "B", "C"])),
                Arc::new(Int64Array::from(vec![1, 2, 1])),
                Arc::new(StringArray::from(vec!["dmso", "taxol", "dmso"])),
                Arc::new(Float64Array::from(vec![0.0, 1.5, 0.0])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn options_list_each_axis_in_order() {
        let frame = frame();
        assert_eq!(axis_options(&frame, SetupAxis::Row), vec!["A", "B"]);
        assert_eq!(axis_options(&frame, SetupAxis::Column), vec!["1", "2"]);
        assert_eq!(axis_options(&frame, SetupAxis::Well), vec!["A1", "A2", "B1", "B2"]);
        assert!(axis_options(&frame, SetupAxis::Acquisition).is_empty());
    }

    #[test]
    fn selection_keeps_matching_wells() {
        let frame = frame();
        let mut selection = SetupSelection::default();
        assert_eq!(selection.apply(&frame).unwrap(), frame);

        let wells = axis_options(&frame, SetupAxis::Well);
        selection.toggle(SetupAxis::Well, "A2", &wells);
        selection.toggle(SetupAxis::Well, "B1", &wells);
        assert!(!selection.is_selected(SetupAxis::Well, "A2"));
        let out = selection.apply(&frame).unwrap();
        assert_eq!(numeric_column(&out.table, "intensity").unwrap(), vec![10.0, 40.0]);

        let rows = axis_options(&frame, SetupAxis::Row);
        selection.toggle(SetupAxis::Row, "A", &rows);
        assert_eq!(selection.apply(&frame).unwrap().num_rows(), 1);

        // everything picked again lifts the restriction
        selection.toggle(SetupAxis::Row, "A", &rows);
        assert!(!selection.choices.contains_key(&SetupAxis::Row));

        selection.select_none(SetupAxis::Column);
        assert_eq!(selection.apply(&frame).unwrap().num_rows(), 0);
        selection.select_all(SetupAxis::Column);
        assert_eq!(selection.apply(&frame).unwrap().num_rows(), 2);
    }

    #[test]
    fn selecting_an_absent_axis_is_a_configuration_error() {
        let mut selection = SetupSelection::default();
        selection.select_none(SetupAxis::Acquisition);
        assert!(matches!(
            selection.apply(&frame()),
            Err(ExplorerError::Configuration(_))
        ));
    }

    #[test]
    fn selection_survives_the_store() {
        let mut store = ScopedStore::new();
        let mut selection = SetupSelection {
            condition_table: Some("conditions".into()),
            ..Default::default()
        };
        selection.select_none(SetupAxis::Plate);
        selection.save(&mut store).unwrap();
        assert_eq!(SetupSelection::load(&store), selection);
        assert_eq!(store.scope_len(Scope::Setup), 1);
    }

    #[test]
    fn condition_table_is_inner_joined_on_well_keys() {
        let joined = join_condition_table(&sample_table(), &conditions()).unwrap();
        // A1 and B2 have conditions, A2 and B1 do not
        assert_eq!(joined.num_rows(), 2);
        assert_eq!(numeric_column(&joined, "intensity").unwrap(), vec![10.0, 40.0]);
        assert_eq!(numeric_column(&joined, "dose").unwrap(), vec![0.0, 1.5]);
        let names: Vec<String> = joined.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names.iter().filter(|n| *n == "row").count(), 1);
        assert_eq!(names.last().map(String::as_str), Some("dose"));
    }

    #[test]
    fn condition_table_needs_row_and_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("row", DataType::Utf8, false)]));
        let rows_only =
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["A"]))]).unwrap();
        assert!(matches!(
            join_condition_table(&sample_table(), &rows_only),
            Err(ExplorerError::Configuration(_))
        ));
    }
}

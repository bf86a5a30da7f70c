/// Filters: typed, serializable row predicates over a [`FeatureFrame`].
///
/// ```text
///   FeatureFrame ──► FilterSpec::apply ──► FeatureFrame (new, fewer rows)
///
///   FilterPipeline: [#1 Scatter Plot 1] ─► [#2 Range Filter 1] ─► ... ─► view
/// ```
///
/// Every variant implements [`Filter`]; the pipeline and the host only talk
/// to that interface.
pub mod pipeline;
pub mod polygon;
pub mod predicate;

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use serde::{Deserialize, Serialize};

use crate::data::model::FeatureFrame;
use crate::error::{ExplorerError, Result};

pub use pipeline::{FilterEntry, FilterId, FilterPipeline, PipelineOutcome, StageReport};
pub use polygon::{PolygonSelectionFilter, ScatterView, SelectionEvent, SelectionOutcome};
pub use predicate::{RangeFilter, SetFilter};

// ---------------------------------------------------------------------------
// Filter capability
// ---------------------------------------------------------------------------

pub trait Filter {
    /// Prefix of auto-generated names ("Scatter Plot", "Range Filter", ...).
    fn kind_name(&self) -> &'static str;

    /// Columns this filter reads.
    fn columns(&self) -> Vec<&str>;

    /// Pure: returns a new frame, never touches `frame`.
    fn apply(&self, frame: &FeatureFrame) -> Result<FeatureFrame>;

    /// Whether applying the filter can drop rows at all.
    fn is_active(&self) -> bool {
        true
    }

    /// Reject parameters that would not survive a trip through the session
    /// store (JSON has no NaN or infinity).
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FilterSpec – the persisted, tagged form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    PolygonSelection(PolygonSelectionFilter),
    Range(RangeFilter),
    Set(SetFilter),
}

impl FilterSpec {
    pub fn as_filter(&self) -> &dyn Filter {
        match self {
            FilterSpec::PolygonSelection(f) => f,
            FilterSpec::Range(f) => f,
            FilterSpec::Set(f) => f,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.as_filter().kind_name()
    }

    pub fn apply(&self, frame: &FeatureFrame) -> Result<FeatureFrame> {
        self.as_filter().apply(frame)
    }

    pub fn validate(&self) -> Result<()> {
        self.as_filter().validate()
    }

    pub fn as_polygon(&self) -> Option<&PolygonSelectionFilter> {
        match self {
            FilterSpec::PolygonSelection(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_polygon_mut(&mut self) -> Option<&mut PolygonSelectionFilter> {
        match self {
            FilterSpec::PolygonSelection(f) => Some(f),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Fail with a configuration error when `frame` lacks any of `columns`.
pub(crate) fn require_columns(frame: &FeatureFrame, columns: &[&str]) -> Result<()> {
    match columns.iter().find(|c| !frame.has_column(c)) {
        Some(missing) => Err(ExplorerError::configuration(format!(
            "filter references column '{missing}' which is not in the current table"
        ))),
        None => Ok(()),
    }
}

/// Keep the rows where `mask` is true.
pub(crate) fn keep_rows(frame: &FeatureFrame, mask: Vec<bool>) -> Result<FeatureFrame> {
    let mask = BooleanArray::from(mask);
    let table = filter_record_batch(&frame.table, &mask)
        .map_err(|e| ExplorerError::invariant(format!("applying row mask: {e}")))?;
    Ok(frame.with_table(table))
}

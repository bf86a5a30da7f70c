use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{keep_rows, require_columns, Filter};
use crate::data::model::{column_values, numeric_column, CellValue, FeatureFrame};
use crate::error::{ExplorerError, Result};

// ---------------------------------------------------------------------------
// RangeFilter – inclusive numeric range on one column
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub column: String,
    pub min: f64,
    pub max: f64,
}

impl RangeFilter {
    pub fn new(column: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            column: column.into(),
            min,
            max,
        }
    }

    /// Range covering every finite value of `column` in `frame`.
    pub fn spanning(frame: &FeatureFrame, column: &str) -> Result<Self> {
        let values = numeric_column(&frame.table, column)?;
        let (min, max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if min > max {
            // no values at all
            return Ok(Self::new(column, 0.0, 0.0));
        }
        Ok(Self::new(column, min, max))
    }
}

impl Filter for RangeFilter {
    fn kind_name(&self) -> &'static str {
        "Range Filter"
    }

    fn columns(&self) -> Vec<&str> {
        vec![self.column.as_str()]
    }

    fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(ExplorerError::configuration(format!(
                "invalid range [{}, {}] for column '{}'",
                self.min, self.max, self.column
            )));
        }
        Ok(())
    }

    /// Keeps `min <= value <= max`; nulls are dropped.
    fn apply(&self, frame: &FeatureFrame) -> Result<FeatureFrame> {
        require_columns(frame, &self.columns())?;
        self.validate()?;
        let values = numeric_column(&frame.table, &self.column)?;
        let mask = values
            .iter()
            .map(|&v| v >= self.min && v <= self.max)
            .collect();
        keep_rows(frame, mask)
    }
}

// ---------------------------------------------------------------------------
// SetFilter – membership in a set of allowed values
// ---------------------------------------------------------------------------

/// Keeps rows whose value is one of `allowed`.
/// An empty set means nothing is selected, so no row passes. NaN and
/// infinite floats can never be members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetFilter {
    pub column: String,
    pub allowed: BTreeSet<CellValue>,
}

impl SetFilter {
    pub fn new(column: impl Into<String>, allowed: impl IntoIterator<Item = CellValue>) -> Self {
        Self {
            column: column.into(),
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Distinct values of `column`, i.e. a set filter that lets everything
    /// through.
    pub fn all_values(frame: &FeatureFrame, column: &str) -> Result<Self> {
        require_columns(frame, &[column])?;
        let values = frame
            .table
            .column_by_name(column)
            .map(column_values)
            .unwrap_or_default();
        Ok(Self::new(column, values.into_iter().filter(is_member_value)))
    }

    pub fn toggle(&mut self, value: &CellValue) {
        if !self.allowed.remove(value) && is_member_value(value) {
            self.allowed.insert(value.clone());
        }
    }
}

fn is_member_value(value: &CellValue) -> bool {
    !matches!(value, CellValue::Float(v) if !v.is_finite())
}

impl Filter for SetFilter {
    fn kind_name(&self) -> &'static str {
        "Set Filter"
    }

    fn columns(&self) -> Vec<&str> {
        vec![self.column.as_str()]
    }

    fn validate(&self) -> Result<()> {
        match self.allowed.iter().find(|v| !is_member_value(v)) {
            Some(v) => Err(ExplorerError::configuration(format!(
                "set filter on '{}' cannot hold the value {v}",
                self.column
            ))),
            None => Ok(()),
        }
    }

    fn apply(&self, frame: &FeatureFrame) -> Result<FeatureFrame> {
        require_columns(frame, &self.columns())?;
        self.validate()?;
        let Some(col) = frame.table.column_by_name(&self.column) else {
            return Err(ExplorerError::configuration(format!(
                "column '{}' not found in table",
                self.column
            )));
        };
        let mask = column_values(col)
            .iter()
            .map(|v| self.allowed.contains(v))
            .collect();
        keep_rows(frame, mask)
    }
}

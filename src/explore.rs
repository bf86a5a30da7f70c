//! Explore page: free-standing plots over the filtered view.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::data::model::{column_values, numeric_column, CellValue, FeatureFrame};
use crate::error::{ExplorerError, Result};
use crate::naming::unique_name;
use crate::state::{Scope, ScopedKey, ScopedStore};

pub fn plots_key() -> ScopedKey {
    Scope::Explore.key("plots")
}

// ---------------------------------------------------------------------------
// Plot kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Aggregation {
    #[default]
    Mean,
    Sum,
    Median,
    Counts,
}

impl Aggregation {
    pub const ALL: [Aggregation; 4] = [
        Aggregation::Mean,
        Aggregation::Sum,
        Aggregation::Median,
        Aggregation::Counts,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Aggregation::Mean => "Mean",
            Aggregation::Sum => "Sum",
            Aggregation::Median => "Median",
            Aggregation::Counts => "Counts",
        }
    }

    /// Aggregate the non-null values of one cell. `None` when the cell has
    /// nothing to average.
    fn reduce(self, values: &[f64]) -> Option<f64> {
        match self {
            Aggregation::Counts => Some(values.len() as f64),
            Aggregation::Sum => Some(values.iter().sum()),
            Aggregation::Mean if values.is_empty() => None,
            Aggregation::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Median => {
                if values.is_empty() {
                    return None;
                }
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                Some(if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlotKind {
    Scatter {
        x: String,
        y: String,
    },
    HeatMap {
        value: String,
        x_axis: String,
        y_axis: String,
        #[serde(default)]
        aggregation: Aggregation,
    },
}

impl PlotKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PlotKind::Scatter { .. } => "Scatter Plot",
            PlotKind::HeatMap { .. } => "Heat Map",
        }
    }

    /// Sensible first plot of this kind for `frame`: first features, and the
    /// `row`/`column` axes when present.
    pub fn default_scatter(frame: &FeatureFrame) -> Option<Self> {
        let x = frame.features.first()?.clone();
        let y = frame.features.get(1).unwrap_or(&x).clone();
        Some(PlotKind::Scatter { x, y })
    }

    pub fn default_heat_map(frame: &FeatureFrame) -> Option<Self> {
        let value = frame.features.first()?.clone();
        let pick = |preferred: &str, skip: Option<&str>| {
            if frame.categorical.iter().any(|c| c == preferred) && skip != Some(preferred) {
                return Some(preferred.to_string());
            }
            frame
                .categorical
                .iter()
                .find(|c| Some(c.as_str()) != skip)
                .cloned()
        };
        let x_axis = pick("row", None)?;
        let y_axis = pick("column", Some(x_axis.as_str()))?;
        Some(PlotKind::HeatMap {
            value,
            x_axis,
            y_axis,
            aggregation: Aggregation::Mean,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorePlot {
    pub name: String,
    pub kind: PlotKind,
}

// ---------------------------------------------------------------------------
// PlotRegistry – persisted under `explore:plots`
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotRegistry {
    pub plots: Vec<ExplorePlot>,
}

impl PlotRegistry {
    pub fn load(store: &ScopedStore) -> Result<Self> {
        Ok(store.try_get(&plots_key())?.unwrap_or_default())
    }

    pub fn save(&self, store: &mut ScopedStore) -> Result<()> {
        store.set(&plots_key(), self)
    }

    /// Append a plot named "{kind} {n}" and return the name.
    pub fn add(&mut self, kind: PlotKind) -> String {
        let prefix = kind.kind_name();
        let name = unique_name(self.plots.iter().map(|p| p.name.as_str()), prefix);
        self.plots.push(ExplorePlot {
            name: name.clone(),
            kind,
        });
        name
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.plots.len();
        self.plots.retain(|p| p.name != name);
        before != self.plots.len()
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ExplorePlot> {
        self.plots.iter_mut().find(|p| p.name == name)
    }

    /// Change what plot `name` shows. The name stays, even when the plot
    /// changes kind.
    pub fn update(&mut self, name: &str, kind: PlotKind) -> Result<()> {
        let plot = self
            .get_mut(name)
            .ok_or_else(|| ExplorerError::configuration(format!("no plot named '{name}'")))?;
        plot.kind = kind;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Heat map
// ---------------------------------------------------------------------------

/// Dense pivot of one feature over two categorical axes.
/// `values[i][j]` belongs to `x_labels[i]` and `y_labels[j]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatMapGrid {
    pub x_labels: Vec<CellValue>,
    pub y_labels: Vec<CellValue>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl HeatMapGrid {
    /// Finite `(min, max)` over all filled cells.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .flatten()
            .flatten()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

pub fn heat_map(
    frame: &FeatureFrame,
    value: &str,
    x_axis: &str,
    y_axis: &str,
    aggregation: Aggregation,
) -> Result<HeatMapGrid> {
    if x_axis == y_axis {
        return Err(ExplorerError::configuration(
            "heat map axes must be two different columns",
        ));
    }
    let values = numeric_column(&frame.table, value)?;
    let axis = |name: &str| {
        frame
            .table
            .column_by_name(name)
            .map(column_values)
            .ok_or_else(|| ExplorerError::configuration(format!("column '{name}' not found in table")))
    };
    let xs = axis(x_axis)?;
    let ys = axis(y_axis)?;

    let mut groups: BTreeMap<(&CellValue, &CellValue), Vec<f64>> = BTreeMap::new();
    for ((x, y), v) in xs.iter().zip(&ys).zip(&values) {
        let cell = groups.entry((x, y)).or_default();
        if !v.is_nan() {
            cell.push(*v);
        }
    }

    let x_labels: Vec<CellValue> = xs.iter().collect::<BTreeSet<_>>().into_iter().cloned().collect();
    let y_labels: Vec<CellValue> = ys.iter().collect::<BTreeSet<_>>().into_iter().cloned().collect();
    let values = x_labels
        .iter()
        .map(|x| {
            y_labels
                .iter()
                .map(|y| groups.get(&(x, y)).and_then(|cell| aggregation.reduce(cell)))
                .collect()
        })
        .collect();

    Ok(HeatMapGrid {
        x_labels,
        y_labels,
        values,
    })
}

use serde::{Deserialize, Serialize};

use super::{keep_rows, require_columns, Filter};
use crate::data::model::{numeric_column, FeatureFrame};
use crate::data::sampling::{DisplaySample, DisplaySampling};
use crate::error::{ExplorerError, Result};

// ---------------------------------------------------------------------------
// PolygonSelectionFilter
// ---------------------------------------------------------------------------

/// Keeps rows whose `(column_x, column_y)` point lies inside a polygon drawn
/// on a scatter plot.
///
/// The polygon is implicitly closed. Points on an edge or a vertex count as
/// inside. Rows with a null or NaN coordinate are always outside.
/// An empty polygon selects nothing yet, so the filter passes every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolygonRecord", into = "PolygonRecord")]
pub struct PolygonSelectionFilter {
    pub column_x: String,
    pub column_y: String,
    vertices: Vec<(f64, f64)>,
}

/// Persisted form: parallel coordinate lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolygonRecord {
    column_x: String,
    column_y: String,
    #[serde(default)]
    vertices_x: Vec<f64>,
    #[serde(default)]
    vertices_y: Vec<f64>,
}

impl TryFrom<PolygonRecord> for PolygonSelectionFilter {
    type Error = ExplorerError;

    fn try_from(record: PolygonRecord) -> Result<Self> {
        let vertices = zip_coordinates(&record.vertices_x, &record.vertices_y)?;
        Ok(Self {
            column_x: record.column_x,
            column_y: record.column_y,
            vertices,
        })
    }
}

impl From<PolygonSelectionFilter> for PolygonRecord {
    fn from(filter: PolygonSelectionFilter) -> Self {
        let (vertices_x, vertices_y) = filter.vertices.into_iter().unzip();
        PolygonRecord {
            column_x: filter.column_x,
            column_y: filter.column_y,
            vertices_x,
            vertices_y,
        }
    }
}

fn zip_coordinates(xs: &[f64], ys: &[f64]) -> Result<Vec<(f64, f64)>> {
    if xs.len() != ys.len() {
        return Err(ExplorerError::configuration(format!(
            "polygon has {} x coordinates but {} y coordinates",
            xs.len(),
            ys.len()
        )));
    }
    if xs.iter().chain(ys).any(|v| !v.is_finite()) {
        return Err(ExplorerError::configuration(
            "polygon vertices must be finite numbers",
        ));
    }
    Ok(xs.iter().copied().zip(ys.iter().copied()).collect())
}

impl PolygonSelectionFilter {
    /// A filter on two columns with no polygon drawn yet.
    pub fn new(column_x: impl Into<String>, column_y: impl Into<String>) -> Self {
        Self {
            column_x: column_x.into(),
            column_y: column_y.into(),
            vertices: Vec::new(),
        }
    }

    pub fn with_vertices(mut self, vertices: Vec<(f64, f64)>) -> Self {
        self.vertices = vertices;
        self
    }

    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    /// Closed outline for drawing (first vertex repeated at the end).
    pub fn outline(&self) -> Vec<[f64; 2]> {
        let mut line: Vec<[f64; 2]> = self.vertices.iter().map(|&(x, y)| [x, y]).collect();
        if let Some(&first) = line.first() {
            line.push(first);
        }
        line
    }

    /// Apply a selection event coming from the scatter plot.
    ///
    /// Region events replace the polygon. A rejected event leaves it as it
    /// was.
    pub fn handle(&mut self, event: SelectionEvent) -> Result<SelectionOutcome> {
        match event {
            SelectionEvent::Lasso { xs, ys } => {
                let mut vertices = zip_coordinates(&xs, &ys)?;
                // lasso paths usually come back closed
                if vertices.len() > 1 && vertices.first() == vertices.last() {
                    vertices.pop();
                }
                self.replace_region(vertices)
            }
            SelectionEvent::Box { x, y } => {
                // min/max would silently drop a NaN bound
                if x.iter().chain(&y).any(|v| !v.is_finite()) {
                    return Err(ExplorerError::configuration(
                        "box selection must have finite bounds",
                    ));
                }
                let (x0, x1) = (x[0].min(x[1]), x[0].max(x[1]));
                let (y0, y1) = (y[0].min(y[1]), y[0].max(y[1]));
                self.replace_region(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
            }
            SelectionEvent::Point { index } => Ok(SelectionOutcome::PointSelected(index)),
            SelectionEvent::Clear => {
                self.vertices.clear();
                Ok(SelectionOutcome::Cleared)
            }
        }
    }

    fn replace_region(&mut self, vertices: Vec<(f64, f64)>) -> Result<SelectionOutcome> {
        if vertices.len() < 3 {
            return Err(ExplorerError::configuration(format!(
                "selection region needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        self.vertices = vertices;
        Ok(SelectionOutcome::PolygonUpdated)
    }
}

impl Filter for PolygonSelectionFilter {
    fn kind_name(&self) -> &'static str {
        "Scatter Plot"
    }

    fn columns(&self) -> Vec<&str> {
        vec![self.column_x.as_str(), self.column_y.as_str()]
    }

    fn is_active(&self) -> bool {
        !self.vertices.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(ExplorerError::configuration(
                "polygon vertices must be finite numbers",
            ));
        }
        Ok(())
    }

    fn apply(&self, frame: &FeatureFrame) -> Result<FeatureFrame> {
        match self.vertices.len() {
            0 => return Ok(frame.clone()),
            1 | 2 => {
                return Err(ExplorerError::configuration(
                    "polygon needs at least 3 vertices",
                ))
            }
            _ => {}
        }
        require_columns(frame, &self.columns())?;
        let xs = numeric_column(&frame.table, &self.column_x)?;
        let ys = numeric_column(&frame.table, &self.column_y)?;
        let mask = xs
            .iter()
            .zip(&ys)
            .map(|(&x, &y)| point_in_polygon(x, y, &self.vertices))
            .collect();
        keep_rows(frame, mask)
    }
}

// ---------------------------------------------------------------------------
// Containment
// ---------------------------------------------------------------------------

/// Crossing-number test with an inclusive boundary.
pub fn point_in_polygon(x: f64, y: f64, polygon: &[(f64, f64)]) -> bool {
    if !x.is_finite() || !y.is_finite() || polygon.len() < 3 {
        return false;
    }
    let n = polygon.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if on_segment(x, y, (xj, yj), (xi, yi)) {
            return true;
        }
        if (yi > y) != (yj > y) {
            let x_cross = xj + (y - yj) * (xi - xj) / (yi - yj);
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Whether `(x, y)` lies on the closed segment `a`-`b`.
fn on_segment(x: f64, y: f64, a: (f64, f64), b: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (y - a.1) - (b.1 - a.1) * (x - a.0);
    if cross != 0.0 {
        return false;
    }
    x >= a.0.min(b.0) && x <= a.0.max(b.0) && y >= a.1.min(b.1) && y <= a.1.max(b.1)
}

// ---------------------------------------------------------------------------
// Selection events
// ---------------------------------------------------------------------------

/// What the scatter plot reports back after user interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionEvent {
    /// Free-hand region, as parallel coordinate lists.
    Lasso { xs: Vec<f64>, ys: Vec<f64> },
    /// Rectangle given by two x and two y bounds in any order.
    Box { x: [f64; 2], y: [f64; 2] },
    /// A single clicked point, indexed into the *drawn* points.
    Point { index: usize },
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    PolygonUpdated,
    Cleared,
    PointSelected(usize),
}

// ---------------------------------------------------------------------------
// ScatterView – what the host draws for one polygon filter
// ---------------------------------------------------------------------------

/// Points of a polygon filter's input frame, possibly sampled, plus the
/// current outline.
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterView {
    pub points: Vec<[f64; 2]>,
    pub sample: DisplaySample,
    pub outline: Vec<[f64; 2]>,
    /// Rows of the input frame before sampling.
    pub total_rows: usize,
}

impl ScatterView {
    /// Build the drawable view of `input`, the frame the filter receives.
    ///
    /// Rows with a missing coordinate are still listed (as NaN) so display
    /// indices line up with sample positions.
    pub fn build(
        filter: &PolygonSelectionFilter,
        input: &FeatureFrame,
        sampling: &DisplaySampling,
    ) -> Result<Self> {
        require_columns(input, &filter.columns())?;
        let total_rows = input.num_rows();
        let sample = sampling.plan(total_rows);
        let drawn = sample.apply(input)?;
        let xs = numeric_column(&drawn.table, &filter.column_x)?;
        let ys = numeric_column(&drawn.table, &filter.column_y)?;
        let points = xs.into_iter().zip(ys).map(|(x, y)| [x, y]).collect();
        Ok(Self {
            points,
            sample,
            outline: filter.outline(),
            total_rows,
        })
    }

    /// Frame row behind drawn point `display_index`.
    pub fn frame_row(&self, display_index: usize) -> Option<usize> {
        self.sample
            .frame_row(display_index)
            .filter(|&row| row < self.total_rows)
    }
}

use arrow::array::UInt64Array;
use arrow::compute::take_record_batch;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::model::FeatureFrame;
use crate::error::{ExplorerError, Result};

/// Row count above which sampling kicks in by default.
pub const DEFAULT_MAX_POINTS: usize = 50_000;

// ---------------------------------------------------------------------------
// Display sampling settings
// ---------------------------------------------------------------------------

/// How many points a scatter view renders.
///
/// Sampling only ever affects what is drawn. Filters downstream always see
/// the full logical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySampling {
    pub enabled: bool,
    pub max_points: usize,
    /// Fraction of rows to draw, chosen by the user. `None` means "cap at
    /// `max_points`".
    pub fraction: Option<f64>,
    pub seed: u64,
}

impl Default for DisplaySampling {
    fn default() -> Self {
        Self {
            enabled: true,
            max_points: DEFAULT_MAX_POINTS,
            fraction: None,
            seed: 0,
        }
    }
}

impl DisplaySampling {
    /// Number of rows to draw out of `population`.
    pub fn sample_size(&self, population: usize) -> usize {
        if !self.enabled {
            return population;
        }
        match self.fraction {
            Some(f) => ((f.clamp(0.0, 1.0) * population as f64).floor() as usize).min(population),
            None => population.min(self.max_points),
        }
    }

    /// Fraction a slider should start at for `population` rows.
    pub fn default_fraction(&self, population: usize) -> f64 {
        if population > self.max_points {
            self.max_points as f64 / population as f64
        } else {
            1.0
        }
    }

    /// Decide which rows of a `population`-row frame get drawn.
    pub fn plan(&self, population: usize) -> DisplaySample {
        let amount = self.sample_size(population);
        if amount >= population {
            return DisplaySample { rows: None };
        }
        DisplaySample {
            rows: Some(sample_indices(population, amount, self.seed)),
        }
    }
}

/// Sorted, distinct row indices drawn with a fixed seed.
///
/// Pure function of `(population, amount, seed)`.
pub fn sample_indices(population: usize, amount: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, population, amount.min(population)).into_vec();
    picked.sort_unstable();
    picked
}

// ---------------------------------------------------------------------------
// DisplaySample – the rendered subset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySample {
    /// Frame rows that are drawn, or `None` for all of them.
    pub rows: Option<Vec<usize>>,
}

impl DisplaySample {
    pub fn is_sampled(&self) -> bool {
        self.rows.is_some()
    }

    /// Map the index of a drawn point back to its frame row.
    pub fn frame_row(&self, display_index: usize) -> Option<usize> {
        match &self.rows {
            Some(rows) => rows.get(display_index).copied(),
            None => Some(display_index),
        }
    }

    /// The drawn subset as its own frame, for rendering only.
    pub fn apply(&self, frame: &FeatureFrame) -> Result<FeatureFrame> {
        let Some(rows) = &self.rows else {
            return Ok(frame.clone());
        };
        let indices = UInt64Array::from(rows.iter().map(|&r| r as u64).collect::<Vec<_>>());
        let table = take_record_batch(&frame.table, &indices)
            .map_err(|e| ExplorerError::invariant(format!("sampling rows: {e}")))?;
        Ok(frame.with_table(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_give_identical_samples() {
        let a = sample_indices(200_000, 50_000, 0);
        let b = sample_indices(200_000, 50_000, 0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 50_000);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_ne!(a, sample_indices(200_000, 50_000, 1));
    }

    #[test]
    fn small_populations_are_not_sampled() {
        let sampling = DisplaySampling::default();
        assert_eq!(sampling.plan(1_000), DisplaySample { rows: None });
        assert_eq!(sampling.default_fraction(1_000), 1.0);
        assert_eq!(sampling.default_fraction(100_000), 0.5);
    }

    #[test]
    fn cap_and_fraction_bound_the_sample() {
        let capped = DisplaySampling::default();
        assert_eq!(capped.sample_size(120_000), DEFAULT_MAX_POINTS);

        let fraction = DisplaySampling {
            fraction: Some(0.25),
            ..Default::default()
        };
        assert_eq!(fraction.sample_size(1_000), 250);

        let disabled = DisplaySampling {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(disabled.sample_size(120_000), 120_000);
    }

    #[test]
    fn frame_rows_map_through_the_sample() {
        let sample = DisplaySampling {
            fraction: Some(0.5),
            ..Default::default()
        }
        .plan(10);
        let rows = sample.rows.clone().unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(sample.frame_row(2), Some(rows[2]));
        assert_eq!(sample.frame_row(5), None);
        assert_eq!(DisplaySample { rows: None }.frame_row(7), Some(7));
    }

    #[test]
    fn applying_a_sample_takes_the_drawn_rows() {
        use crate::data::model::tests::sample_table;
        use crate::data::model::{numeric_column, ColumnRoles};

        let frame = FeatureFrame::classify(sample_table(), &ColumnRoles::default());
        let sample = DisplaySample {
            rows: Some(vec![1, 3]),
        };
        let drawn = sample.apply(&frame).unwrap();
        assert_eq!(
            numeric_column(&drawn.table, "intensity").unwrap(),
            vec![20.0, 40.0]
        );
        assert_eq!(DisplaySample { rows: None }.apply(&frame).unwrap(), frame);
    }
}

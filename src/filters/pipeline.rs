use std::fmt;

use serde::{Deserialize, Serialize};

use super::FilterSpec;
use crate::data::model::FeatureFrame;
use crate::data::sampling::DisplaySampling;
use crate::error::{ExplorerError, Result};
use crate::naming::unique_name;

/// Stable handle of a pipeline entry. Never reused within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilterId(pub u64);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterEntry {
    pub name: String,
    pub spec: FilterSpec,
    pub enabled: bool,
    /// How the entry's scatter view samples its input. Display only.
    #[serde(default)]
    pub sampling: DisplaySampling,
}

// ---------------------------------------------------------------------------
// FilterPipeline
// ---------------------------------------------------------------------------

/// Ordered, user-editable chain of filters.
///
/// Entry `k` receives the output of entry `k - 1`; disabled entries pass
/// their input through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterPipeline {
    entries: Vec<(FilterId, FilterEntry)>,
    next_id: u64,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `spec`, named "{kind} {n}" with the lowest free `n` among
    /// entries of the same kind.
    pub fn add(&mut self, spec: FilterSpec) -> FilterId {
        let kind = spec.kind_name();
        let name = unique_name(
            self.entries
                .iter()
                .filter(|(_, e)| e.spec.kind_name() == kind)
                .map(|(_, e)| e.name.as_str()),
            kind,
        );
        self.add_named(spec, name)
    }

    pub fn add_named(&mut self, spec: FilterSpec, name: impl Into<String>) -> FilterId {
        self.next_id += 1;
        let id = FilterId(self.next_id);
        let name = name.into();
        log::debug!("Adding filter {id} '{name}'");
        self.entries.push((
            id,
            FilterEntry {
                name,
                spec,
                enabled: true,
                sampling: DisplaySampling::default(),
            },
        ));
        id
    }

    pub fn remove(&mut self, id: FilterId) -> Option<FilterEntry> {
        let pos = self.entries.iter().position(|(i, _)| *i == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, id: FilterId) -> Option<&FilterEntry> {
        self.entries.iter().find(|(i, _)| *i == id).map(|(_, e)| e)
    }

    pub fn get_mut(&mut self, id: FilterId) -> Option<&mut FilterEntry> {
        self.entries
            .iter_mut()
            .find(|(i, _)| *i == id)
            .map(|(_, e)| e)
    }

    fn entry_mut(&mut self, id: FilterId) -> Result<&mut FilterEntry> {
        self.get_mut(id)
            .ok_or_else(|| ExplorerError::configuration(format!("no filter with id {id}")))
    }

    pub fn set_enabled(&mut self, id: FilterId, enabled: bool) -> Result<()> {
        self.entry_mut(id)?.enabled = enabled;
        Ok(())
    }

    pub fn replace_spec(&mut self, id: FilterId, spec: FilterSpec) -> Result<()> {
        self.entry_mut(id)?.spec = spec;
        Ok(())
    }

    pub fn set_sampling(&mut self, id: FilterId, sampling: DisplaySampling) -> Result<()> {
        self.entry_mut(id)?.sampling = sampling;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (FilterId, &FilterEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold `frame` through every enabled entry.
    ///
    /// A configuration error turns its entry into a pass-through and is
    /// reported in that entry's stage. Invariant violations abort.
    pub fn apply(&self, frame: &FeatureFrame) -> Result<PipelineOutcome> {
        frame.validate()?;
        let mut current = frame.clone();
        let mut stages = Vec::with_capacity(self.entries.len());

        for (id, entry) in &self.entries {
            let input = current.clone();
            let mut error = None;
            if entry.enabled {
                match entry.spec.apply(&current) {
                    Ok(next) => current = next,
                    Err(e) if e.is_recoverable() => {
                        log::warn!("Filter '{}' skipped: {e}", entry.name);
                        error = Some(e);
                    }
                    Err(e) => {
                        log::error!("Filter '{}' failed: {e}", entry.name);
                        return Err(e);
                    }
                }
            }
            stages.push(StageReport {
                id: *id,
                name: entry.name.clone(),
                enabled: entry.enabled,
                output_rows: current.num_rows(),
                input,
                error,
            });
        }

        Ok(PipelineOutcome {
            view: current,
            stages,
        })
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// One entry's view of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub id: FilterId,
    pub name: String,
    pub enabled: bool,
    /// The frame this entry received.
    pub input: FeatureFrame,
    pub output_rows: usize,
    pub error: Option<ExplorerError>,
}

impl StageReport {
    pub fn input_rows(&self) -> usize {
        self.input.num_rows()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub view: FeatureFrame,
    pub stages: Vec<StageReport>,
}

impl PipelineOutcome {
    pub fn stage(&self, id: FilterId) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::sample_table;
    use crate::data::model::{numeric_column, CellValue, ColumnRoles};
    use crate::filters::{PolygonSelectionFilter, RangeFilter, SetFilter};

    fn frame() -> FeatureFrame {
        FeatureFrame::classify(sample_table(), &ColumnRoles::default())
    }

    fn polygon() -> FilterSpec {
        FilterSpec::PolygonSelection(PolygonSelectionFilter::new("area", "intensity"))
    }

    fn names(p: &FilterPipeline) -> Vec<&str> {
        p.iter().map(|(_, e)| e.name.as_str()).collect()
    }

    #[test]
    fn auto_names_reuse_freed_suffixes() {
        let mut p = FilterPipeline::new();
        let _a = p.add(polygon());
        let b = p.add(polygon());
        let _c = p.add(polygon());
        p.add(FilterSpec::Range(RangeFilter::new("area", 0.0, 1.0)));
        assert_eq!(
            names(&p),
            vec!["Scatter Plot 1", "Scatter Plot 2", "Scatter Plot 3", "Range Filter 1"]
        );

        p.remove(b).unwrap();
        let d = p.add(polygon());
        assert_eq!(p.get(d).unwrap().name, "Scatter Plot 2");
        assert_ne!(d, b);
    }

    #[test]
    fn stages_chain_and_disabled_entries_pass_through() {
        let mut p = FilterPipeline::new();
        let range = p.add(FilterSpec::Range(RangeFilter::new("intensity", 15.0, 40.0)));
        let set = p.add(FilterSpec::Set(SetFilter::new(
            "row",
            [CellValue::String("B".into())],
        )));

        let out = p.apply(&frame()).unwrap();
        assert_eq!(out.view.num_rows(), 2);
        assert_eq!(out.stage(range).unwrap().input_rows(), 4);
        assert_eq!(out.stage(set).unwrap().input_rows(), 3);

        p.set_enabled(range, false).unwrap();
        let out = p.apply(&frame()).unwrap();
        assert_eq!(out.stage(range).unwrap().output_rows, 4);
        assert_eq!(numeric_column(&out.view.table, "intensity").unwrap(), vec![30.0, 40.0]);

        p.set_enabled(set, false).unwrap();
        assert_eq!(p.apply(&frame()).unwrap().view, frame());
    }

    #[test]
    fn configuration_errors_stay_in_their_stage() {
        let mut p = FilterPipeline::new();
        let broken = p.add(FilterSpec::Range(RangeFilter::new("gone", 0.0, 1.0)));
        let range = p.add(FilterSpec::Range(RangeFilter::new("intensity", 25.0, 100.0)));

        let out = p.apply(&frame()).unwrap();
        let stage = out.stage(broken).unwrap();
        assert!(matches!(stage.error, Some(ExplorerError::Configuration(_))));
        assert_eq!(stage.output_rows, 4);
        assert!(out.stage(range).unwrap().error.is_none());
        assert_eq!(out.view.num_rows(), 2);
    }

    #[test]
    fn broken_frames_abort() {
        let mut bad = frame();
        bad.features.push("ghost".into());
        let mut p = FilterPipeline::new();
        p.add(polygon());
        assert!(matches!(
            p.apply(&bad),
            Err(ExplorerError::InvariantViolation(_))
        ));
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut p = FilterPipeline::new();
        assert!(p.set_enabled(FilterId(9), true).is_err());
        assert!(p.remove(FilterId(9)).is_none());
    }

    #[test]
    fn pipeline_survives_serialization() {
        let mut p = FilterPipeline::new();
        p.add(polygon());
        let json = serde_json::to_value(&p).unwrap();
        let back: FilterPipeline = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
        let mut back = back;
        // ids keep counting from where they were
        assert_eq!(back.add(polygon()), FilterId(2));
    }
}

//! One rerun of a session: invalidate, apply user events, run the pipeline.
//!
//! ```text
//!   (store, input, events) ──► check_table ──► events ──► pipeline.apply ──► SessionView
//! ```

use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::cache::{canonical_url, Credential, ResourceCaches};
use crate::config::ExplorerConfig;
use crate::data::model::{FeatureFrame, RowDetail};
use crate::data::sampling::DisplaySampling;
use crate::data::source::SourceOpener;
use crate::error::{ExplorerError, Result};
use crate::explore::{PlotKind, PlotRegistry};
use crate::filters::{
    FilterId, FilterPipeline, FilterSpec, ScatterView, SelectionEvent, SelectionOutcome,
    StageReport,
};
use crate::invalidator::{check_table, SchemaCheck};
use crate::setup::{join_condition_table, SetupSelection};
use crate::state::{Scope, ScopedKey, ScopedStore};

pub fn pipeline_key() -> ScopedKey {
    Scope::Filters.key("pipeline")
}

pub fn sources_key() -> ScopedKey {
    Scope::Setup.key("urls")
}

pub fn table_key() -> ScopedKey {
    Scope::Setup.key("table")
}

pub fn token_key() -> ScopedKey {
    Scope::Private.key("token")
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// The table this rerun works on.
#[derive(Debug, Clone)]
pub struct RerunInput {
    /// Identity used for invalidation.
    pub table_name: String,
    pub frame: FeatureFrame,
    /// Sampling given to newly added filters.
    pub sampling: DisplaySampling,
}

/// A user interaction collected since the previous rerun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SessionEvent {
    AddFilter {
        spec: FilterSpec,
        #[serde(default)]
        name: Option<String>,
    },
    RemoveFilter {
        id: FilterId,
    },
    SetFilterEnabled {
        id: FilterId,
        enabled: bool,
    },
    ReplaceFilter {
        id: FilterId,
        spec: FilterSpec,
    },
    Selection {
        filter: FilterId,
        event: SelectionEvent,
    },
    SetSampling {
        filter: FilterId,
        sampling: DisplaySampling,
    },
    AddPlot {
        kind: PlotKind,
    },
    UpdatePlot {
        name: String,
        kind: PlotKind,
    },
    RemovePlot {
        name: String,
    },
}

/// Everything the host needs to draw one rerun.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub schema_check: SchemaCheck,
    pub pipeline: FilterPipeline,
    /// Output of the last enabled filter.
    pub view: FeatureFrame,
    pub stages: Vec<StageReport>,
    /// Drawable points of every polygon filter, over the frame it receives.
    pub scatter: Vec<(FilterId, ScatterView)>,
    pub plots: PlotRegistry,
    /// Row picked by a point selection, if any.
    pub detail: Option<RowDetail>,
    /// Recoverable problems to show the user.
    pub notices: Vec<String>,
}

// ---------------------------------------------------------------------------
// rerun
// ---------------------------------------------------------------------------

/// Execute one rerun of a session.
///
/// Configuration problems in events or filters end up in
/// [`SessionView::notices`]; only invariant violations abort.
pub fn rerun(store: &mut ScopedStore, input: &RerunInput, events: Vec<SessionEvent>) -> Result<SessionView> {
    input.frame.validate()?;
    let schema_check = check_table(store, &input.table_name, &input.frame.schema())?;
    let mut notices: Vec<String> = schema_check.notice().into_iter().collect();

    let mut pipeline = match store.try_get::<FilterPipeline>(&pipeline_key()) {
        Ok(stored) => stored.unwrap_or_default(),
        Err(e) => {
            log::error!("Discarding unreadable filter pipeline: {e}");
            notices.push(format!("Saved filters could not be restored: {e}"));
            FilterPipeline::new()
        }
    };
    let mut plots = PlotRegistry::load(store).unwrap_or_else(|e| {
        log::error!("Discarding unreadable explore plots: {e}");
        notices.push(format!("Saved plots could not be restored: {e}"));
        PlotRegistry::default()
    });
    let mut picked: Option<(FilterId, usize)> = None;

    for event in events {
        match apply_event(&mut pipeline, &mut plots, &input.sampling, event) {
            Ok(Some(point)) => picked = Some(point),
            Ok(None) => {}
            Err(e) if e.is_recoverable() => {
                log::warn!("Ignoring event: {e}");
                notices.push(e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    store.set(&pipeline_key(), &pipeline)?;
    plots.save(store)?;

    let outcome = pipeline.apply(&input.frame)?;
    for stage in &outcome.stages {
        if let Some(e) = &stage.error {
            notices.push(format!("{}: {e}", stage.name));
        }
    }

    let mut scatter = Vec::new();
    let mut detail = None;
    for stage in &outcome.stages {
        let Some(entry) = pipeline.get(stage.id) else {
            continue;
        };
        let Some(polygon) = entry.spec.as_polygon() else {
            continue;
        };
        match ScatterView::build(polygon, &stage.input, &entry.sampling) {
            Ok(view) => {
                if let Some((id, index)) = picked {
                    if id == stage.id {
                        detail = view
                            .frame_row(index)
                            .and_then(|row| stage.input.row_detail(row));
                        if detail.is_none() {
                            notices.push(format!("{}: selected point {index} is not drawn", stage.name));
                        }
                    }
                }
                scatter.push((stage.id, view));
            }
            // already reported by the stage itself
            Err(e) if stage.error.is_some() => log::debug!("No scatter view for '{}': {e}", stage.name),
            Err(e) => notices.push(format!("{}: {e}", stage.name)),
        }
    }

    Ok(SessionView {
        schema_check,
        pipeline,
        view: outcome.view,
        stages: outcome.stages,
        scatter,
        plots,
        detail,
        notices,
    })
}

/// Returns the `(filter, drawn point)` of a point selection.
fn apply_event(
    pipeline: &mut FilterPipeline,
    plots: &mut PlotRegistry,
    default_sampling: &DisplaySampling,
    event: SessionEvent,
) -> Result<Option<(FilterId, usize)>> {
    match event {
        SessionEvent::AddFilter { spec, name } => {
            spec.validate()?;
            let id = match name {
                Some(name) => pipeline.add_named(spec, name),
                None => pipeline.add(spec),
            };
            pipeline.set_sampling(id, default_sampling.clone())?;
        }
        SessionEvent::RemoveFilter { id } => {
            if pipeline.remove(id).is_none() {
                return Err(ExplorerError::configuration(format!("no filter with id {id}")));
            }
        }
        SessionEvent::SetFilterEnabled { id, enabled } => pipeline.set_enabled(id, enabled)?,
        SessionEvent::ReplaceFilter { id, spec } => {
            spec.validate()?;
            pipeline.replace_spec(id, spec)?
        }
        SessionEvent::Selection { filter, event } => {
            let entry = pipeline
                .get_mut(filter)
                .ok_or_else(|| ExplorerError::configuration(format!("no filter with id {filter}")))?;
            let polygon = entry.spec.as_polygon_mut().ok_or_else(|| {
                ExplorerError::configuration(format!("'{}' does not take selections", entry.name))
            })?;
            if let SelectionOutcome::PointSelected(index) = polygon.handle(event)? {
                return Ok(Some((filter, index)));
            }
        }
        SessionEvent::SetSampling { filter, sampling } => pipeline.set_sampling(filter, sampling)?,
        SessionEvent::AddPlot { kind } => {
            plots.add(kind);
        }
        SessionEvent::UpdatePlot { name, kind } => plots.update(&name, kind)?,
        SessionEvent::RemovePlot { name } => {
            if !plots.remove(&name) {
                return Err(ExplorerError::configuration(format!("no plot named '{name}'")));
            }
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// ExplorerSession – one user's store plus the shared caches
// ---------------------------------------------------------------------------

/// State of one user session. Sessions share nothing but the resource
/// caches.
pub struct ExplorerSession {
    pub store: ScopedStore,
    pub config: ExplorerConfig,
}

impl ExplorerSession {
    pub fn new(config: ExplorerConfig) -> Self {
        Self {
            store: ScopedStore::new(),
            config,
        }
    }

    pub fn sources(&self) -> Vec<String> {
        self.store.get(&sources_key(), Vec::new())
    }

    /// Replace the selected sources. Duplicates after canonicalization are
    /// dropped.
    pub fn set_sources<S: AsRef<str>>(&mut self, urls: &[S]) -> Result<()> {
        let mut canonical: Vec<String> = Vec::with_capacity(urls.len());
        for url in urls {
            let url = canonical_url(url.as_ref());
            if !url.is_empty() && !canonical.contains(&url) {
                canonical.push(url);
            }
        }
        self.store.set(&sources_key(), &canonical)
    }

    pub fn selected_table(&self) -> Option<String> {
        self.store.get(&table_key(), None)
    }

    pub fn select_table(&mut self, name: &str) -> Result<()> {
        self.store.set(&table_key(), &name)
    }

    pub fn set_token(&mut self, token: &str) -> Result<()> {
        self.store.set(&token_key(), &token)
    }

    /// Credential to present to sources. The token only goes to trusted
    /// domains when any are configured.
    pub fn credential_for(&self, url: &str) -> Credential {
        let token: String = self.store.get(&token_key(), String::new());
        if self.config.token_domains.is_empty() || self.config.is_trusted_url(url) {
            Credential::from_token(token)
        } else {
            Credential::anonymous()
        }
    }

    /// Every selected source with the credential it may be shown.
    pub fn source_credentials(&self) -> Vec<(String, Credential)> {
        self.sources()
            .into_iter()
            .map(|url| {
                let credential = self.credential_for(&url);
                (url, credential)
            })
            .collect()
    }

    pub fn setup_selection(&self) -> SetupSelection {
        SetupSelection::load(&self.store)
    }

    pub fn set_setup_selection(&mut self, selection: &SetupSelection) -> Result<()> {
        selection.save(&mut self.store)
    }

    /// Table names available in every selected source.
    pub fn available_tables(&self, caches: &ResourceCaches, opener: &dyn SourceOpener) -> Result<Vec<String>> {
        let urls = self.sources();
        let mut common: Option<Vec<String>> = None;
        for url in &urls {
            let source = caches.open_source(opener, url, &self.credential_for(url))?;
            let names: Vec<String> = source.table_names().map(String::from).collect();
            common = Some(match common {
                None => names,
                Some(prev) => prev.into_iter().filter(|n| names.contains(n)).collect(),
            });
        }
        Ok(common.unwrap_or_default())
    }

    /// Load the selected table through the shared cache, join the chosen
    /// condition table and classify the result. No setup selection is
    /// applied, so every plate, row and well is still listed.
    pub fn load_setup_frame(&self, caches: &ResourceCaches, opener: &dyn SourceOpener) -> Result<FeatureFrame> {
        let sources = self.source_credentials();
        let table_name = self
            .selected_table()
            .ok_or_else(|| ExplorerError::configuration("no feature table selected"))?;
        let mut table = RecordBatch::clone(&*caches.load_table(opener, &sources, &table_name)?);

        let selection = self.setup_selection();
        if let Some(condition) = selection.condition_table.as_deref() {
            if condition == table_name {
                return Err(ExplorerError::configuration(format!(
                    "'{condition}' cannot be joined onto itself"
                )));
            }
            let conditions = caches.load_table(opener, &sources, condition)?;
            table = join_condition_table(&table, &conditions)?;
        }
        Ok(FeatureFrame::classify(table, &self.config.columns))
    }

    /// The frame the filter pipeline works on: the setup frame narrowed to
    /// the selected plates, rows, columns, acquisitions and wells.
    pub fn load_frame(&self, caches: &ResourceCaches, opener: &dyn SourceOpener) -> Result<FeatureFrame> {
        let frame = self.load_setup_frame(caches, opener)?;
        self.setup_selection().apply(&frame)
    }

    pub fn rerun(&mut self, frame: FeatureFrame, events: Vec<SessionEvent>) -> Result<SessionView> {
        let input = RerunInput {
            table_name: self.selected_table().unwrap_or_default(),
            frame,
            sampling: self.config.sampling.clone(),
        };
        rerun(&mut self.store, &input, events)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use arrow::array::Float64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;
    use crate::data::model::tests::sample_table;
    use crate::data::model::{CellValue, ColumnRoles};
    use crate::data::source::{source_name_from_url, DataSource};
    use crate::explore::Aggregation;
    use crate::filters::{PolygonSelectionFilter, RangeFilter, SetFilter};

    fn input(name: &str) -> RerunInput {
        RerunInput {
            table_name: name.into(),
            frame: FeatureFrame::classify(sample_table(), &ColumnRoles::default()),
            sampling: DisplaySampling::default(),
        }
    }

    fn add_polygon() -> SessionEvent {
        SessionEvent::AddFilter {
            spec: FilterSpec::PolygonSelection(PolygonSelectionFilter::new("area", "intensity")),
            name: None,
        }
    }

    #[test]
    fn selection_persists_across_reruns() {
        let mut store = ScopedStore::new();
        let first = rerun(&mut store, &input("cells"), vec![add_polygon()]).unwrap();
        let (id, _) = first.pipeline.iter().next().unwrap();
        assert_eq!(first.view.num_rows(), 4);
        assert_eq!(first.scatter.len(), 1);

        let lasso = SessionEvent::Selection {
            filter: id,
            event: SelectionEvent::Box {
                x: [0.0, 2.5],
                y: [0.0, 25.0],
            },
        };
        let second = rerun(&mut store, &input("cells"), vec![lasso]).unwrap();
        assert_eq!(second.view.num_rows(), 2);

        let third = rerun(&mut store, &input("cells"), vec![]).unwrap();
        assert_eq!(third.view, second.view);
        assert!(third.notices.is_empty());
    }

    #[test]
    fn point_selection_yields_row_detail() {
        let mut store = ScopedStore::new();
        let first = rerun(&mut store, &input("cells"), vec![add_polygon()]).unwrap();
        let (id, _) = first.pipeline.iter().next().unwrap();

        let view = rerun(
            &mut store,
            &input("cells"),
            vec![SessionEvent::Selection {
                filter: id,
                event: SelectionEvent::Point { index: 1 },
            }],
        )
        .unwrap();
        let detail = view.detail.unwrap();
        assert_eq!(detail.get("intensity"), Some(&CellValue::Float(20.0)));
        assert!(view.pipeline.get(id).unwrap().spec.as_polygon().unwrap().vertices().is_empty());
    }

    #[test]
    fn bad_events_become_notices() {
        let mut store = ScopedStore::new();
        let events = vec![
            SessionEvent::AddFilter {
                spec: FilterSpec::Range(RangeFilter::new("area", 0.0, 1.0)),
                name: Some("small".into()),
            },
            SessionEvent::RemoveFilter { id: FilterId(42) },
            SessionEvent::Selection {
                filter: FilterId(1),
                event: SelectionEvent::Clear,
            },
        ];
        let view = rerun(&mut store, &input("cells"), events).unwrap();
        assert_eq!(view.notices.len(), 2);
        assert_eq!(view.pipeline.len(), 1);
        assert_eq!(view.view.num_rows(), 1);
    }

    #[test]
    fn switching_tables_drops_the_pipeline() {
        let mut store = ScopedStore::new();
        rerun(&mut store, &input("cells"), vec![add_polygon()]).unwrap();
        rerun(
            &mut store,
            &input("cells"),
            vec![SessionEvent::AddPlot {
                kind: PlotKind::Scatter {
                    x: "area".into(),
                    y: "intensity".into(),
                },
            }],
        )
        .unwrap();

        let view = rerun(&mut store, &input("nuclei"), vec![]).unwrap();
        assert!(view.schema_check.invalidated());
        assert!(view.pipeline.is_empty());
        assert_eq!(view.notices.len(), 1);
        // explore plots live in their own scope
        assert_eq!(view.plots.plots.len(), 1);
    }

    #[test]
    fn token_only_goes_to_trusted_domains() {
        let mut session = ExplorerSession::new(ExplorerConfig {
            token_domains: vec!["https://data.example.org".into()],
            ..Default::default()
        });
        session.set_token("secret").unwrap();
        assert_eq!(
            session.credential_for("https://data.example.org/plate.zarr").token(),
            Some("secret")
        );
        assert_eq!(session.credential_for("https://elsewhere.org/plate.zarr").token(), None);
    }

    #[test]
    fn sources_are_canonical_and_unique() {
        let mut session = ExplorerSession::new(ExplorerConfig::default());
        session
            .set_sources(&["/data/plate1/", "'/data/plate1'", " ", "/data/plate2"])
            .unwrap();
        assert_eq!(session.sources(), vec!["/data/plate1", "/data/plate2"]);
    }

    fn diagonal(n: usize) -> FeatureFrame {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Float64, false),
            Field::new("y", DataType::Float64, false),
        ]));
        let values: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let table = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(values.clone())),
                Arc::new(Float64Array::from(values)),
            ],
        )
        .unwrap();
        FeatureFrame::classify(table, &ColumnRoles::default())
    }

    #[test]
    fn downstream_filters_see_the_full_output_not_the_drawn_sample() {
        let mut store = ScopedStore::new();
        let input = RerunInput {
            table_name: "cells".into(),
            frame: diagonal(200),
            sampling: DisplaySampling {
                max_points: 10,
                ..Default::default()
            },
        };
        let events = vec![
            SessionEvent::AddFilter {
                spec: FilterSpec::PolygonSelection(PolygonSelectionFilter::new("x", "y")),
                name: None,
            },
            SessionEvent::Selection {
                filter: FilterId(1),
                event: SelectionEvent::Box {
                    x: [0.0, 150.0],
                    y: [0.0, 150.0],
                },
            },
            SessionEvent::AddFilter {
                spec: FilterSpec::Range(RangeFilter::new("x", 0.0, 100.0)),
                name: None,
            },
        ];
        let view = rerun(&mut store, &input, events).unwrap();
        assert!(view.notices.is_empty());

        let (polygon, range) = (&view.stages[0], &view.stages[1]);
        assert_eq!(polygon.output_rows, 151);
        assert_eq!(range.input_rows(), polygon.output_rows);
        assert_eq!(view.view.num_rows(), 101);

        let (id, scatter) = &view.scatter[0];
        assert_eq!(*id, FilterId(1));
        assert_eq!(scatter.points.len(), 10);
        assert_eq!(scatter.total_rows, 200);
    }

    #[test]
    fn filters_that_cannot_be_stored_are_rejected_and_others_survive() {
        let mut store = ScopedStore::new();
        let events = vec![
            add_polygon(),
            SessionEvent::AddFilter {
                spec: FilterSpec::Range(RangeFilter::new("area", 0.0, f64::INFINITY)),
                name: None,
            },
            SessionEvent::AddFilter {
                spec: FilterSpec::Set(SetFilter::new("area", [CellValue::Float(f64::NAN)])),
                name: None,
            },
            SessionEvent::AddFilter {
                spec: FilterSpec::Set(SetFilter::new("row", [CellValue::String("A".into())])),
                name: None,
            },
        ];
        let first = rerun(&mut store, &input("cells"), events).unwrap();
        assert_eq!(first.notices.len(), 2);
        assert_eq!(first.pipeline.len(), 2);

        let second = rerun(&mut store, &input("cells"), vec![]).unwrap();
        assert_eq!(second.pipeline, first.pipeline);
        assert_eq!(second.view.num_rows(), 2);
        assert!(second.notices.is_empty());
    }

    #[test]
    fn unreadable_saved_filters_are_reported() {
        let mut store = ScopedStore::new();
        rerun(&mut store, &input("cells"), vec![add_polygon()]).unwrap();
        store.set_value(&pipeline_key(), serde_json::json!({ "entries": "garbage" }));

        let view = rerun(&mut store, &input("cells"), vec![]).unwrap();
        assert!(view.pipeline.is_empty());
        assert_eq!(view.notices.len(), 1);
        assert!(view.notices[0].starts_with("Saved filters could not be restored"));
    }

    #[test]
    fn explore_plots_can_be_reconfigured() {
        let mut store = ScopedStore::new();
        let add = SessionEvent::AddPlot {
            kind: PlotKind::default_heat_map(&input("cells").frame).unwrap(),
        };
        rerun(&mut store, &input("cells"), vec![add]).unwrap();

        let counts = PlotKind::HeatMap {
            value: "intensity".into(),
            x_axis: "column".into(),
            y_axis: "row".into(),
            aggregation: Aggregation::Counts,
        };
        let events = vec![
            SessionEvent::UpdatePlot {
                name: "Heat Map 1".into(),
                kind: counts.clone(),
            },
            SessionEvent::UpdatePlot {
                name: "Heat Map 2".into(),
                kind: counts.clone(),
            },
        ];
        let view = rerun(&mut store, &input("cells"), events).unwrap();
        assert_eq!(view.notices.len(), 1);
        assert_eq!(view.plots.plots[0].kind, counts);
    }

    #[test]
    fn events_serialize_with_an_action_tag() {
        let event = SessionEvent::Selection {
            filter: FilterId(3),
            event: SelectionEvent::Clear,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "selection");
        assert_eq!(json["event"]["kind"], "clear");
        assert_eq!(serde_json::from_value::<SessionEvent>(json).unwrap(), event);
    }

    /// Opens `<root>/<last url segment>` and remembers which token each URL
    /// was shown.
    struct RecordingOpener {
        root: PathBuf,
        opened: Mutex<Vec<(String, Option<String>)>>,
    }

    impl SourceOpener for RecordingOpener {
        fn open(&self, url: &str, credential: &Credential) -> Result<DataSource> {
            self.opened
                .lock()
                .unwrap()
                .push((url.to_string(), credential.token().map(String::from)));
            DataSource::scan(url, &self.root.join(source_name_from_url(url)))
                .map_err(|e| ExplorerError::resource(url, e))
        }
    }

    #[test]
    fn each_source_only_gets_its_own_credential() {
        let root = tempfile::tempdir().unwrap();
        for plate in ["a", "b"] {
            let dir = root.path().join(plate);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("cells.csv"), "label,area\n1,2.0\n2,4.0\n").unwrap();
        }
        let opener = RecordingOpener {
            root: root.path().to_path_buf(),
            opened: Mutex::new(Vec::new()),
        };
        let caches = ResourceCaches::new();
        let mut session = ExplorerSession::new(ExplorerConfig {
            token_domains: vec!["https://trusted.org".into()],
            ..Default::default()
        });
        session.set_token("secret").unwrap();
        session
            .set_sources(&["https://trusted.org/a", "https://evil.org/b"])
            .unwrap();
        session.select_table("cells").unwrap();

        assert_eq!(session.available_tables(&caches, &opener).unwrap(), vec!["cells"]);
        assert_eq!(session.load_frame(&caches, &opener).unwrap().num_rows(), 4);

        let opened = opener.opened.lock().unwrap();
        // the load reuses the handles opened while listing tables
        assert_eq!(opened.len(), 2);
        for (url, token) in opened.iter() {
            let expected = url.starts_with("https://trusted.org/").then_some("secret");
            assert_eq!(token.as_deref(), expected, "{url}");
        }
    }
}

use std::collections::HashMap;

use eframe::egui;

use feature_explorer::cache::ResourceCaches;
use feature_explorer::config::ExplorerConfig;
use feature_explorer::data::export::ExportFormat;
use feature_explorer::data::model::FeatureFrame;
use feature_explorer::data::source::LocalOpener;
use feature_explorer::engine::{ExplorerSession, SessionEvent, SessionView};
use feature_explorer::filters::FilterId;
use feature_explorer::setup::SetupSelection;

use crate::ui::{panels, plot};

// ---------------------------------------------------------------------------
// Host state
// ---------------------------------------------------------------------------

/// How a drag on a scatter plot is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragMode {
    Lasso,
    Box,
    Pan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Setup,
    Filters,
    Explore,
    Table,
}

/// Everything the UI keeps between frames that is not session state.
pub struct HostState {
    pub session: ExplorerSession,
    pub opener: LocalOpener,
    /// Table after the setup selection, the input of the filter pipeline.
    pub frame: Option<FeatureFrame>,
    /// Table before the setup selection, with condition columns joined.
    pub setup_frame: Option<FeatureFrame>,
    loaded_from: Option<(Vec<String>, String, SetupSelection)>,
    pub tables: Vec<String>,
    tables_for: Option<Vec<String>>,
    /// Events collected this frame, applied on the next rerun.
    pub pending: Vec<SessionEvent>,
    pub view: Option<SessionView>,
    pub status_message: Option<String>,
    pub page: Page,
    pub drag_mode: DragMode,
    /// Region being drawn per scatter plot, in plot coordinates.
    pub drawing: HashMap<FilterId, Vec<[f64; 2]>>,
    pub color_column: Option<String>,
    pub url_input: String,
    pub token_input: String,
    pub export_format: ExportFormat,
    pub show_detail: bool,
}

impl HostState {
    pub fn new(config: ExplorerConfig) -> Self {
        let opener = LocalOpener {
            allow_local_paths: config.allow_local_paths,
        };
        Self {
            session: ExplorerSession::new(config),
            opener,
            frame: None,
            setup_frame: None,
            loaded_from: None,
            tables: Vec::new(),
            tables_for: None,
            pending: Vec::new(),
            view: None,
            status_message: None,
            page: Page::Filters,
            drag_mode: DragMode::Lasso,
            drawing: HashMap::new(),
            color_column: None,
            url_input: String::new(),
            token_input: String::new(),
            export_format: ExportFormat::Csv,
            show_detail: false,
        }
    }

    pub fn push(&mut self, event: SessionEvent) {
        self.pending.push(event);
    }

    /// Re-list tables when the source selection changed.
    fn refresh_tables(&mut self) {
        let sources = self.session.sources();
        if self.tables_for.as_ref() == Some(&sources) {
            return;
        }
        self.tables_for = Some(sources.clone());
        match self
            .session
            .available_tables(ResourceCaches::global(), &self.opener)
        {
            Ok(tables) => {
                self.tables = tables;
                self.status_message = None;
            }
            Err(e) => {
                log::error!("Failed to list tables: {e}");
                self.tables.clear();
                self.status_message = Some(e.to_string());
            }
        }
    }

    /// Reload the frame when the sources, the table or the setup
    /// selection changed. Returns whether a new frame was loaded.
    fn refresh_frame(&mut self) -> bool {
        let Some(table) = self.session.selected_table() else {
            self.frame = None;
            self.setup_frame = None;
            return false;
        };
        let selection = self.session.setup_selection();
        let key = (self.session.sources(), table, selection.clone());
        if self.loaded_from.as_ref() == Some(&key) {
            return false;
        }
        self.loaded_from = Some(key);
        let loaded = self
            .session
            .load_setup_frame(ResourceCaches::global(), &self.opener)
            .and_then(|setup| Ok((selection.apply(&setup)?, setup)));
        match loaded {
            Ok((frame, setup)) => {
                log::info!(
                    "Feature table ready: {} of {} rows selected, {} features",
                    frame.num_rows(),
                    setup.num_rows(),
                    frame.features.len()
                );
                self.frame = Some(frame);
                self.setup_frame = Some(setup);
                self.status_message = None;
            }
            Err(e) => {
                log::error!("Failed to load feature table: {e}");
                self.frame = None;
                self.setup_frame = None;
                self.view = None;
                self.status_message = Some(e.to_string());
            }
        }
        true
    }

    /// Drop cached resources and reload everything on the next frame.
    pub fn reload(&mut self) {
        ResourceCaches::global().flush();
        self.tables_for = None;
        self.loaded_from = None;
    }

    /// Run the engine if anything changed since the last rerun.
    /// Returns whether session state moved, so another frame is needed.
    fn rerun_if_needed(&mut self) -> bool {
        self.refresh_tables();
        let reloaded = self.refresh_frame();
        let changed = self.session.store.take_rerun_request();
        let Some(frame) = self.frame.clone() else {
            self.pending.clear();
            return false;
        };
        if !(reloaded || changed || self.view.is_none() || !self.pending.is_empty()) {
            return false;
        }

        let events = std::mem::take(&mut self.pending);
        let had_point = events.iter().any(|e| {
            matches!(
                e,
                SessionEvent::Selection {
                    event: feature_explorer::filters::SelectionEvent::Point { .. },
                    ..
                }
            )
        });
        match self.session.rerun(frame, events) {
            Ok(view) => {
                if had_point {
                    self.show_detail = view.detail.is_some();
                }
                for notice in &view.notices {
                    log::warn!("{notice}");
                }
                self.view = Some(view);
            }
            Err(e) => {
                log::error!("Rerun failed: {e}");
                self.status_message = Some(e.to_string());
            }
        }
        self.session.store.take_rerun_request()
    }
}

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct FeatureExplorerApp {
    pub state: HostState,
}

impl FeatureExplorerApp {
    pub fn new(config: ExplorerConfig) -> Self {
        Self {
            state: HostState::new(config),
        }
    }
}

impl eframe::App for FeatureExplorerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.state.rerun_if_needed() {
            ctx.request_repaint();
        }

        // ---- Top panel: sources and table ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &mut self.state);
        });

        // ---- Left side panel: filter pipeline ----
        egui::SidePanel::left("filter_panel")
            .default_width(260.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state);
            });

        // ---- Central panel: plots and table ----
        egui::CentralPanel::default().show(ctx, |ui| match self.state.page {
            Page::Setup => panels::setup_page(ui, &mut self.state),
            Page::Filters => plot::filter_plots(ui, &mut self.state),
            Page::Explore => plot::explore_plots(ui, &mut self.state),
            Page::Table => panels::table_page(ui, &mut self.state),
        });

        panels::detail_window(ctx, &mut self.state);

        if !self.state.pending.is_empty() {
            ctx.request_repaint();
        }
    }
}

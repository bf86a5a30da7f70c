use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::{Column, TableBuilder};

use feature_explorer::data::export::{export_file_name, export_to_path, ExportFormat};
use feature_explorer::data::model::column_values;
use feature_explorer::engine::SessionEvent;
use feature_explorer::filters::{FilterSpec, PolygonSelectionFilter, RangeFilter, SetFilter};
use feature_explorer::setup::{axis_options, SetupAxis};

use crate::app::{HostState, Page};
use crate::ui::editors::editor_for;

/// Rows shown on the table page; the export always writes every row.
const TABLE_PREVIEW_ROWS: usize = 1_000;

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top toolbar: sources, token, table, pages.
pub fn top_bar(ui: &mut Ui, state: &mut HostState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Add source folder…").clicked() {
                open_folder_dialog(state);
                ui.close_menu();
            }
            if ui.button("Reload").clicked() {
                state.reload();
                ui.close_menu();
            }
        });

        ui.separator();
        for (page, label) in [
            (Page::Setup, "Setup"),
            (Page::Filters, "Filters"),
            (Page::Explore, "Explore"),
            (Page::Table, "Table"),
        ] {
            if ui.selectable_label(state.page == page, label).clicked() {
                state.page = page;
            }
        }

        ui.separator();
        if let Some(view) = &state.view {
            let total = state.frame.as_ref().map_or(0, |f| f.num_rows());
            ui.label(format!("{} of {total} rows pass", view.view.num_rows()));
        }
    });

    ui.horizontal(|ui: &mut Ui| {
        ui.label("Source");
        let response = ui.add(
            egui::TextEdit::singleline(&mut state.url_input)
                .hint_text("path or URL")
                .desired_width(320.0),
        );
        let submitted = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
        if ui.button("Add").clicked() || submitted {
            let url = std::mem::take(&mut state.url_input);
            add_source(state, &url);
        }

        ui.separator();
        ui.label("Token");
        ui.add(
            egui::TextEdit::singleline(&mut state.token_input)
                .password(true)
                .desired_width(160.0),
        );
        if ui.button("Set").clicked() {
            let token = state.token_input.clone();
            if let Err(e) = state.session.set_token(&token) {
                state.status_message = Some(e.to_string());
            }
            state.reload();
        }

        ui.separator();
        let current = state.session.selected_table().unwrap_or_default();
        let tables = state.tables.clone();
        egui::ComboBox::from_id_salt("table")
            .selected_text(if current.is_empty() { "Select table" } else { current.as_str() })
            .show_ui(ui, |ui: &mut Ui| {
                for table in &tables {
                    if ui.selectable_label(current == *table, table).clicked() && current != *table {
                        if let Err(e) = state.session.select_table(table) {
                            state.status_message = Some(e.to_string());
                        }
                    }
                }
            });
    });

    let sources = state.session.sources();
    if !sources.is_empty() {
        ui.horizontal_wrapped(|ui: &mut Ui| {
            for url in &sources {
                ui.label(RichText::new(url).monospace());
                if ui.small_button("✖").on_hover_text("Remove source").clicked() {
                    let remaining: Vec<&String> = sources.iter().filter(|u| *u != url).collect();
                    if let Err(e) = state.session.set_sources(&remaining) {
                        state.status_message = Some(e.to_string());
                    }
                }
            }
        });
    }

    if let Some(msg) = &state.status_message {
        ui.label(RichText::new(msg).color(Color32::RED));
    }
}

fn add_source(state: &mut HostState, url: &str) {
    let mut sources = state.session.sources();
    sources.push(url.to_string());
    if let Err(e) = state.session.set_sources(&sources) {
        state.status_message = Some(e.to_string());
    }
}

pub fn open_folder_dialog(state: &mut HostState) {
    let folder = rfd::FileDialog::new()
        .set_title("Add a feature table folder")
        .pick_folder();
    if let Some(path) = folder {
        add_source(state, &path.to_string_lossy());
    }
}

// ---------------------------------------------------------------------------
// Left side panel – filter pipeline
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum NewFilter {
    Scatter,
    Range,
    Set,
}

/// Default spec of a new filter for the current pipeline output.
fn new_filter_spec(kind: NewFilter, state: &HostState) -> Option<FilterSpec> {
    let view = &state.view.as_ref()?.view;
    match kind {
        NewFilter::Scatter => {
            let x = view.features.first()?;
            let y = view.features.get(1).unwrap_or(x);
            Some(FilterSpec::PolygonSelection(PolygonSelectionFilter::new(
                x.clone(),
                y.clone(),
            )))
        }
        NewFilter::Range => {
            let col = view.features.first()?;
            RangeFilter::spanning(view, col).ok().map(FilterSpec::Range)
        }
        NewFilter::Set => {
            let col = view.categorical.first()?;
            SetFilter::all_values(view, col).ok().map(FilterSpec::Set)
        }
    }
}

/// Render the left filter panel.
pub fn side_panel(ui: &mut Ui, state: &mut HostState) {
    ui.heading("Filters");
    ui.separator();

    if state.view.is_none() {
        ui.label("No feature table loaded.");
        return;
    }

    ui.horizontal(|ui: &mut Ui| {
        for (kind, label) in [
            (NewFilter::Scatter, "+ Scatter"),
            (NewFilter::Range, "+ Range"),
            (NewFilter::Set, "+ Set"),
        ] {
            if ui.button(label).clicked() {
                match new_filter_spec(kind, state) {
                    Some(spec) => state.push(SessionEvent::AddFilter { spec, name: None }),
                    None => {
                        state.status_message =
                            Some("The table has no column this filter can use".to_string())
                    }
                }
            }
        }
    });
    ui.separator();

    let Some(view) = &state.view else {
        return;
    };
    let mut events = Vec::new();

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            for stage in &view.stages {
                let Some(entry) = view.pipeline.get(stage.id) else {
                    continue;
                };
                let header = format!(
                    "{}  ({} → {})",
                    entry.name,
                    stage.input_rows(),
                    stage.output_rows
                );
                egui::CollapsingHeader::new(RichText::new(header).strong())
                    .id_salt(stage.id.0)
                    .default_open(true)
                    .show(ui, |ui: &mut Ui| {
                        ui.horizontal(|ui: &mut Ui| {
                            let mut enabled = entry.enabled;
                            if ui.checkbox(&mut enabled, "Enabled").changed() {
                                events.push(SessionEvent::SetFilterEnabled {
                                    id: stage.id,
                                    enabled,
                                });
                            }
                            if ui.small_button("Remove").clicked() {
                                events.push(SessionEvent::RemoveFilter { id: stage.id });
                            }
                        });

                        let salt = format!("filter_{}", stage.id.0);
                        if let Some(spec) = editor_for(&entry.spec).edit(ui, &salt, &stage.input) {
                            events.push(SessionEvent::ReplaceFilter { id: stage.id, spec });
                        }

                        if let Some(e) = &stage.error {
                            ui.label(RichText::new(e.to_string()).color(Color32::RED));
                        }
                    });
            }

            for notice in &view.notices {
                ui.label(RichText::new(notice).color(Color32::YELLOW));
            }
        });

    state.pending.extend(events);
}

// ---------------------------------------------------------------------------
// Setup page
// ---------------------------------------------------------------------------

/// Plates, wells and acquisitions to analyse, plus the condition table join.
pub fn setup_page(ui: &mut Ui, state: &mut HostState) {
    let Some(frame) = &state.setup_frame else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Add a source and select a feature table");
        });
        return;
    };
    let original = state.session.setup_selection();
    let mut selection = original.clone();
    let table_name = state.session.selected_table().unwrap_or_default();

    ui.horizontal(|ui: &mut Ui| {
        ui.label("Condition table");
        egui::ComboBox::from_id_salt("condition_table")
            .selected_text(selection.condition_table.as_deref().unwrap_or("none"))
            .show_ui(ui, |ui: &mut Ui| {
                ui.selectable_value(&mut selection.condition_table, None, "none");
                for table in state.tables.iter().filter(|t| **t != table_name) {
                    ui.selectable_value(&mut selection.condition_table, Some(table.clone()), table);
                }
            });
    });
    ui.separator();

    ScrollArea::vertical().show(ui, |ui: &mut Ui| {
        for axis in SetupAxis::ALL {
            let options = axis_options(frame, axis);
            if options.is_empty() {
                continue;
            }
            ui.horizontal(|ui: &mut Ui| {
                ui.strong(axis.label());
                if ui.small_button("All").clicked() {
                    selection.select_all(axis);
                }
                if ui.small_button("None").clicked() {
                    selection.select_none(axis);
                }
            });
            ui.horizontal_wrapped(|ui: &mut Ui| {
                for value in &options {
                    if ui.selectable_label(selection.is_selected(axis, value), value).clicked() {
                        selection.toggle(axis, value, &options);
                    }
                }
            });
            ui.add_space(6.0);
        }
    });

    if selection != original {
        if let Err(e) = state.session.set_setup_selection(&selection) {
            log::error!("Failed to store setup selection: {e}");
            state.status_message = Some(e.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Table page and export
// ---------------------------------------------------------------------------

pub fn table_page(ui: &mut Ui, state: &mut HostState) {
    let Some(view) = &state.view else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Add a source and select a feature table");
        });
        return;
    };
    let frame = &view.view;

    let mut export_clicked = false;
    ui.horizontal(|ui: &mut Ui| {
        ui.label(format!("{} rows", frame.num_rows()));
        ui.separator();
        for format in ExportFormat::ALL {
            ui.radio_value(&mut state.export_format, format, format.label());
        }
        export_clicked = ui.button("Export…").clicked();
    });
    if export_clicked {
        let table_name = state.session.selected_table().unwrap_or_default();
        let format = state.export_format;
        let target = rfd::FileDialog::new()
            .set_title("Export filtered table")
            .set_file_name(export_file_name(&table_name, format))
            .add_filter(format.label(), &[format.extension()])
            .save_file();
        if let Some(path) = target {
            if let Err(e) = export_to_path(&frame.table, &path, format) {
                log::error!("Export failed: {e:#}");
                state.status_message = Some(format!("Export failed: {e:#}"));
            }
        }
    }
    ui.separator();

    let schema = frame.table.schema();
    let shown = frame.num_rows().min(TABLE_PREVIEW_ROWS);
    let columns: Vec<_> = frame
        .table
        .columns()
        .iter()
        .map(|c| column_values(&c.slice(0, shown)))
        .collect();

    ScrollArea::horizontal().show(ui, |ui: &mut Ui| {
        TableBuilder::new(ui)
            .striped(true)
            .columns(Column::auto().resizable(true), columns.len())
            .header(20.0, |mut header| {
                for field in schema.fields() {
                    header.col(|ui: &mut Ui| {
                        ui.strong(field.name());
                    });
                }
            })
            .body(|body| {
                body.rows(18.0, shown, |mut row| {
                    let i = row.index();
                    for col in &columns {
                        row.col(|ui: &mut Ui| {
                            ui.label(col[i].to_string());
                        });
                    }
                });
            });
    });
}

// ---------------------------------------------------------------------------
// Detail window
// ---------------------------------------------------------------------------

/// Out-of-band view of the row picked by a point selection.
pub fn detail_window(ctx: &egui::Context, state: &mut HostState) {
    let Some(detail) = state.view.as_ref().and_then(|v| v.detail.as_ref()) else {
        return;
    };
    egui::Window::new(format!("Row {}", detail.row))
        .open(&mut state.show_detail)
        .resizable(true)
        .show(ctx, |ui: &mut Ui| {
            egui::Grid::new("detail_grid").striped(true).show(ui, |ui: &mut Ui| {
                for (name, value) in &detail.values {
                    ui.strong(name);
                    ui.label(value.to_string());
                    ui.end_row();
                }
            });
        });
}

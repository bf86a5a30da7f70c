use std::collections::BTreeSet;

use eframe::egui::{self, Color32, Pos2, Rect, RichText, ScrollArea, Sense, Ui, Vec2};
use egui_plot::{Legend, Line, Plot, PlotPoint, PlotPoints, Points};

use feature_explorer::data::model::{column_values, numeric_column, CellValue, FeatureFrame};
use feature_explorer::engine::SessionEvent;
use feature_explorer::explore::{heat_map, Aggregation, HeatMapGrid, PlotKind};
use feature_explorer::filters::{FilterId, ScatterView, SelectionEvent};

use crate::app::{DragMode, HostState};
use crate::color::{sequential, ColorMap};
use crate::ui::editors::column_picker;

/// Click radius, in screen pixels, for picking a point.
const PICK_RADIUS: f32 = 8.0;

// ---------------------------------------------------------------------------
// Filters page – one scatter plot per polygon filter
// ---------------------------------------------------------------------------

pub fn filter_plots(ui: &mut Ui, state: &mut HostState) {
    let Some(view) = &state.view else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Add a source and select a feature table  (File → Add source folder…)");
        });
        return;
    };

    ui.horizontal(|ui: &mut Ui| {
        ui.label("Drag to");
        ui.radio_value(&mut state.drag_mode, DragMode::Lasso, "Lasso");
        ui.radio_value(&mut state.drag_mode, DragMode::Box, "Box");
        ui.radio_value(&mut state.drag_mode, DragMode::Pan, "Pan");
        ui.separator();
        color_picker(ui, &mut state.color_column, &view.view.categorical);
    });
    ui.separator();

    if view.scatter.is_empty() {
        ui.label("Add a scatter filter to select points.");
        return;
    }

    let mut events = Vec::new();
    ScrollArea::vertical().show(ui, |ui: &mut Ui| {
        for (id, scatter) in &view.scatter {
            let Some(entry) = view.pipeline.get(*id) else {
                continue;
            };
            let Some(polygon) = entry.spec.as_polygon() else {
                continue;
            };
            let Some(stage) = view.stages.iter().find(|s| s.id == *id) else {
                continue;
            };

            ui.heading(&entry.name);
            ui.horizontal(|ui: &mut Ui| {
                if scatter.sample.is_sampled() {
                    ui.label(format!(
                        "showing {} of {} points",
                        scatter.points.len(),
                        scatter.total_rows
                    ));
                } else {
                    ui.label(format!("{} points", scatter.total_rows));
                }
                let mut sampling = entry.sampling.clone();
                let mut changed = ui.checkbox(&mut sampling.enabled, "Sample").changed();
                if sampling.enabled {
                    let mut fraction = sampling
                        .fraction
                        .unwrap_or_else(|| sampling.default_fraction(scatter.total_rows));
                    if ui
                        .add(egui::Slider::new(&mut fraction, 0.0..=1.0).text("fraction"))
                        .changed()
                    {
                        sampling.fraction = Some(fraction);
                        changed = true;
                    }
                }
                if changed {
                    events.push(SessionEvent::SetSampling {
                        filter: *id,
                        sampling,
                    });
                }
                if ui.small_button("Clear selection").clicked() {
                    events.push(SessionEvent::Selection {
                        filter: *id,
                        event: SelectionEvent::Clear,
                    });
                }
            });

            let colors = point_colors(&stage.input, scatter, state.color_column.as_deref());
            let path = state.drawing.entry(*id).or_default();
            if let Some(event) = scatter_plot(
                ui,
                *id,
                scatter,
                (polygon.column_x.as_str(), polygon.column_y.as_str()),
                colors.as_ref(),
                state.drag_mode,
                path,
            ) {
                events.push(SessionEvent::Selection { filter: *id, event });
            }
            ui.separator();
        }
    });
    state.pending.extend(events);
}

fn color_picker(ui: &mut Ui, color_column: &mut Option<String>, categorical: &[String]) {
    ui.label("Color by");
    let current = color_column.clone().unwrap_or_else(|| "none".to_string());
    egui::ComboBox::from_id_salt("color_by")
        .selected_text(current)
        .show_ui(ui, |ui: &mut Ui| {
            if ui.selectable_label(color_column.is_none(), "none").clicked() {
                *color_column = None;
            }
            for col in categorical {
                if ui
                    .selectable_label(color_column.as_deref() == Some(col.as_str()), col)
                    .clicked()
                {
                    *color_column = Some(col.clone());
                }
            }
        });
}

/// Colour map plus one colour per drawn point, grouped for the legend.
struct PointColors {
    map: ColorMap,
    values: Vec<CellValue>,
}

fn point_colors(input: &FeatureFrame, scatter: &ScatterView, column: Option<&str>) -> Option<PointColors> {
    let col = input.table.column_by_name(column?)?;
    let all = column_values(col);
    let values: Vec<CellValue> = (0..scatter.points.len())
        .filter_map(|i| scatter.frame_row(i))
        .map(|row| all.get(row).cloned().unwrap_or(CellValue::Null))
        .collect();
    let distinct: BTreeSet<CellValue> = values.iter().cloned().collect();
    Some(PointColors {
        map: ColorMap::new(column?, &distinct),
        values,
    })
}

/// Draw one scatter view and turn pointer input into a selection event.
fn scatter_plot(
    ui: &mut Ui,
    id: FilterId,
    scatter: &ScatterView,
    (x_label, y_label): (&str, &str),
    colors: Option<&PointColors>,
    mode: DragMode,
    path: &mut Vec<[f64; 2]>,
) -> Option<SelectionEvent> {
    let selecting = mode != DragMode::Pan;
    let response = Plot::new(("scatter", id.0))
        .height(360.0)
        .legend(Legend::default())
        .x_axis_label(x_label)
        .y_axis_label(y_label)
        .allow_drag(!selecting)
        .allow_boxed_zoom(false)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            match colors {
                Some(colors) => {
                    for (label, color) in colors.map.legend_entries() {
                        let pts: Vec<[f64; 2]> = scatter
                            .points
                            .iter()
                            .zip(&colors.values)
                            .filter(|(_, v)| v.to_string() == label)
                            .map(|(p, _)| *p)
                            .collect();
                        plot_ui.points(Points::new(PlotPoints::new(pts)).radius(1.5).color(color).name(&label));
                    }
                }
                None => {
                    plot_ui.points(
                        Points::new(PlotPoints::new(scatter.points.clone()))
                            .radius(1.5)
                            .color(Color32::LIGHT_BLUE),
                    );
                }
            }
            if !scatter.outline.is_empty() {
                plot_ui.line(
                    Line::new(PlotPoints::new(scatter.outline.clone()))
                        .color(Color32::from_rgb(255, 140, 0))
                        .width(2.0),
                );
            }
            if path.len() > 1 {
                let preview = match mode {
                    DragMode::Box => box_corners(path[0], path[path.len() - 1]),
                    _ => path.clone(),
                };
                plot_ui.line(Line::new(PlotPoints::new(preview)).color(Color32::WHITE).width(1.0));
            }
        });

    let resp = &response.response;
    let transform = &response.transform;
    let pointer = resp
        .interact_pointer_pos()
        .or_else(|| resp.hover_pos())
        .map(|pos| transform.value_from_position(pos));

    if selecting {
        if resp.drag_started() {
            path.clear();
        }
        if resp.dragged() {
            if let Some(p) = pointer {
                path.push([p.x, p.y]);
            }
        }
        if resp.drag_stopped() {
            let drawn = std::mem::take(path);
            if drawn.len() < 2 {
                return None;
            }
            return Some(match mode {
                DragMode::Box => {
                    let (a, b) = (drawn[0], drawn[drawn.len() - 1]);
                    SelectionEvent::Box {
                        x: [a[0], b[0]],
                        y: [a[1], b[1]],
                    }
                }
                _ => SelectionEvent::Lasso {
                    xs: drawn.iter().map(|p| p[0]).collect(),
                    ys: drawn.iter().map(|p| p[1]).collect(),
                },
            });
        }
    }

    if resp.clicked() {
        let click = resp.interact_pointer_pos()?;
        let nearest = scatter
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p[0].is_finite() && p[1].is_finite())
            .map(|(i, p)| {
                let screen = transform.position_from_point(&PlotPoint::new(p[0], p[1]));
                (i, screen.distance(click))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        if nearest.1 <= PICK_RADIUS {
            return Some(SelectionEvent::Point { index: nearest.0 });
        }
    }
    None
}

fn box_corners(a: [f64; 2], b: [f64; 2]) -> Vec<[f64; 2]> {
    vec![a, [b[0], a[1]], b, [a[0], b[1]], a]
}

// ---------------------------------------------------------------------------
// Explore page – free plots over the filtered view
// ---------------------------------------------------------------------------

pub fn explore_plots(ui: &mut Ui, state: &mut HostState) {
    let Some(view) = &state.view else {
        ui.label("No feature table loaded.");
        return;
    };
    let frame = &view.view;
    let mut events = Vec::new();

    ui.horizontal(|ui: &mut Ui| {
        if ui.button("+ Scatter Plot").clicked() {
            if let Some(kind) = PlotKind::default_scatter(frame) {
                events.push(SessionEvent::AddPlot { kind });
            }
        }
        if ui.button("+ Heat Map").clicked() {
            if let Some(kind) = PlotKind::default_heat_map(frame) {
                events.push(SessionEvent::AddPlot { kind });
            }
        }
    });
    ui.separator();

    ScrollArea::vertical().show(ui, |ui: &mut Ui| {
        for plot in &view.plots.plots {
            ui.horizontal(|ui: &mut Ui| {
                ui.heading(&plot.name);
                if ui.small_button("Remove").clicked() {
                    events.push(SessionEvent::RemovePlot {
                        name: plot.name.clone(),
                    });
                }
            });
            if let Some(kind) = plot_controls(ui, &plot.name, &plot.kind, frame) {
                events.push(SessionEvent::UpdatePlot {
                    name: plot.name.clone(),
                    kind,
                });
            }
            match &plot.kind {
                PlotKind::Scatter { x, y } => explore_scatter(ui, &plot.name, frame, x, y),
                PlotKind::HeatMap {
                    value,
                    x_axis,
                    y_axis,
                    aggregation,
                } => {
                    ui.label(format!("{} of {value} by {x_axis} × {y_axis}", aggregation.label()));
                    match heat_map(frame, value, x_axis, y_axis, *aggregation) {
                        Ok(grid) => heat_map_grid(ui, &grid),
                        Err(e) => {
                            ui.label(RichText::new(e.to_string()).color(Color32::RED));
                        }
                    }
                }
            }
            ui.separator();
        }
    });
    state.pending.extend(events);
}

/// Column and aggregation pickers for one plot; returns the edited kind.
fn plot_controls(ui: &mut Ui, name: &str, kind: &PlotKind, frame: &FeatureFrame) -> Option<PlotKind> {
    let mut edited = kind.clone();
    ui.horizontal(|ui: &mut Ui| match &mut edited {
        PlotKind::Scatter { x, y } => {
            if let Some(col) = column_picker(ui, format!("{name}_x"), "X", x, &frame.features) {
                *x = col;
            }
            if let Some(col) = column_picker(ui, format!("{name}_y"), "Y", y, &frame.features) {
                *y = col;
            }
        }
        PlotKind::HeatMap {
            value,
            x_axis,
            y_axis,
            aggregation,
        } => {
            if let Some(col) = column_picker(ui, format!("{name}_value"), "Value", value, &frame.features) {
                *value = col;
            }
            if let Some(col) = column_picker(ui, format!("{name}_xaxis"), "X", x_axis, &frame.categorical) {
                *x_axis = col;
            }
            if let Some(col) = column_picker(ui, format!("{name}_yaxis"), "Y", y_axis, &frame.categorical) {
                *y_axis = col;
            }
            egui::ComboBox::from_id_salt(format!("{name}_aggregation"))
                .selected_text(aggregation.label())
                .show_ui(ui, |ui: &mut Ui| {
                    for agg in Aggregation::ALL {
                        ui.selectable_value(aggregation, agg, agg.label());
                    }
                });
        }
    });
    (edited != *kind).then_some(edited)
}

fn explore_scatter(ui: &mut Ui, name: &str, frame: &FeatureFrame, x: &str, y: &str) {
    let (Ok(xs), Ok(ys)) = (numeric_column(&frame.table, x), numeric_column(&frame.table, y)) else {
        ui.label(RichText::new(format!("columns '{x}' / '{y}' are not available")).color(Color32::RED));
        return;
    };
    let points: Vec<[f64; 2]> = xs.into_iter().zip(ys).map(|(a, b)| [a, b]).collect();
    Plot::new(("explore", name))
        .height(300.0)
        .x_axis_label(x)
        .y_axis_label(y)
        .show(ui, |plot_ui| {
            plot_ui.points(Points::new(PlotPoints::new(points)).radius(1.5));
        });
}

/// Painter-drawn grid; empty cells stay blank.
fn heat_map_grid(ui: &mut Ui, grid: &HeatMapGrid) {
    const CELL: f32 = 22.0;
    const LABEL: f32 = 48.0;
    let Some((lo, hi)) = grid.range() else {
        ui.label("No values to aggregate.");
        return;
    };
    let span = if hi > lo { hi - lo } else { 1.0 };
    let size = Vec2::new(
        LABEL + CELL * grid.y_labels.len() as f32,
        LABEL + CELL * grid.x_labels.len() as f32,
    );
    let (rect, response) = ui.allocate_exact_size(size, Sense::hover());
    let painter = ui.painter_at(rect);
    let font = egui::FontId::monospace(11.0);
    let text_color = ui.visuals().text_color();

    for (j, label) in grid.y_labels.iter().enumerate() {
        let pos = Pos2::new(rect.left() + LABEL + CELL * (j as f32 + 0.5), rect.top() + LABEL * 0.5);
        painter.text(pos, egui::Align2::CENTER_CENTER, label.to_string(), font.clone(), text_color);
    }
    let mut hovered = None;
    for (i, label) in grid.x_labels.iter().enumerate() {
        let top = rect.top() + LABEL + CELL * i as f32;
        painter.text(
            Pos2::new(rect.left() + LABEL * 0.5, top + CELL * 0.5),
            egui::Align2::CENTER_CENTER,
            label.to_string(),
            font.clone(),
            text_color,
        );
        for (j, value) in grid.values[i].iter().enumerate() {
            let Some(value) = value else {
                continue;
            };
            let cell = Rect::from_min_size(
                Pos2::new(rect.left() + LABEL + CELL * j as f32, top),
                Vec2::splat(CELL - 1.0),
            );
            painter.rect_filled(cell, 0.0, sequential((value - lo) / span));
            if response.hover_pos().is_some_and(|p| cell.contains(p)) {
                hovered = Some(format!("{} / {}: {value:.4}", label, grid.y_labels[j]));
            }
        }
    }
    if let Some(text) = hovered {
        response.on_hover_text(text);
    }
}

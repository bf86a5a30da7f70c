use eframe::egui::{self, Ui};

use feature_explorer::data::model::{column_values, FeatureFrame};
use feature_explorer::filters::{
    FilterSpec, PolygonSelectionFilter, RangeFilter, SetFilter,
};

// ---------------------------------------------------------------------------
// Per-kind filter editors
// ---------------------------------------------------------------------------

/// Controls for one filter kind, drawn against the frame the filter receives.
pub trait FilterEditor {
    /// Draw the controls. Returns the edited spec when the user changed it.
    fn edit(&self, ui: &mut Ui, id_salt: &str, input: &FeatureFrame) -> Option<FilterSpec>;
}

pub fn editor_for(spec: &FilterSpec) -> &dyn FilterEditor {
    match spec {
        FilterSpec::PolygonSelection(f) => f,
        FilterSpec::Range(f) => f,
        FilterSpec::Set(f) => f,
    }
}

/// Combo box over `options`; returns the newly picked one.
pub(crate) fn column_picker(ui: &mut Ui, id_salt: String, label: &str, current: &str, options: &[String]) -> Option<String> {
    let mut picked = None;
    ui.horizontal(|ui: &mut Ui| {
        ui.label(label);
        egui::ComboBox::from_id_salt(id_salt)
            .selected_text(current)
            .show_ui(ui, |ui: &mut Ui| {
                for col in options {
                    if ui.selectable_label(current == col.as_str(), col).clicked() && current != col.as_str() {
                        picked = Some(col.clone());
                    }
                }
            });
    });
    picked
}

impl FilterEditor for PolygonSelectionFilter {
    fn edit(&self, ui: &mut Ui, id_salt: &str, input: &FeatureFrame) -> Option<FilterSpec> {
        let x = column_picker(ui, format!("{id_salt}_x"), "X", &self.column_x, &input.features);
        let y = column_picker(ui, format!("{id_salt}_y"), "Y", &self.column_y, &input.features);
        let n = self.vertices().len();
        if n > 0 {
            ui.label(format!("Polygon with {n} vertices"));
        } else {
            ui.weak("Draw a lasso or box on the plot to select points");
        }
        if x.is_none() && y.is_none() {
            return None;
        }
        // a polygon drawn in other axes means nothing here
        Some(FilterSpec::PolygonSelection(PolygonSelectionFilter::new(
            x.unwrap_or_else(|| self.column_x.clone()),
            y.unwrap_or_else(|| self.column_y.clone()),
        )))
    }
}

impl FilterEditor for RangeFilter {
    fn edit(&self, ui: &mut Ui, id_salt: &str, input: &FeatureFrame) -> Option<FilterSpec> {
        if let Some(column) = column_picker(ui, format!("{id_salt}_col"), "Column", &self.column, &input.features) {
            return RangeFilter::spanning(input, &column).ok().map(FilterSpec::Range);
        }
        let mut min = self.min;
        let mut max = self.max;
        let speed = ((self.max - self.min).abs() / 200.0).max(1e-6);
        let mut changed = false;
        ui.horizontal(|ui: &mut Ui| {
            ui.label("Min");
            changed |= ui.add(egui::DragValue::new(&mut min).speed(speed)).changed();
            ui.label("Max");
            changed |= ui.add(egui::DragValue::new(&mut max).speed(speed)).changed();
        });
        if ui.small_button("Full range").clicked() {
            return RangeFilter::spanning(input, &self.column).ok().map(FilterSpec::Range);
        }
        changed.then(|| FilterSpec::Range(RangeFilter::new(self.column.clone(), min, max)))
    }
}

impl FilterEditor for SetFilter {
    fn edit(&self, ui: &mut Ui, id_salt: &str, input: &FeatureFrame) -> Option<FilterSpec> {
        if let Some(column) =
            column_picker(ui, format!("{id_salt}_col"), "Column", &self.column, &input.categorical)
        {
            return SetFilter::all_values(input, &column).ok().map(FilterSpec::Set);
        }

        let mut edited: Option<SetFilter> = None;
        ui.horizontal(|ui: &mut Ui| {
            if ui.small_button("All").clicked() {
                edited = SetFilter::all_values(input, &self.column).ok();
            }
            if ui.small_button("None").clicked() {
                edited = Some(SetFilter::new(self.column.clone(), []));
            }
        });
        if edited.is_some() {
            return edited.map(FilterSpec::Set);
        }

        let mut values: Vec<_> = input
            .table
            .column_by_name(&self.column)
            .map(column_values)
            .unwrap_or_default();
        values.sort();
        values.dedup();
        // keep allowed values that the upstream filters removed visible
        for v in &self.allowed {
            if !values.contains(v) {
                values.push(v.clone());
            }
        }

        egui::ScrollArea::vertical()
            .id_salt(format!("{id_salt}_values"))
            .max_height(160.0)
            .show(ui, |ui: &mut Ui| {
                for value in &values {
                    let mut checked = self.allowed.contains(value);
                    if ui.checkbox(&mut checked, value.to_string()).changed() {
                        let mut next = self.clone();
                        next.toggle(value);
                        edited = Some(next);
                    }
                }
            });
        edited.map(FilterSpec::Set)
    }
}

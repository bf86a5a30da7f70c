use std::collections::{BTreeMap, BTreeSet};

use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Mix, Srgb};

use feature_explorer::data::model::CellValue;

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

fn to_color32(rgb: Srgb) -> Color32 {
    Color32::from_rgb(
        (rgb.red.clamp(0.0, 1.0) * 255.0) as u8,
        (rgb.green.clamp(0.0, 1.0) * 255.0) as u8,
        (rgb.blue.clamp(0.0, 1.0) * 255.0) as u8,
    )
}

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Color32> {
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            to_color32(Hsl::new(hue, 0.75, 0.55).into_color())
        })
        .collect()
}

/// Continuous scale for heat maps: dark blue at 0, yellow at 1.
pub fn sequential(t: f64) -> Color32 {
    let low: Hsl = Hsl::new(240.0, 0.6, 0.25);
    let high: Hsl = Hsl::new(55.0, 0.95, 0.6);
    let mixed = low.mix(high, t.clamp(0.0, 1.0) as f32);
    to_color32(mixed.into_color())
}

// ---------------------------------------------------------------------------
// Color mapping: cell value → Color32
// ---------------------------------------------------------------------------

/// Maps the distinct values of a categorical column to distinct colours.
#[derive(Debug, Clone)]
pub struct ColorMap {
    pub column: String,
    mapping: BTreeMap<CellValue, Color32>,
    default_color: Color32,
}

impl ColorMap {
    pub fn new(column: &str, values: &BTreeSet<CellValue>) -> Self {
        let mapping = values
            .iter()
            .cloned()
            .zip(generate_palette(values.len()))
            .collect();
        ColorMap {
            column: column.to_string(),
            mapping,
            default_color: Color32::GRAY,
        }
    }

    pub fn color_for(&self, value: &CellValue) -> Color32 {
        self.mapping
            .get(value)
            .copied()
            .unwrap_or(self.default_color)
    }

    /// Legend entries (value label → colour) for the UI.
    pub fn legend_entries(&self) -> Vec<(String, Color32)> {
        self.mapping
            .iter()
            .map(|(v, c)| (v.to_string(), *c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_colours_are_distinct() {
        let colours = generate_palette(6);
        let unique: BTreeSet<[u8; 4]> = colours.iter().map(|c| c.to_array()).collect();
        assert_eq!(unique.len(), 6);
        assert!(generate_palette(0).is_empty());
    }

    #[test]
    fn unknown_values_fall_back_to_grey() {
        let values: BTreeSet<CellValue> = [CellValue::Integer(1), CellValue::Integer(2)].into();
        let map = ColorMap::new("column", &values);
        assert_ne!(map.color_for(&CellValue::Integer(1)), map.color_for(&CellValue::Integer(2)));
        assert_eq!(map.color_for(&CellValue::Null), Color32::GRAY);
        assert_eq!(map.legend_entries().len(), 2);
    }

    #[test]
    fn sequential_scale_is_clamped() {
        assert_eq!(sequential(-1.0), sequential(0.0));
        assert_eq!(sequential(2.0), sequential(1.0));
        assert_ne!(sequential(0.0), sequential(1.0));
    }
}

mod app;
mod color;
mod ui;

use app::FeatureExplorerApp;
use eframe::egui;
use feature_explorer::config::ExplorerConfig;

fn main() -> eframe::Result {
    env_logger::init();

    let config = match ExplorerConfig::load_from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration, using defaults: {e:#}");
            ExplorerConfig::default()
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 860.0])
            .with_min_inner_size([640.0, 420.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Feature Explorer",
        options,
        Box::new(|_cc| Ok(Box::new(FeatureExplorerApp::new(config)))),
    )
}

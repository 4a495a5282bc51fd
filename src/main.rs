// src/main.rs
mod app;
mod ui;

use anyhow::{anyhow, Context, Result};
use eframe::egui;
use fitting_room::video::NokhwaCameraProvider;
use fitting_room::{GarmentRecord, TryOnConfig};
use tracing::{info, warn};

struct Args {
    config: Option<String>,
    garment: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        garment: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                args.config = Some(iter.next().context("--config needs a path")?);
            }
            other if other.starts_with('-') => return Err(anyhow!("unknown option {}", other)),
            other => args.garment = Some(other.to_string()),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => TryOnConfig::load(path)?,
        None => TryOnConfig::load_or_default(),
    };
    config.validate()?;

    let garment = args
        .garment
        .as_deref()
        .map(GarmentRecord::from_json_file)
        .transpose()?;

    match NokhwaCameraProvider::list_devices() {
        Ok(cameras) => {
            info!("found {} camera(s)", cameras.len());
            for (i, name) in cameras.iter().enumerate() {
                info!("  [{}] {}", i, name);
            }
        }
        Err(e) => warn!("failed to query cameras: {}", e),
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 860.0])
            .with_min_inner_size([960.0, 640.0]),
        centered: true,
        ..Default::default()
    };

    eframe::run_native(
        "Fitting Room",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(create_visuals());
            Box::new(app::TryOnApp::new(config, runtime, garment))
        }),
    )
    .map_err(|e| anyhow!("error running application: {}", e))
}

fn create_visuals() -> egui::Visuals {
    let mut visuals = egui::Visuals::dark();

    visuals.widgets.noninteractive.bg_fill = egui::Color32::from_rgb(30, 30, 35);
    visuals.widgets.inactive.bg_fill = egui::Color32::from_rgb(45, 45, 52);
    visuals.widgets.hovered.bg_fill = egui::Color32::from_rgb(55, 55, 65);
    visuals.widgets.active.bg_fill = egui::Color32::from_rgb(70, 130, 240);

    for widget in [
        &mut visuals.widgets.noninteractive,
        &mut visuals.widgets.inactive,
        &mut visuals.widgets.hovered,
        &mut visuals.widgets.active,
    ] {
        widget.rounding = egui::Rounding::same(6.0);
    }
    visuals.window_rounding = egui::Rounding::same(10.0);

    visuals
}

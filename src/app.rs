// src/app.rs
use crate::ui::{TryOnView, UIComponents};

use chrono::{DateTime, Local};
use eframe::egui;
use fitting_room::capture;
use fitting_room::data::MeasurementLog;
use fitting_room::{ClothingCategory, GarmentRecord, SessionState, TryOnConfig, TryOnSession};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;
use tokio::runtime::Runtime;
use tracing::{error, info, warn};

/// Readiness changes reported by the session, drained once per repaint.
type ReadyEvents = Rc<RefCell<Vec<(bool, Option<String>)>>>;

pub struct TryOnApp {
    config: TryOnConfig,
    runtime: Runtime,
    session: Option<TryOnSession>,
    ready_events: ReadyEvents,

    garment: Option<GarmentRecord>,
    category: ClothingCategory,

    view: TryOnView,
    view_size: Option<(u32, u32)>,
    ui_components: UIComponents,
    status_message: Option<(String, bool)>,
    show_measurements: bool,

    recording: Option<MeasurementLog>,
    recording_start: Option<DateTime<Local>>,
    recording_clock: Instant,
    last_detections: u64,
}

impl TryOnApp {
    pub fn new(config: TryOnConfig, runtime: Runtime, garment: Option<GarmentRecord>) -> Self {
        let category = garment
            .as_ref()
            .map(|g| g.category)
            .unwrap_or(ClothingCategory::Shirt);
        Self {
            config,
            runtime,
            session: None,
            ready_events: Rc::new(RefCell::new(Vec::new())),
            garment,
            category,
            view: TryOnView::new(),
            view_size: None,
            ui_components: UIComponents::new(),
            status_message: None,
            show_measurements: true,
            recording: None,
            recording_start: None,
            recording_clock: Instant::now(),
            last_detections: 0,
        }
    }

    fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(TryOnSession::state)
    }

    fn start_session(&mut self) {
        let Some(garment) = self.garment.clone() else {
            self.status_message = Some(("Open a garment first".into(), true));
            return;
        };
        self.stop_session();

        let mut session = TryOnSession::native(self.config.clone(), garment);
        let events = Rc::clone(&self.ready_events);
        session.on_ready_change(move |ready, message| {
            events.borrow_mut().push((ready, message.map(str::to_string)));
        });

        self.status_message = Some(("Starting camera...".into(), false));
        if let Err(e) = self.runtime.block_on(session.start()) {
            error!("session failed to start: {}", e);
            self.status_message = Some((format!("{} {}", e, e.remediation()), true));
        }
        self.session = Some(session);
        self.view_size = None;
        self.last_detections = 0;
    }

    fn stop_session(&mut self) {
        if self.recording.is_some() {
            self.toggle_recording();
        }
        if let Some(mut session) = self.session.take() {
            session.terminate();
        }
        self.view.clear();
    }

    fn open_garment(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .set_title("Open garment")
            .add_filter("glTF model", &["gltf", "glb"])
            .add_filter("Garment record", &["json"])
            .pick_file()
        else {
            return;
        };

        let record = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            match GarmentRecord::from_json_file(&path) {
                Ok(record) => record,
                Err(e) => {
                    self.status_message = Some((e.to_string(), true));
                    return;
                }
            }
        } else {
            let mut record = GarmentRecord::new(path.to_string_lossy(), self.category);
            record.name = path.file_stem().map(|s| s.to_string_lossy().into_owned());
            record
        };
        self.category = record.category;
        self.select_garment(record);
    }

    fn select_garment(&mut self, record: GarmentRecord) {
        info!("selected garment {} ({})", record.display_name(), record.category);
        let tracking = self.session_state() == Some(SessionState::Tracking);
        if let (true, Some(session)) = (tracking, self.session.as_mut()) {
            match self.runtime.block_on(session.switch_garment(record.clone())) {
                Ok(()) => self.status_message = Some((format!("Now wearing {}", record.display_name()), false)),
                Err(e) => {
                    warn!("garment switch failed: {}", e);
                    self.status_message = Some((e.to_string(), true));
                    return;
                }
            }
        }
        self.garment = Some(record);
    }

    fn save_snapshot(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let result = session
            .snapshot()
            .and_then(|image| capture::save_snapshot(&image, &self.config.export.output_directory));
        self.status_message = Some(match result {
            Ok(path) => (format!("Saved {}", path.display()), false),
            Err(e) => (e.to_string(), true),
        });
    }

    fn toggle_recording(&mut self) {
        if let Some(log) = self.recording.take() {
            self.recording_start = None;
            let exported = log.export_csv().and_then(|csv| {
                log.export_summary()?;
                log.generate_report()?;
                Ok(csv)
            });
            self.status_message = Some(match exported {
                Ok(path) => (format!("Measurements written to {}", path.display()), false),
                Err(e) => (e.to_string(), true),
            });
            return;
        }

        let (Some(session), Some(garment)) = (self.session.as_ref(), self.garment.clone()) else {
            return;
        };
        self.recording = Some(MeasurementLog::new(
            &self.config.export.output_directory,
            session.id(),
            garment,
            None,
        ));
        self.recording_start = Some(Local::now());
        self.recording_clock = Instant::now();
    }

    /// Runs one tick and pulls the result into the texture and the recorder.
    fn drive_session(&mut self, ctx: &egui::Context) {
        for (ready, message) in self.ready_events.borrow_mut().drain(..) {
            info!("ready changed to {}", ready);
            if let Some(message) = message {
                self.status_message = Some((message, true));
            } else if ready {
                self.status_message = Some(("Tracking".into(), false));
            }
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.tick() {
            Ok(true) => {
                if let Some(view) = session.view() {
                    self.view.update_frame(ctx, view);
                }
            }
            Ok(false) => {}
            Err(e) => {
                self.status_message = Some((format!("{} {}", e, e.remediation()), true));
            }
        }

        let status = session.status();
        if status.detections != self.last_detections {
            self.last_detections = status.detections;
            if let Some(log) = self.recording.as_mut() {
                log.add_frame(
                    self.recording_clock.elapsed().as_secs_f64(),
                    session.last_measurement(),
                    status.stability,
                    session.transform(),
                );
            }
        }
    }

    fn render_header(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.add_space(8.0);
            egui::menu::bar(ui, |ui| {
                ui.heading(egui::RichText::new("Fitting Room").color(self.ui_components.theme.primary));
                ui.separator();

                if ui.button("📂 Open Garment").clicked() {
                    self.open_garment();
                }

                let before = self.category;
                egui::ComboBox::from_id_source("category")
                    .selected_text(self.category.label())
                    .show_ui(ui, |ui| {
                        for category in ClothingCategory::ALL {
                            ui.selectable_value(&mut self.category, category, category.label());
                        }
                    });
                if self.category != before {
                    if let Some(mut record) = self.garment.clone() {
                        record.category = self.category;
                        self.select_garment(record);
                    }
                }

                ui.separator();
                let garment = self
                    .garment
                    .as_ref()
                    .map(|g| g.display_name().to_string())
                    .unwrap_or_else(|| "No garment".into());
                ui.colored_label(self.ui_components.theme.accent, garment);

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.checkbox(&mut self.show_measurements, "Measurements");
                });
            });
            ui.add_space(8.0);
        });
    }

    fn render_control_panel(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("controls").show(ctx, |ui| {
            ui.add_space(8.0);
            ui.horizontal(|ui| {
                let active = matches!(
                    self.session_state(),
                    Some(state) if !state.is_terminal()
                );
                let start_stop = if active {
                    egui::Button::new("⏹ Stop").fill(self.ui_components.theme.error)
                } else {
                    egui::Button::new("▶ Try On").fill(self.ui_components.theme.success)
                };
                if ui.add_sized([120.0, 36.0], start_stop).clicked() {
                    if active {
                        self.stop_session();
                    } else {
                        self.start_session();
                    }
                }

                let tracking = self.session_state() == Some(SessionState::Tracking);
                ui.add_enabled_ui(tracking, |ui| {
                    if ui.add_sized([120.0, 36.0], egui::Button::new("📷 Snapshot")).clicked() {
                        self.save_snapshot();
                    }
                    let label = if self.recording.is_some() { "⏹ Stop Recording" } else { "⏺ Record" };
                    if ui.add_sized([140.0, 36.0], egui::Button::new(label)).clicked() {
                        self.toggle_recording();
                    }
                });

                self.ui_components
                    .draw_recording_indicator(ui, self.recording.is_some());
                if let Some(start) = self.recording_start {
                    let elapsed = Local::now()
                        .signed_duration_since(start)
                        .to_std()
                        .unwrap_or_default();
                    ui.label(format!("{:02}:{:02}", elapsed.as_secs() / 60, elapsed.as_secs() % 60));
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if let Some((message, is_error)) = &self.status_message {
                        let color = if *is_error {
                            self.ui_components.theme.error
                        } else {
                            self.ui_components.theme.text_secondary
                        };
                        ui.colored_label(color, message);
                    }
                });
            });
            ui.add_space(8.0);
        });
    }

    fn render_side_panel(&mut self, ctx: &egui::Context) {
        if !self.show_measurements {
            return;
        }
        egui::SidePanel::right("status").min_width(260.0).show(ctx, |ui| {
            ui.heading("Tracking");
            let Some(session) = self.session.as_ref() else {
                ui.label("Not started");
                return;
            };
            let status = session.status();

            ui.colored_label(
                self.ui_components.state_color(status.state),
                status.state.as_str(),
            );
            self.ui_components.draw_quality_bar(ui, "Stability ", status.stability);
            self.ui_components.draw_quality_bar(ui, "Confidence", status.confidence);
            ui.label(format!("{:.1} fps", status.fps));
            if let Some(backend) = status.backend {
                ui.label(format!("Pose backend: {:?}", backend));
            }
            if status.consecutive_failures > 0 {
                ui.colored_label(
                    self.ui_components.theme.warning,
                    format!("{} failed frames", status.consecutive_failures),
                );
            }

            ui.separator();
            ui.heading("Measurements");
            self.ui_components
                .draw_measurements(ui, session.last_measurement());

            if let Some(error) = session.error() {
                ui.separator();
                ui.colored_label(self.ui_components.theme.error, error.to_string());
                ui.label(error.remediation());
            }
        });
    }

    fn render_main_content(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let frame = self.session.as_ref().and_then(TryOnSession::frame_size);
            let size = TryOnView::fitted_size(ui.available_size(), frame);

            let wanted = (size.x.round() as u32, size.y.round() as u32);
            if self.view_size != Some(wanted) {
                if let Some(session) = self.session.as_mut() {
                    if session.state() == SessionState::Tracking {
                        session.resize(wanted.0, wanted.1);
                        self.view_size = Some(wanted);
                    }
                }
            }

            let placeholder = match self.session_state() {
                None => "Open a garment and press Try On",
                Some(SessionState::Error) => "Try-on stopped",
                Some(_) => "Waiting for camera",
            };
            ui.centered_and_justified(|ui| {
                self.view.show(ui, size, placeholder);
            });
        });
    }
}

impl eframe::App for TryOnApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drive_session(ctx);

        self.render_header(ctx);
        self.render_control_panel(ctx);
        self.render_side_panel(ctx);
        self.render_main_content(ctx);

        if self.session_state() == Some(SessionState::Tracking) {
            ctx.request_repaint();
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.stop_session();
    }
}

// src/ui.rs - Widgets for the try-on window
use eframe::egui::{self, Color32, Pos2, Rect, Stroke, Vec2};
use fitting_room::measurement::BodyMeasurements;
use fitting_room::video::FrameSize;
use fitting_room::SessionState;
use image::RgbaImage;

#[derive(Debug, Clone)]
pub struct Theme {
    pub primary: Color32,
    pub accent: Color32,
    pub surface: Color32,
    pub error: Color32,
    pub warning: Color32,
    pub success: Color32,
    pub text_primary: Color32,
    pub text_secondary: Color32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary: Color32::from_rgb(70, 130, 240),
            accent: Color32::from_rgb(255, 152, 0),
            surface: Color32::from_rgb(30, 30, 35),
            error: Color32::from_rgb(244, 67, 54),
            warning: Color32::from_rgb(255, 152, 0),
            success: Color32::from_rgb(76, 175, 80),
            text_primary: Color32::WHITE,
            text_secondary: Color32::from_rgb(200, 200, 200),
        }
    }
}

pub struct UIComponents {
    pub theme: Theme,
    record_pulse: f32,
}

impl UIComponents {
    pub fn new() -> Self {
        Self {
            theme: Theme::default(),
            record_pulse: 0.0,
        }
    }

    pub fn state_color(&self, state: SessionState) -> Color32 {
        match state {
            SessionState::Tracking => self.theme.success,
            SessionState::Initializing
            | SessionState::CameraGranted
            | SessionState::ModelLoaded => self.theme.warning,
            SessionState::Error => self.theme.error,
            SessionState::Terminated => self.theme.text_secondary,
        }
    }

    /// Horizontal meter; green when steady, amber when wobbling, red when lost.
    pub fn draw_quality_bar(&self, ui: &mut egui::Ui, label: &str, value: f32) {
        let value = value.clamp(0.0, 1.0);
        ui.horizontal(|ui| {
            ui.label(label);

            let size = Vec2::new(180.0, 18.0);
            let rect = ui.allocate_space(size).1;
            let painter = ui.painter();
            painter.rect_filled(rect, egui::Rounding::same(4.0), self.theme.surface);

            let color = if value > 0.7 {
                self.theme.success
            } else if value > 0.4 {
                self.theme.warning
            } else {
                self.theme.error
            };
            let fill = Rect::from_min_size(rect.min, Vec2::new(size.x * value, size.y));
            painter.rect_filled(fill, egui::Rounding::same(4.0), color);

            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                format!("{:.0}%", value * 100.0),
                egui::FontId::proportional(12.0),
                self.theme.text_primary,
            );
        });
    }

    pub fn draw_recording_indicator(&mut self, ui: &mut egui::Ui, is_recording: bool) {
        if !is_recording {
            return;
        }

        self.record_pulse += ui.input(|i| i.unstable_dt) * 2.0;
        let pulse = (self.record_pulse.sin() + 1.0) * 0.5;
        let color = Color32::from_rgb(244, (67.0 + pulse * 30.0) as u8, 54);

        ui.horizontal(|ui| {
            let (rect, _) = ui.allocate_exact_size(Vec2::splat(16.0), egui::Sense::hover());
            ui.painter().circle_filled(rect.center(), 5.0 + pulse * 2.0, color);
            ui.colored_label(color, "REC");
        });
    }

    pub fn draw_measurements(&self, ui: &mut egui::Ui, m: Option<&BodyMeasurements>) {
        let Some(m) = m else {
            ui.colored_label(self.theme.text_secondary, "No body detected");
            return;
        };

        egui::Grid::new("measurements").num_columns(2).show(ui, |ui| {
            let rows = [
                ("Shoulder width", m.shoulder_width),
                ("Torso length", m.torso_length),
                ("Hip width", m.hip_width),
                ("Waist width", m.waist_width),
                ("Arm length", m.arm_length),
                ("Leg length", m.leg_length),
                ("Body height", m.body_height),
            ];
            for (label, px) in rows {
                ui.label(label);
                ui.label(format!("{:.0} px", px));
                ui.end_row();
            }
            ui.label("Tilt");
            ui.label(format!("{:.1}°", m.tilt.to_degrees()));
            ui.end_row();
            ui.label("Keypoints used");
            ui.label(m.keypoints.len().to_string());
            ui.end_row();
        });
    }
}

/// Texture-backed display of the session's composited view.
pub struct TryOnView {
    texture: Option<egui::TextureHandle>,
    aspect_ratio: f32,
}

impl TryOnView {
    pub fn new() -> Self {
        Self {
            texture: None,
            aspect_ratio: 16.0 / 9.0,
        }
    }

    pub fn update_frame(&mut self, ctx: &egui::Context, frame: &RgbaImage) {
        let size = [frame.width() as usize, frame.height() as usize];
        let image = egui::ColorImage::from_rgba_unmultiplied(size, frame.as_raw());
        if frame.height() > 0 {
            self.aspect_ratio = frame.width() as f32 / frame.height() as f32;
        }

        match self.texture.as_mut() {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.texture = Some(ctx.load_texture("tryon_view", image, egui::TextureOptions::LINEAR));
            }
        }
    }

    pub fn clear(&mut self) {
        self.texture = None;
    }

    /// Largest size with the camera's aspect that fits in `available`.
    pub fn fitted_size(available: Vec2, frame: Option<FrameSize>) -> Vec2 {
        let aspect = frame.filter(FrameSize::is_valid).map(|f| f.aspect()).unwrap_or(16.0 / 9.0);
        let width = available.x.min(available.y * aspect).max(1.0);
        Vec2::new(width, width / aspect)
    }

    pub fn show(&self, ui: &mut egui::Ui, size: Vec2, placeholder: &str) {
        let size = if size.x > 0.0 && size.y > 0.0 {
            size
        } else {
            Vec2::new(ui.available_width(), ui.available_width() / self.aspect_ratio)
        };
        let (rect, _response) = ui.allocate_exact_size(size, egui::Sense::hover());

        match &self.texture {
            Some(texture) => {
                ui.painter().image(
                    texture.id(),
                    rect,
                    Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                    Color32::WHITE,
                );
            }
            None => {
                ui.painter()
                    .rect_filled(rect, egui::Rounding::same(4.0), Color32::from_rgb(50, 50, 55));
                ui.painter().rect_stroke(
                    rect,
                    egui::Rounding::same(4.0),
                    Stroke::new(1.0, Color32::from_rgb(80, 80, 88)),
                );
                ui.painter().text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    placeholder,
                    egui::FontId::proportional(16.0),
                    Color32::from_rgb(150, 150, 155),
                );
            }
        }
    }
}

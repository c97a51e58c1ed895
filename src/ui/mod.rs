use crate::assets::{format_size, EntryId, LoadStatus, ModelEntry};
use crate::render::CameraPreset;
use crate::scene::ViewerState;

const SIDE_PANEL_WIDTH: f32 = 320.0;
const SELECTED_ROW: egui::Color32 = egui::Color32::from_rgb(0xe0, 0xe0, 0xe0);

#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    PickModels,
    PickEnvironment,
    UseDefaultEnvironment,
    ApplyPreset([f32; 3]),
    Select(usize),
    Remove(usize),
    Capture,
    Download(EntryId),
}

/// What the shell needs from the renderer for this frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanvasView {
    pub texture: Option<egui::TextureId>,
    pub loading: bool,
    pub capture_pending: bool,
}

#[derive(Debug, Default)]
pub struct ShellOutput {
    pub commands: Vec<UiCommand>,
    /// Desired canvas size in physical pixels, when the canvas is on screen.
    pub canvas_size_px: Option<[u32; 2]>,
    /// Pointer drag over the canvas in physical pixels.
    pub orbit_drag: [f32; 2],
    pub zoom_steps: f32,
}

pub struct UiState {
    status: String,
}

impl UiState {
    pub fn new() -> Self {
        Self {
            status: String::new(),
        }
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn show(&mut self, ctx: &egui::Context, state: &ViewerState, canvas: CanvasView) -> ShellOutput {
        let mut output = ShellOutput::default();

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("GLB PREVIEW");
                if !self.status.is_empty() {
                    ui.separator();
                    ui.label(&self.status);
                    if ui.small_button("✕").clicked() {
                        self.status.clear();
                    }
                }
            });
        });

        if !state.has_loaded() {
            egui::CentralPanel::default().show(ctx, |ui| {
                self.intake_surface(ui, &mut output);
            });
            return output;
        }

        egui::SidePanel::right("model_list")
            .resizable(true)
            .default_width(SIDE_PANEL_WIDTH)
            .show(ctx, |ui| {
                self.side_panel(ui, state, canvas, &mut output);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            canvas_panel(ui, canvas, &mut output);
        });

        output
    }

    fn intake_surface(&self, ui: &mut egui::Ui, output: &mut ShellOutput) {
        ui.vertical_centered(|ui| {
            ui.add_space(ui.available_height() * 0.35);
            let button = egui::Button::new(egui::RichText::new("Choose .glb files").size(20.0))
                .min_size(egui::vec2(240.0, 56.0));
            if ui.add(button).clicked() {
                output.commands.push(UiCommand::PickModels);
            }
            ui.add_space(8.0);
            ui.label(egui::RichText::new("or drop them anywhere on this window").weak());
        });
    }

    fn side_panel(
        &self,
        ui: &mut egui::Ui,
        state: &ViewerState,
        canvas: CanvasView,
        output: &mut ShellOutput,
    ) {
        ui.add_space(6.0);
        if ui
            .add_sized([ui.available_width(), 36.0], egui::Button::new("Add models"))
            .clicked()
        {
            output.commands.push(UiCommand::PickModels);
        }

        ui.add_space(8.0);
        ui.strong("Controls");
        ui.horizontal(|ui| {
            if ui.button("Change environment map").clicked() {
                output.commands.push(UiCommand::PickEnvironment);
            }
            if ui.button("Default lighting").clicked() {
                output.commands.push(UiCommand::UseDefaultEnvironment);
            }
        });
        let environment = state.environment();
        let mut environment_label = format!("Lighting: {}", environment.source().label());
        if environment.is_converting() {
            environment_label.push_str(" (converting…)");
        }
        ui.label(egui::RichText::new(environment_label).small());

        ui.horizontal_wrapped(|ui| {
            for (number, preset) in CameraPreset::ALL.iter().enumerate() {
                let position = preset.position();
                let active = state.camera().position() == Some(position);
                let button = egui::Button::new(format!("{}", number + 1)).selected(active);
                if ui
                    .add(button)
                    .on_hover_text(format!(
                        "{} ({}, {}, {})",
                        preset.label(),
                        position[0],
                        position[1],
                        position[2]
                    ))
                    .clicked()
                {
                    output.commands.push(UiCommand::ApplyPreset(position));
                }
            }
        });

        ui.separator();
        ui.strong("Models");
        let selection = state.registry().selection();
        egui::ScrollArea::vertical().show(ui, |ui| {
            for (index, entry) in state.registry().entries().iter().enumerate() {
                let selected = selection == Some(index);
                model_row(ui, index, entry, selected, canvas.capture_pending, output);
            }
        });
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

fn model_row(
    ui: &mut egui::Ui,
    index: usize,
    entry: &ModelEntry,
    selected: bool,
    capture_pending: bool,
    output: &mut ShellOutput,
) {
    let fill = if selected {
        SELECTED_ROW
    } else {
        ui.visuals().extreme_bg_color
    };
    egui::Frame::group(ui.style()).fill(fill).show(ui, |ui| {
        ui.set_width(ui.available_width());
        let mut name = egui::RichText::new(&entry.name).strong();
        if selected {
            name = name.color(egui::Color32::BLACK);
        }
        if ui.selectable_label(selected, name).clicked() && !selected {
            output.commands.push(UiCommand::Select(index));
        }
        ui.horizontal(|ui| {
            ui.label(format_size(entry.size));
            ui.label(status_text(&entry.status));
        });
        let actions = row_actions(entry, selected);
        ui.horizontal(|ui| {
            if actions.remove && ui.button("🗑").on_hover_text("Remove").clicked() {
                output.commands.push(UiCommand::Remove(index));
            }
            if actions.download && ui.button("Download").clicked() {
                output.commands.push(UiCommand::Download(entry.id));
            }
            if actions.capture
                && ui
                    .add_enabled(!capture_pending, egui::Button::new("Capture"))
                    .clicked()
            {
                output.commands.push(UiCommand::Capture);
            }
        });
    });
}

/// Buttons offered on a model row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowActions {
    remove: bool,
    download: bool,
    capture: bool,
}

/// Failed rows never get a screenshot, so they offer removal on their own.
fn row_actions(entry: &ModelEntry, selected: bool) -> RowActions {
    let has_screenshot = entry.screenshot.is_some();
    RowActions {
        remove: has_screenshot || matches!(entry.status, LoadStatus::Failed(_)),
        download: has_screenshot,
        capture: selected && matches!(entry.status, LoadStatus::Ready { .. }),
    }
}

fn canvas_panel(ui: &mut egui::Ui, canvas: CanvasView, output: &mut ShellOutput) {
    let available = ui.available_size();
    // Square canvas as wide as the panel allows.
    let side = available.x.min(available.y).max(1.0);
    let size = egui::vec2(side, side);
    let pixels_per_point = ui.ctx().pixels_per_point();
    output.canvas_size_px = Some([
        (side * pixels_per_point).round().max(1.0) as u32,
        (side * pixels_per_point).round().max(1.0) as u32,
    ]);

    let Some(texture) = canvas.texture else {
        ui.allocate_space(size);
        return;
    };
    let image = egui::Image::new(egui::load::SizedTexture::new(texture, size))
        .sense(egui::Sense::click_and_drag());
    let response = ui.add(image);
    if response.dragged_by(egui::PointerButton::Primary) {
        let delta = response.drag_delta() * pixels_per_point;
        output.orbit_drag = [delta.x, delta.y];
    }
    if response.hovered() {
        let scroll = ui.input(|input| input.raw_scroll_delta.y);
        if scroll != 0.0 {
            // One wheel notch is reported as 50 points.
            output.zoom_steps = scroll / 50.0;
        }
    }
    if canvas.loading {
        ui.painter().text(
            response.rect.center(),
            egui::Align2::CENTER_CENTER,
            "Loading…",
            egui::FontId::proportional(18.0),
            egui::Color32::DARK_GRAY,
        );
    }
}

fn status_text(status: &LoadStatus) -> String {
    match status {
        LoadStatus::Pending => "queued".to_string(),
        LoadStatus::Loading => "loading…".to_string(),
        LoadStatus::Ready { meshes, triangles } => format!("{meshes} meshes, {triangles} tris"),
        LoadStatus::Failed(message) => format!("failed: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{row_actions, status_text, CanvasView, RowActions, UiState};
    use crate::assets::{IncomingFile, LoadStatus, Screenshot};
    use crate::scene::{Action, ViewerState};
    use std::sync::Arc;

    fn run_frame(ui: &mut UiState, state: &ViewerState) -> super::ShellOutput {
        let ctx = egui::Context::default();
        let mut output = None;
        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            output = Some(ui.show(ctx, state, CanvasView::default()));
        });
        output.unwrap_or_default()
    }

    #[test]
    fn intake_surface_hides_canvas_until_first_load() {
        let mut ui = UiState::new();
        let state = ViewerState::new();
        let output = run_frame(&mut ui, &state);
        assert!(output.canvas_size_px.is_none());
        assert!(output.commands.is_empty());
    }

    #[test]
    fn canvas_is_square_after_first_load() {
        let mut ui = UiState::new();
        let mut state = ViewerState::new();
        state.dispatch(Action::AddFiles(vec![IncomingFile::new("a.glb", vec![0; 4])]));
        let output = run_frame(&mut ui, &state);
        let [width, height] = output.canvas_size_px.unwrap();
        assert_eq!(width, height);
        assert!(width > 0);
    }

    #[test]
    fn status_text_describes_each_state() {
        assert_eq!(status_text(&LoadStatus::Pending), "queued");
        assert_eq!(
            status_text(&LoadStatus::Ready {
                meshes: 2,
                triangles: 12
            }),
            "2 meshes, 12 tris"
        );
        assert!(status_text(&LoadStatus::Failed("bad".to_string())).contains("bad"));
    }

    #[test]
    fn status_line_can_be_replaced() {
        let mut ui = UiState::default();
        ui.set_status("Saved screenshot.png");
        assert_eq!(ui.status, "Saved screenshot.png");
    }

    #[test]
    fn failed_row_offers_removal_without_screenshot() {
        let mut state = ViewerState::new();
        state.dispatch(Action::AddFiles(vec![IncomingFile::new("broken.glb", vec![1; 8])]));
        let entry = state.registry().entries()[0].id;
        state.dispatch(Action::SetStatus {
            entry,
            status: LoadStatus::Failed("failed to parse glTF".to_string()),
        });

        let row = &state.registry().entries()[0];
        assert!(row.screenshot.is_none());
        assert_eq!(
            row_actions(row, true),
            RowActions {
                remove: true,
                download: false,
                capture: false,
            }
        );
    }

    #[test]
    fn pending_row_waits_for_a_screenshot() {
        let mut state = ViewerState::new();
        state.dispatch(Action::AddFiles(vec![IncomingFile::new("a.glb", vec![0; 4])]));
        let entry = state.registry().entries()[0].id;
        assert!(!row_actions(&state.registry().entries()[0], false).remove);

        state.dispatch(Action::SetStatus {
            entry,
            status: LoadStatus::Ready {
                meshes: 1,
                triangles: 2,
            },
        });
        state.dispatch(Action::ScreenshotCaptured {
            entry,
            screenshot: Screenshot {
                width: 1,
                height: 1,
                png: Arc::new(vec![0; 4]),
            },
        });
        let actions = row_actions(&state.registry().entries()[0], true);
        assert!(actions.remove && actions.download && actions.capture);
    }
}

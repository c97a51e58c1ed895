use crate::render::EguiFrameOutput;
use egui_winit::winit::event::WindowEvent;
use winit::window::Window;

/// egui context plus the winit glue for the viewer window.
pub struct EguiHost {
    ctx: egui::Context,
    input: egui_winit::State,
}

impl EguiHost {
    pub fn new(window: &Window, max_texture_side: usize) -> Self {
        let ctx = egui::Context::default();
        // Light theme to sit next to the white canvas.
        ctx.set_theme(egui::Theme::Light);
        let input = egui_winit::State::new(
            ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
            Some(max_texture_side),
        );
        Self { ctx, input }
    }

    /// Feed a window event to egui. Returns true when egui consumed it.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        let response = self.input.on_window_event(window, event);
        if response.repaint {
            window.request_redraw();
        }
        response.consumed
    }

    pub fn wants_keyboard_input(&self) -> bool {
        self.ctx.wants_keyboard_input()
    }

    pub fn run_ui(
        &mut self,
        window: &Window,
        build: impl FnMut(&egui::Context),
    ) -> EguiFrameOutput {
        let raw_input = self.input.take_egui_input(window);
        let egui::FullOutput {
            platform_output,
            textures_delta,
            shapes,
            pixels_per_point,
            ..
        } = self.ctx.run(raw_input, build);
        self.input.handle_platform_output(window, platform_output);

        let size = window.inner_size();
        EguiFrameOutput {
            clipped_primitives: self.ctx.tessellate(shapes, pixels_per_point),
            textures_delta,
            pixels_per_point,
            screen_size_px: [size.width.max(1), size.height.max(1)],
        }
    }
}

mod egui_host;
mod input;
mod timing;
mod workers;

use crate::assets::{EntryId, IncomingFile, LoadStatus};
use crate::config::ViewerConfig;
use crate::render::{
    CaptureScheduler, DecodeOutcome, OrbitControls, RenderContext, RenderSession,
};
use crate::scene::{Action, Effect, ViewerState};
use crate::ui::{CanvasView, UiCommand, UiState};
use egui_host::EguiHost;
use input::InputState;
use timing::FrameTiming;
pub use workers::ViewerEvent;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

pub struct App {
    config: ViewerConfig,
    proxy: EventLoopProxy<ViewerEvent>,
    window: Option<Arc<Window>>,
    egui: Option<EguiHost>,
    render: Option<RenderContext>,
    state: ViewerState,
    session: RenderSession,
    orbit: OrbitControls,
    capture: CaptureScheduler,
    ui: UiState,
    input: InputState,
    timing: FrameTiming,
    target_frame_duration: Duration,
    next_frame_time: Instant,
}

impl App {
    fn new(config: ViewerConfig, proxy: EventLoopProxy<ViewerEvent>) -> Self {
        Self {
            proxy,
            window: None,
            egui: None,
            render: None,
            state: ViewerState::new(),
            session: RenderSession::new(),
            orbit: OrbitControls::new(config.orbit),
            capture: CaptureScheduler::new(config.settle_frames),
            ui: UiState::new(),
            input: InputState::default(),
            timing: FrameTiming::new(config.window_title.clone()),
            target_frame_duration: Duration::from_millis(16),
            next_frame_time: Instant::now(),
            config,
        }
    }

    fn update_target_frame_duration(&mut self, window: &Window) {
        let mut target = Duration::from_millis(16);
        if let Some(monitor) = window.current_monitor() {
            if let Some(millihz) = monitor.refresh_rate_millihertz() {
                let hz = millihz as f32 / 1000.0;
                if hz > 1.0 {
                    target = Duration::from_secs_f32(1.0 / hz);
                }
            }
        }
        self.target_frame_duration = target;
        self.next_frame_time = Instant::now() + self.target_frame_duration;
    }

    fn dispatch(&mut self, action: Action) {
        for effect in self.state.dispatch(action) {
            match effect {
                Effect::ConvertEnvironment(request) => {
                    workers::spawn_conversion(self.proxy.clone(), request);
                }
                Effect::EnvironmentChanged => {
                    if let Some(render) = &mut self.render {
                        render.set_environment(self.state.environment().probe());
                    }
                    self.capture.arm();
                }
                Effect::Notice(message) => self.ui.set_status(message),
            }
        }
        self.sync_session();
    }

    /// Start a decode when the selection needs one and drop geometry nobody references.
    fn sync_session(&mut self) {
        if let Some(request) = self
            .session
            .sync_selection(self.state.selected(), self.state.sources())
        {
            log::info!("Loading '{}'", request.name);
            self.state.dispatch(Action::SetStatus {
                entry: request.tag.entry,
                status: LoadStatus::Loading,
            });
            workers::spawn_decode(self.proxy.clone(), request);
        }
        self.session.retain_digests(self.state.registry().digests());
        log::trace!("{} decoded models cached", self.session.cached_models());
    }

    fn handle_viewer_event(&mut self, event: ViewerEvent) {
        match event {
            ViewerEvent::ModelDecoded { tag, result } => {
                let status = match &result {
                    Ok(geometry) => LoadStatus::Ready {
                        meshes: geometry.meshes.len(),
                        triangles: geometry.triangle_count(),
                    },
                    Err(message) => LoadStatus::Failed(message.clone()),
                };
                match self.session.complete_decode(tag, result) {
                    DecodeOutcome::Accepted => {}
                    DecodeOutcome::Stale => log::debug!("Discarded stale decode for {:?}", tag.entry),
                    DecodeOutcome::Failed(message) => {
                        log::warn!("Keeping previous model after failed decode: {}", message);
                    }
                }
                self.dispatch(Action::SetStatus {
                    entry: tag.entry,
                    status,
                });
            }
            ViewerEvent::EnvironmentConverted { tag, result } => {
                self.dispatch(Action::EnvironmentConverted { tag, result });
            }
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn handle_ui_command(&mut self, command: UiCommand) {
        match command {
            UiCommand::PickModels => self.handle_pick_models_action(),
            UiCommand::PickEnvironment => self.handle_pick_environment_action(),
            UiCommand::UseDefaultEnvironment => self.dispatch(Action::UseDefaultEnvironment),
            UiCommand::ApplyPreset(position) => self.dispatch(Action::ApplyPreset(position)),
            UiCommand::Select(index) => self.dispatch(Action::Select(index)),
            UiCommand::Remove(index) => self.dispatch(Action::Remove(index)),
            UiCommand::Capture => self.capture.request(),
            UiCommand::Download(entry) => self.handle_download_action(entry),
        }
    }

    fn handle_pick_models_action(&mut self) {
        let Some(paths) = rfd::FileDialog::new()
            .add_filter("glTF binary", &["glb"])
            .pick_files()
        else {
            return;
        };
        let files = paths
            .iter()
            .filter_map(|path| self.read_file(path))
            .collect::<Vec<_>>();
        self.dispatch(Action::AddFiles(files));
    }

    fn handle_pick_environment_action(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Radiance HDR", &["hdr"])
            .pick_file()
        else {
            return;
        };
        if let Some(file) = self.read_file(&path) {
            self.dispatch(Action::UseCustomEnvironment(file));
        }
    }

    fn handle_download_action(&mut self, entry: EntryId) {
        let Some(screenshot) = self
            .state
            .registry()
            .get(entry)
            .and_then(|model| model.screenshot.clone())
        else {
            return;
        };
        let Some(path) = rfd::FileDialog::new()
            .set_file_name(&self.config.screenshot_file_name)
            .add_filter("PNG image", &["png"])
            .save_file()
        else {
            return;
        };
        match std::fs::write(&path, screenshot.png.as_slice()) {
            Ok(()) => {
                log::info!("Saved screenshot to {}", path.display());
                self.ui.set_status(format!("Saved {}", path.display()));
            }
            Err(err) => {
                log::warn!("Failed to write {}: {}", path.display(), err);
                self.ui
                    .set_status(format!("Could not save {}: {}", path.display(), err));
            }
        }
    }

    fn handle_dropped_file(&mut self, path: &Path) {
        let extension = path
            .extension()
            .and_then(|value| value.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("glb") => {
                if let Some(file) = self.read_file(path) {
                    self.dispatch(Action::AddFiles(vec![file]));
                }
            }
            Some("hdr") => {
                if let Some(file) = self.read_file(path) {
                    self.dispatch(Action::UseCustomEnvironment(file));
                }
            }
            _ => {
                log::info!("Ignoring dropped file {}", path.display());
                self.ui
                    .set_status(format!("Unsupported file: {}", path.display()));
            }
        }
    }

    fn read_file(&mut self, path: &Path) -> Option<IncomingFile> {
        match IncomingFile::read(path) {
            Ok(file) => Some(file),
            Err(err) => {
                log::warn!("{}", err);
                self.ui.set_status(err.to_string());
                None
            }
        }
    }

    fn redraw(&mut self) {
        let Some(window) = self.window.clone() else {
            return;
        };
        self.timing.update(Some(&window), Instant::now());
        let frame_dt = self.timing.frame_dt;

        let mut moving = self.orbit.follow(self.state.camera());
        if let Some((yaw, pitch)) = self.input.orbit_nudge(frame_dt) {
            self.orbit.nudge(yaw, pitch);
        }

        if let Some(render) = &mut self.render {
            if let Some(attached) = self.session.apply(render) {
                self.state.dispatch(Action::SetStatus {
                    entry: attached.entry,
                    status: attached.status(),
                });
                self.capture.arm();
            }
        }
        self.timing.set_subject(
            self.session
                .displayed()
                .and_then(|entry| self.state.registry().get(entry))
                .map(|model| model.name.clone()),
        );

        let canvas = CanvasView {
            texture: self.render.as_ref().and_then(RenderContext::canvas_texture_id),
            loading: self.session.is_loading(),
            capture_pending: self.capture.is_pending(),
        };
        let Some(egui) = self.egui.as_mut() else {
            return;
        };
        let mut shell = None;
        let frame = egui.run_ui(&window, |ctx| {
            shell = Some(self.ui.show(ctx, &self.state, canvas));
        });
        let shell = shell.unwrap_or_default();

        if let Some(size) = shell.canvas_size_px {
            let [dx, dy] = shell.orbit_drag;
            if dx != 0.0 || dy != 0.0 {
                self.orbit.rotate(dx, dy, size[1] as f32);
            }
        }
        self.orbit.zoom(shell.zoom_steps);
        moving |= self.orbit.update(frame_dt);

        for command in shell.commands {
            self.handle_ui_command(command);
        }

        let Some(render) = &mut self.render else {
            return;
        };
        if let Some(size) = shell.canvas_size_px {
            render.ensure_canvas(size);
        }
        render.render_frame(&self.orbit, &frame);

        let displayed = self
            .session
            .displayed()
            .filter(|entry| render.attached_entry() == Some(*entry));
        if let Some(entry) = self.capture.poll(displayed, moving) {
            match render.capture_canvas() {
                Ok(screenshot) => {
                    log::debug!("Captured {}x{} for {:?}", screenshot.width, screenshot.height, entry);
                    self.dispatch(Action::ScreenshotCaptured { entry, screenshot });
                }
                Err(err) => log::warn!("Screenshot capture failed: {}", err),
            }
        }
    }
}

impl ApplicationHandler<ViewerEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let [width, height] = self.config.window_size;
        let window_attrs = WindowAttributes::default()
            .with_title(self.config.window_title.clone())
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {}", err);
                event_loop.exit();
                return;
            }
        };

        match RenderContext::new(
            window.clone(),
            self.config.clear_color,
            self.config.environment_intensity,
        ) {
            Ok(mut render) => {
                render.set_environment(self.state.environment().probe());
                self.egui = Some(EguiHost::new(&window, render.max_texture_side()));
                self.render = Some(render);
            }
            Err(err) => {
                log::error!("Failed to initialize rendering: {}", err);
                event_loop.exit();
                return;
            }
        }

        self.update_target_frame_duration(&window);
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let consumed = match (&mut self.egui, &self.window) {
            (Some(egui), Some(window)) => egui.on_window_event(window, &event),
            _ => false,
        };

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Focused(false) => {
                self.input.release_all();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    event_loop.exit();
                    return;
                }
                let wants_keyboard = self
                    .egui
                    .as_ref()
                    .is_some_and(EguiHost::wants_keyboard_input);
                let pressed = event.state == winit::event::ElementState::Pressed;
                // Releases always go through so held arrows cannot stick.
                if pressed && (consumed || wants_keyboard) {
                    return;
                }
                if pressed && event.physical_key == PhysicalKey::Code(KeyCode::Delete) {
                    self.dispatch(Action::RemoveSelected);
                }
                self.input.handle_key(event.physical_key, pressed);
            }
            WindowEvent::Resized(new_size) => {
                if let Some(render) = &mut self.render {
                    render.resize(new_size);
                }
                if let Some(window) = self.window.clone() {
                    self.update_target_frame_duration(&window);
                }
            }
            WindowEvent::Moved(_) => {
                if let Some(window) = self.window.clone() {
                    self.update_target_frame_duration(&window);
                }
            }
            WindowEvent::DroppedFile(path) => {
                self.handle_dropped_file(&path);
            }
            WindowEvent::RedrawRequested => {
                self.redraw();
            }
            _ => {}
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: ViewerEvent) {
        self.handle_viewer_event(event);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        if now >= self.next_frame_time {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
            self.next_frame_time = now + self.target_frame_duration;
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_frame_time));
    }
}

pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = ViewerConfig::load();
    log::info!("{} starting", config.window_title);
    log::info!("   Drop .glb or .hdr files on the window; press ESC to exit");

    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(config, event_loop.create_proxy());
    if let Err(err) = event_loop.run_app(&mut app) {
        log::error!("Event loop error: {}", err);
    }

    if let Ok(snapshot) = app.state.snapshot_json() {
        log::debug!("Final viewer state:\n{}", snapshot);
    }
    log::info!("Goodbye");
}

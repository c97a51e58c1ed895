use std::time::{Duration, Instant};
use winit::window::Window;

/// Longest frame delta fed to camera damping, so a stalled frame does not fling the orbit.
const MAX_FRAME_DT: f32 = 0.1;

pub struct FrameTiming {
    last_frame_time: Option<Instant>,
    last_fps_time: Instant,
    frame_count: u32,
    pub frame_dt: f32,
    base_title: String,
    subject: Option<String>,
}

impl FrameTiming {
    pub fn new(base_title: String) -> Self {
        Self {
            last_frame_time: None,
            last_fps_time: Instant::now(),
            frame_count: 0,
            frame_dt: 1.0 / 60.0,
            base_title,
            subject: None,
        }
    }

    /// Name shown after the fps counter, usually the displayed model.
    pub fn set_subject(&mut self, subject: Option<String>) {
        self.subject = subject;
    }

    pub fn update(&mut self, window: Option<&Window>, now: Instant) {
        let dt_duration = match self.last_frame_time {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::from_millis(16),
        };
        self.last_frame_time = Some(now);
        self.frame_dt = dt_duration.as_secs_f32().clamp(0.0, MAX_FRAME_DT);

        self.frame_count = self.frame_count.saturating_add(1);
        let elapsed = now.saturating_duration_since(self.last_fps_time);
        if elapsed.as_secs_f32() >= 0.5 {
            let fps = self.frame_count as f32 / elapsed.as_secs_f32();
            if let Some(window) = window {
                window.set_title(&self.title(fps));
            }
            self.frame_count = 0;
            self.last_fps_time = now;
        }
    }

    fn title(&self, fps: f32) -> String {
        match &self.subject {
            Some(subject) => format!("{} - {} - {:.1} fps", self.base_title, subject, fps),
            None => format!("{} - {:.1} fps", self.base_title, fps),
        }
    }
}

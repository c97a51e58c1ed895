use winit::keyboard::{KeyCode, PhysicalKey};

/// Radians per second applied while an arrow key is held.
const NUDGE_SPEED: f32 = 1.8;

#[derive(Default, Debug, Clone, Copy)]
pub struct InputState {
    pub aim_left: bool,
    pub aim_right: bool,
    pub aim_up: bool,
    pub aim_down: bool,
}

impl InputState {
    pub fn handle_key(&mut self, key: PhysicalKey, pressed: bool) {
        match key {
            PhysicalKey::Code(KeyCode::ArrowLeft) => self.aim_left = pressed,
            PhysicalKey::Code(KeyCode::ArrowRight) => self.aim_right = pressed,
            PhysicalKey::Code(KeyCode::ArrowUp) => self.aim_up = pressed,
            PhysicalKey::Code(KeyCode::ArrowDown) => self.aim_down = pressed,
            _ => {}
        }
    }

    pub fn release_all(&mut self) {
        *self = Self::default();
    }

    /// Orbit deltas (yaw, pitch) for a frame of `frame_dt` seconds.
    pub fn orbit_nudge(&self, frame_dt: f32) -> Option<(f32, f32)> {
        let step = NUDGE_SPEED * frame_dt;
        let yaw = step * (self.aim_left as i32 - self.aim_right as i32) as f32;
        let pitch = step * (self.aim_up as i32 - self.aim_down as i32) as f32;
        (yaw != 0.0 || pitch != 0.0).then_some((yaw, pitch))
    }
}

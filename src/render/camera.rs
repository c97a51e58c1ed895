use crate::config::OrbitSettings;
use glam::{Mat4, Vec3};
use serde::Serialize;

const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;
const SETTLE_EPSILON: f32 = 1e-4;
const WHEEL_ZOOM_BASE: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraPreset {
    FrontRight,
    BackRight,
    BackLeft,
    FrontLeft,
}

impl CameraPreset {
    pub const ALL: [CameraPreset; 4] = [
        CameraPreset::FrontRight,
        CameraPreset::BackRight,
        CameraPreset::BackLeft,
        CameraPreset::FrontLeft,
    ];

    pub fn position(self) -> [f32; 3] {
        match self {
            CameraPreset::FrontRight => [3.0, 3.0, 5.0],
            CameraPreset::BackRight => [3.0, 3.0, -5.0],
            CameraPreset::BackLeft => [-3.0, 3.0, -5.0],
            CameraPreset::FrontLeft => [-3.0, 3.0, 5.0],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CameraPreset::FrontRight => "Front right",
            CameraPreset::BackRight => "Back right",
            CameraPreset::BackLeft => "Back left",
            CameraPreset::FrontLeft => "Front left",
        }
    }
}

/// Desired camera position chosen by the user; `None` leaves the orbit camera alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CameraDirector {
    position: Option<[f32; 3]>,
    #[serde(skip)]
    revision: u64,
}

impl CameraDirector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Option<[f32; 3]> {
        self.position
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Store `position` and schedule it for the next frame. Re-applying the same value
    /// snaps the camera back without changing the stored position.
    pub fn apply_preset(&mut self, position: [f32; 3]) {
        self.position = Some(position);
        self.revision += 1;
    }
}

/// Damped orbit camera around a target point.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    target: Vec3,
    yaw: f32,
    pitch: f32,
    distance: f32,
    yaw_velocity: f32,
    pitch_velocity: f32,
    jumped: bool,
    applied_revision: u64,
    settings: OrbitSettings,
}

impl OrbitControls {
    pub fn new(settings: OrbitSettings) -> Self {
        let mut controls = Self {
            target: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            distance: 1.0,
            yaw_velocity: 0.0,
            pitch_velocity: 0.0,
            jumped: false,
            applied_revision: 0,
            settings,
        };
        controls.set_eye(settings.initial_eye);
        controls
    }

    pub fn target(&self) -> [f32; 3] {
        self.target.to_array()
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn eye(&self) -> [f32; 3] {
        (self.target + self.offset()).to_array()
    }

    /// Move the eye to `eye` keeping the current target, cancelling any inertia.
    pub fn set_eye(&mut self, eye: [f32; 3]) {
        let offset = Vec3::from(eye) - self.target;
        let length = offset.length();
        if !length.is_finite() || length < 1e-6 {
            log::warn!("Ignoring camera position {:?} on the orbit target", eye);
            return;
        }
        self.distance = length.clamp(self.settings.min_distance, self.settings.max_distance);
        self.yaw = offset.x.atan2(offset.z);
        self.pitch = (offset.y / length).asin().clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.yaw_velocity = 0.0;
        self.pitch_velocity = 0.0;
        self.jumped = true;
    }

    /// Pick up a newly applied preset from `director`. Returns true when the eye moved.
    pub fn follow(&mut self, director: &CameraDirector) -> bool {
        if director.revision() == self.applied_revision {
            return false;
        }
        self.applied_revision = director.revision();
        match director.position() {
            Some(position) => {
                self.set_eye(position);
                true
            }
            None => false,
        }
    }

    /// Pointer drag in pixels over a viewport `height` pixels tall.
    pub fn rotate(&mut self, dx: f32, dy: f32, height: f32) {
        let height = height.max(1.0);
        let speed = std::f32::consts::TAU * self.settings.rotate_speed / height;
        self.yaw_velocity -= dx * speed;
        self.pitch_velocity += dy * speed;
    }

    /// Wheel steps; positive values move closer.
    pub fn zoom(&mut self, steps: f32) {
        if steps == 0.0 || !steps.is_finite() {
            return;
        }
        let scale = WHEEL_ZOOM_BASE.powf(steps * self.settings.zoom_speed);
        self.distance =
            (self.distance * scale).clamp(self.settings.min_distance, self.settings.max_distance);
        self.jumped = true;
    }

    pub fn nudge(&mut self, yaw_delta: f32, pitch_delta: f32) {
        self.yaw_velocity += yaw_delta;
        self.pitch_velocity += pitch_delta;
    }

    /// Advance damping by one frame of `frame_dt` seconds. Returns true while moving.
    pub fn update(&mut self, frame_dt: f32) -> bool {
        let damping = self.settings.damping;
        let step = if damping <= 0.0 || damping >= 1.0 {
            1.0
        } else {
            // Scaled so that a 60 Hz frame applies exactly `damping`.
            let frames = (frame_dt * 60.0).clamp(0.0, 8.0);
            1.0 - (1.0 - damping).powf(frames)
        };

        self.yaw += self.yaw_velocity * step;
        self.pitch = (self.pitch + self.pitch_velocity * step).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.yaw = wrap_angle(self.yaw);
        self.yaw_velocity *= 1.0 - step;
        self.pitch_velocity *= 1.0 - step;
        if self.yaw_velocity.abs() < SETTLE_EPSILON {
            self.yaw_velocity = 0.0;
        }
        if self.pitch_velocity.abs() < SETTLE_EPSILON {
            self.pitch_velocity = 0.0;
        }

        let moving = self.jumped || !self.is_settled();
        self.jumped = false;
        moving
    }

    pub fn is_settled(&self) -> bool {
        self.yaw_velocity == 0.0 && self.pitch_velocity == 0.0
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        let eye = self.target + self.offset();
        let near = (self.distance * 0.01).max(0.01);
        let far = self.distance * 100.0 + 100.0;
        let projection = Mat4::perspective_rh(
            self.settings.fov_y_deg.to_radians(),
            aspect.max(1e-3),
            near,
            far,
        );
        projection * Mat4::look_at_rh(eye, self.target, Vec3::Y)
    }

    fn offset(&self) -> Vec3 {
        let cos_pitch = self.pitch.cos();
        Vec3::new(
            self.yaw.sin() * cos_pitch,
            self.pitch.sin(),
            self.yaw.cos() * cos_pitch,
        ) * self.distance
    }
}

fn wrap_angle(angle: f32) -> f32 {
    const PI: f32 = std::f32::consts::PI;
    if angle.is_finite() {
        (angle + PI).rem_euclid(PI * 2.0) - PI
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::{CameraDirector, CameraPreset, OrbitControls};
    use crate::config::OrbitSettings;

    fn assert_eye(actual: [f32; 3], expected: [f32; 3]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-4, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn presets_match_the_four_corners() {
        let positions: Vec<[f32; 3]> = CameraPreset::ALL.iter().map(|p| p.position()).collect();
        assert_eq!(
            positions,
            [[3.0, 3.0, 5.0], [3.0, 3.0, -5.0], [-3.0, 3.0, -5.0], [-3.0, 3.0, 5.0]]
        );
    }

    #[test]
    fn applying_same_preset_twice_keeps_position() {
        let mut director = CameraDirector::new();
        assert_eq!(director.position(), None);
        director.apply_preset([3.0, 3.0, 5.0]);
        let once = director.position();
        director.apply_preset([3.0, 3.0, 5.0]);
        assert_eq!(director.position(), once);
        assert_eq!(director.position(), Some([3.0, 3.0, 5.0]));
    }

    #[test]
    fn last_preset_wins() {
        let mut director = CameraDirector::new();
        let mut orbit = OrbitControls::new(OrbitSettings::default());
        director.apply_preset([3.0, 3.0, 5.0]);
        director.apply_preset([-3.0, 3.0, -5.0]);
        assert!(orbit.follow(&director));
        assert_eye(orbit.eye(), [-3.0, 3.0, -5.0]);
        assert!(!orbit.follow(&director));
    }

    #[test]
    fn preset_moves_eye_but_keeps_target() {
        let mut director = CameraDirector::new();
        let mut orbit = OrbitControls::new(OrbitSettings::default());
        assert_eye(orbit.eye(), [0.0, 0.0, 5.0]);
        director.apply_preset([3.0, 3.0, 5.0]);
        orbit.follow(&director);
        assert_eye(orbit.eye(), [3.0, 3.0, 5.0]);
        assert_eq!(orbit.target(), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn drag_inertia_decays_until_settled() {
        let mut orbit = OrbitControls::new(OrbitSettings::default());
        orbit.update(1.0 / 60.0);
        orbit.rotate(120.0, -40.0, 600.0);
        let start = orbit.eye();
        assert!(orbit.update(1.0 / 60.0));
        assert_ne!(orbit.eye(), start);

        let mut frames = 0;
        while orbit.update(1.0 / 60.0) {
            frames += 1;
            assert!(frames < 10_000, "orbit never settled");
        }
        assert!(orbit.is_settled());
        assert!(orbit.eye().iter().all(|value| value.is_finite()));
    }

    #[test]
    fn pitch_stays_clear_of_the_poles() {
        let mut orbit = OrbitControls::new(OrbitSettings::default());
        orbit.nudge(0.0, 50.0);
        for _ in 0..600 {
            orbit.update(1.0 / 60.0);
        }
        let eye = orbit.eye();
        assert!(eye[1] < 5.0);
        assert!(eye[0].abs() + eye[2].abs() > 1e-3);
    }

    #[test]
    fn zoom_respects_distance_limits() {
        let settings = OrbitSettings {
            min_distance: 1.0,
            max_distance: 10.0,
            ..OrbitSettings::default()
        };
        let mut orbit = OrbitControls::new(settings);
        orbit.zoom(1000.0);
        assert!((orbit.distance() - 1.0).abs() < 1e-6);
        orbit.zoom(-1000.0);
        assert!((orbit.distance() - 10.0).abs() < 1e-6);
        assert!(orbit.update(1.0 / 60.0));
        assert!(!orbit.update(1.0 / 60.0));
    }

    #[test]
    fn view_projection_is_finite() {
        let orbit = OrbitControls::new(OrbitSettings::default());
        let matrix = orbit.view_proj(16.0 / 9.0);
        assert!(matrix.to_cols_array().iter().all(|value| value.is_finite()));
    }
}

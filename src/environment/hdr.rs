//! Radiance HDR decoding and projection onto a spherical-harmonic irradiance probe.

use super::{EnvironmentError, LightingProbe};
use glam::Vec3;

/// Upper bound on sampled texels per axis; larger maps are sampled on a strided grid.
const MAX_SAMPLES_X: u32 = 256;
const MAX_SAMPLES_Y: u32 = 128;

pub fn convert_hdr(bytes: &[u8]) -> Result<LightingProbe, EnvironmentError> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Hdr)
        .map_err(EnvironmentError::Decode)?
        .into_rgb32f();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(EnvironmentError::EmptyImage);
    }
    log::debug!("Projecting {}x{} HDR map onto SH9", width, height);

    let samples_x = width.min(MAX_SAMPLES_X);
    let samples_y = height.min(MAX_SAMPLES_Y);
    let probe = project_grid(samples_x, samples_y, |u, v, _| {
        let x = ((u * width as f32) as u32).min(width - 1);
        let y = ((v * height as f32) as u32).min(height - 1);
        let texel = image.get_pixel(x, y).0;
        let radiance = Vec3::from(texel);
        if radiance.is_finite() {
            radiance.max(Vec3::ZERO)
        } else {
            Vec3::ZERO
        }
    });
    Ok(probe)
}

/// Project an analytic radiance function of direction onto the probe.
pub fn project_fn(samples_x: u32, samples_y: u32, radiance: impl Fn(Vec3) -> Vec3) -> LightingProbe {
    project_grid(samples_x, samples_y, |_, _, dir| radiance(dir))
}

/// Equirectangular direction for normalized texel-center coordinates, +Y up.
pub(crate) fn direction(u: f32, v: f32) -> Vec3 {
    let phi = u * std::f32::consts::TAU;
    let theta = v * std::f32::consts::PI;
    Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin())
}

fn project_grid(samples_x: u32, samples_y: u32, radiance: impl Fn(f32, f32, Vec3) -> Vec3) -> LightingProbe {
    let mut sums = [Vec3::ZERO; 9];
    let d_phi = std::f32::consts::TAU / samples_x as f32;
    let d_theta = std::f32::consts::PI / samples_y as f32;
    for j in 0..samples_y {
        let v = (j as f32 + 0.5) / samples_y as f32;
        let weight = d_phi * d_theta * (v * std::f32::consts::PI).sin();
        for i in 0..samples_x {
            let u = (i as f32 + 0.5) / samples_x as f32;
            let dir = direction(u, v);
            let color = radiance(u, v, dir) * weight;
            for (sum, basis) in sums.iter_mut().zip(sh_basis(dir)) {
                *sum += color * basis;
            }
        }
    }
    LightingProbe::from_radiance_sh(sums.map(|c| c.to_array()))
}

/// Real SH basis up to band 2.
pub(crate) fn sh_basis(n: Vec3) -> [f32; 9] {
    [
        0.282_095,
        0.488_603 * n.y,
        0.488_603 * n.z,
        0.488_603 * n.x,
        1.092_548 * n.x * n.y,
        1.092_548 * n.y * n.z,
        0.315_392 * (3.0 * n.z * n.z - 1.0),
        1.092_548 * n.x * n.z,
        0.546_274 * (n.x * n.x - n.y * n.y),
    ]
}

#[cfg(test)]
mod tests {
    use super::{convert_hdr, project_fn};
    use crate::environment::EnvironmentError;
    use glam::Vec3;

    fn encode_hdr(width: usize, height: usize, pixel: impl Fn(usize, usize) -> [f32; 3]) -> Vec<u8> {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(image::Rgb(pixel(x, y)));
            }
        }
        let mut bytes = Vec::new();
        image::codecs::hdr::HdrEncoder::new(&mut bytes)
            .encode(&pixels, width, height)
            .unwrap();
        bytes
    }

    fn assert_close(actual: Vec3, expected: Vec3, tolerance: f32) {
        assert!(
            (actual - expected).abs().max_element() <= tolerance,
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn constant_radiance_evaluates_to_itself() {
        let probe = project_fn(64, 32, |_| Vec3::new(0.5, 1.0, 2.0));
        for normal in [Vec3::X, Vec3::Y, Vec3::NEG_Y, Vec3::new(1.0, 1.0, -1.0).normalize()] {
            assert_close(probe.evaluate(normal), Vec3::new(0.5, 1.0, 2.0), 0.02);
        }
    }

    #[test]
    fn upper_hemisphere_light_favors_upward_normals() {
        let probe = project_fn(64, 32, |dir| if dir.y > 0.0 { Vec3::ONE } else { Vec3::ZERO });
        let up = probe.evaluate(Vec3::Y);
        let down = probe.evaluate(Vec3::NEG_Y);
        assert!(up.x > 0.8, "{up:?}");
        assert!(down.x < 0.2, "{down:?}");
    }

    #[test]
    fn converts_encoded_hdr_map() {
        let bytes = encode_hdr(32, 16, |_, _| [0.25, 0.25, 0.25]);
        let probe = convert_hdr(&bytes).unwrap();
        assert_close(probe.evaluate(Vec3::Z), Vec3::splat(0.25), 0.01);
    }

    #[test]
    fn bright_top_rows_light_from_above() {
        let bytes = encode_hdr(32, 16, |_, y| if y < 8 { [4.0, 4.0, 4.0] } else { [0.0, 0.0, 0.0] });
        let probe = convert_hdr(&bytes).unwrap();
        assert!(probe.evaluate(Vec3::Y).x > probe.evaluate(Vec3::NEG_Y).x * 4.0);
    }

    #[test]
    fn rejects_non_hdr_bytes() {
        let err = convert_hdr(b"#?NOTREALLY\n\n").unwrap_err();
        assert!(matches!(err, EnvironmentError::Decode(_)));
    }
}

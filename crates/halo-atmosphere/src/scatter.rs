//! Single-scattering evaluation on the CPU.
//!
//! These functions mirror `atmosphere.wgsl` line for line. The software
//! backend shades with them directly and the tests use them to pin down the
//! math the GPU path runs.

use glam::{Vec2, Vec3};

use crate::body::AtmosphereBody;
use crate::coefficients::ScatterCoefficients;
use crate::depth::CameraState;

/// Samples per optical-depth and in-scatter integration.
pub const SAMPLE_COUNT: u32 = 16;

/// Nudge past the shell boundary so the first sample lies inside it.
pub const SHELL_EPSILON: f32 = 1e-4;

/// Line/sphere intersection as `(entry, length)`.
///
/// Returns `(-1, 0)` on a miss or when the sphere is entirely behind
/// `origin`. An origin inside the sphere enters at 0.
pub fn ray_sphere(center: Vec3, radius: f32, origin: Vec3, dir: Vec3) -> (f32, f32) {
    let offset = origin - center;
    let a = dir.dot(dir);
    let b = 2.0 * dir.dot(offset);
    let c = offset.dot(offset) - radius * radius;
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 || a <= 0.0 {
        return (-1.0, 0.0);
    }

    let s = discriminant.sqrt();
    let t0 = (-b - s) / (2.0 * a);
    let t1 = (-b + s) / (2.0 * a);
    if t1 < 0.0 {
        (-1.0, 0.0)
    } else if t0 < 0.0 {
        (0.0, t1)
    } else {
        (t0, t1 - t0)
    }
}

/// Atmospheric density at `point`: 1 at the surface, 0 at the shell edge.
pub fn density(body: &AtmosphereBody, point: Vec3) -> f32 {
    let height = point.distance(body.center) - body.planet_radius;
    let h01 = (height / body.shell_thickness()).clamp(0.0, 1.0);
    ((-h01 * body.density_falloff).exp() * (1.0 - h01)).max(0.0)
}

/// Density integrated along `length` units of the ray with [`SAMPLE_COUNT`] samples.
pub fn optical_depth(body: &AtmosphereBody, origin: Vec3, dir: Vec3, length: f32) -> f32 {
    optical_depth_with_samples(body, origin, dir, length, SAMPLE_COUNT)
}

/// Rectangle-rule integration of [`density`] with `samples` points spaced
/// `length / (samples - 1)` apart, starting at `origin`.
pub fn optical_depth_with_samples(
    body: &AtmosphereBody,
    origin: Vec3,
    dir: Vec3,
    length: f32,
    samples: u32,
) -> f32 {
    let samples = samples.max(2);
    let step = length / (samples - 1) as f32;
    let mut point = origin;
    let mut total = 0.0;
    for _ in 0..samples {
        total += density(body, point) * step;
        point += dir * step;
    }
    total
}

/// Beer-Lambert transmittance per channel.
pub fn transmittance(optical_depth: f32, coefficients: ScatterCoefficients) -> Vec3 {
    (-optical_depth * coefficients.as_vec3()).exp()
}

/// Light scattered toward the viewer along `length` units of the view ray,
/// added to `base_color` attenuated by the ray's own optical depth.
pub fn in_scatter(
    body: &AtmosphereBody,
    coefficients: ScatterCoefficients,
    origin: Vec3,
    dir: Vec3,
    length: f32,
    base_color: Vec3,
) -> Vec3 {
    let step = length / (SAMPLE_COUNT - 1) as f32;
    let mut point = origin;
    let mut scattered = Vec3::ZERO;
    let mut view_depth = 0.0;

    for i in 0..SAMPLE_COUNT {
        let (_, sun_length) = ray_sphere(
            body.center,
            body.atmosphere_radius,
            point,
            body.light_direction,
        );
        let sun_depth = optical_depth(body, point, body.light_direction, sun_length);
        view_depth = optical_depth(body, point, -dir, step * i as f32);
        let through = transmittance(sun_depth + view_depth, coefficients);
        scattered += density(body, point) * through * coefficients.as_vec3() * step;
        point += dir * step;
    }

    base_color * (-view_depth).exp() + scattered
}

/// Shade one pixel of a body's scattering pass.
///
/// The view ray is clipped by the scene surface: geometry in front of the
/// shell leaves the pixel untouched, geometry inside it shortens the march.
pub fn shade_pixel(
    uv: Vec2,
    depth: f32,
    base_color: Vec3,
    camera: &CameraState,
    body: &AtmosphereBody,
    coefficients: ScatterCoefficients,
) -> Vec3 {
    let dir = camera.view_ray(uv);
    let scene_distance = camera.scene_distance(uv, depth);
    let (entry, length) = ray_sphere(body.center, body.atmosphere_radius, camera.position, dir);
    let traversal = length.min(scene_distance - entry);
    if traversal <= 0.0 {
        return base_color;
    }

    let start = camera.position + dir * (entry + SHELL_EPSILON);
    let march = (traversal - SHELL_EPSILON * 2.0).max(0.0);
    in_scatter(body, coefficients, start, dir, march, base_color)
}

/// Pixel-center UV for pixel `(x, y)` of a `width` x `height` image.
pub fn pixel_uv(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    )
}

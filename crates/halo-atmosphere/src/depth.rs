//! Depth capture and reconstruction of scene geometry from device depth.

use glam::{Mat4, Vec2, Vec3, Vec4};
use halo_render::{ActiveTarget, Camera, RenderTargetId};

use crate::compositor::{FrameBackend, FrameError};

/// Device depth at or above this value is background (no geometry).
pub const BACKGROUND_DEPTH: f32 = 0.9999;

/// Camera values the scattering pass needs, rebuilt every frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraState {
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
    pub inverse_projection: Mat4,
    /// Camera-to-world transform.
    pub world: Mat4,
}

impl CameraState {
    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            position: camera.position,
            near: camera.near,
            far: camera.far,
            inverse_projection: camera.inverse_projection_matrix(),
            world: camera.world_matrix(),
        }
    }

    /// World-space point seen at `uv` (origin top-left) with device depth `depth`.
    pub fn reconstruct_world(&self, uv: Vec2, depth: f32) -> Vec3 {
        let ndc = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
        let view = self.inverse_projection * ndc;
        let view = view / view.w;
        self.world.transform_point3(view.truncate())
    }

    /// Normalized world-space direction of the view ray through `uv`.
    pub fn view_ray(&self, uv: Vec2) -> Vec3 {
        (self.reconstruct_world(uv, 1.0) - self.position)
            .try_normalize()
            .unwrap_or(Vec3::NEG_Z)
    }

    /// Distance from the camera to the first opaque surface along the ray
    /// through `uv`. Background pixels are bounded by the far plane.
    pub fn scene_distance(&self, uv: Vec2, depth: f32) -> f32 {
        let depth = if is_background(depth) { 1.0 } else { depth };
        self.reconstruct_world(uv, depth).distance(self.position)
    }
}

pub fn is_background(depth: f32) -> bool {
    depth >= BACKGROUND_DEPTH
}

/// Eye-space distance along the view axis for device depth `d` in `[0, 1]`,
/// inverting the depth mapping of [`Camera`]'s projection.
///
/// Reference helper for linear depth readouts such as debug views. The
/// scattering passes need the full ray length, so they go through
/// [`CameraState::scene_distance`] instead.
pub fn linearize_depth(d: f32, near: f32, far: f32) -> f32 {
    let z_ndc = 2.0 * d - 1.0;
    (2.0 * near * far) / (far + near - z_ndc * (far - near))
}

/// Proof that the shared depth target holds this frame's scene depth.
///
/// Only [`capture`] creates one; scattering passes take it by reference, so a
/// pass cannot be recorded before depth exists for the frame.
#[derive(Debug)]
pub struct DepthToken {
    frame: u64,
}

impl DepthToken {
    pub fn frame(&self) -> u64 {
        self.frame
    }
}

/// Render `scene` once into the backend's depth target.
///
/// The depth target is bound for the duration of the render and the previous
/// binding is restored on every exit path.
pub fn capture<B: FrameBackend>(
    backend: &mut B,
    scene: &B::Scene,
    camera: &CameraState,
    active: &mut ActiveTarget,
    frame: u64,
) -> Result<DepthToken, FrameError> {
    let _binding = active.bind(RenderTargetId::Depth);
    backend.render_depth(scene, camera)?;
    tracing::trace!("Depth captured for frame {frame}");
    Ok(DepthToken { frame })
}

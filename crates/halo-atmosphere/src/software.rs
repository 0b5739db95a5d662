//! CPU implementation of the frame backend.
//!
//! Shades every pixel with the functions in [`crate::scatter`], splitting the
//! image into row bands across worker threads.

use std::collections::HashSet;

use glam::Vec3;
use halo_render::{TargetError, Viewport};

use crate::body::BodyId;
use crate::compositor::{
    BodyPass, ChainLink, ChainTarget, FrameBackend, FrameError, MaterialState,
};
use crate::depth::{CameraState, DepthToken};
use crate::scatter::{pixel_uv, shade_pixel};

/// Largest image edge the software backend will allocate.
pub const MAX_SOFTWARE_DIMENSION: u32 = 8192;

/// A pre-rasterized scene: linear HDR color and device depth per pixel,
/// row-major with the top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct SoftwareScene {
    pub width: u32,
    pub height: u32,
    pub color: Vec<Vec3>,
    pub depth: Vec<f32>,
}

impl SoftwareScene {
    /// Scene of background only.
    pub fn new(width: u32, height: u32, clear_color: Vec3) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![clear_color; pixels],
            depth: vec![1.0; pixels],
        }
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }

    /// Write a fragment if it is nearer than what is stored.
    pub fn plot(&mut self, x: u32, y: u32, color: Vec3, depth: f32) {
        let index = y as usize * self.width as usize + x as usize;
        if depth <= self.depth[index] {
            self.depth[index] = depth;
            self.color[index] = color;
        }
    }
}

/// Quantize linear color to RGBA8, clamping to `[0, 1]`.
pub fn encode_rgba8(color: &[Vec3]) -> Vec<u8> {
    let quantize = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    color
        .iter()
        .flat_map(|c| [quantize(c.x), quantize(c.y), quantize(c.z), 255])
        .collect()
}

pub struct SoftwareBackend {
    viewport: Option<Viewport>,
    depth: Vec<f32>,
    chain: [Vec<Vec3>; 2],
    presented: Vec<Vec3>,
    materials: HashSet<BodyId>,
    threads: usize,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            viewport: None,
            depth: Vec::new(),
            chain: [Vec::new(), Vec::new()],
            presented: Vec::new(),
            materials: HashSet::new(),
            threads: num_cpus::get().max(1),
        }
    }

    /// Use exactly `threads` shading workers.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// The last presented image, if targets are allocated.
    pub fn presented(&self) -> Option<&[Vec3]> {
        self.viewport.map(|_| self.presented.as_slice())
    }

    pub fn presented_rgba8(&self) -> Option<Vec<u8>> {
        self.presented().map(encode_rgba8)
    }

    /// Bodies with live materials.
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    fn check_scene(&self, scene: &SoftwareScene) -> Result<Viewport, FrameError> {
        let viewport = self.viewport.ok_or(FrameError::TargetsMissing)?;
        if scene.viewport() != viewport
            || scene.color.len() != viewport.pixel_count()
            || scene.depth.len() != viewport.pixel_count()
        {
            return Err(FrameError::Scene(format!(
                "scene is {}x{} with {} texels, targets are {}x{}",
                scene.width,
                scene.height,
                scene.color.len(),
                viewport.width,
                viewport.height
            )));
        }
        Ok(viewport)
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBackend for SoftwareBackend {
    type Scene = SoftwareScene;

    fn ensure_targets(&mut self, viewport: Viewport) -> Result<(), FrameError> {
        if self.viewport == Some(viewport) {
            return Ok(());
        }
        if viewport.width == 0 || viewport.height == 0 {
            return Err(TargetError::ZeroDimensions {
                width: viewport.width,
                height: viewport.height,
            }
            .into());
        }
        if viewport.width > MAX_SOFTWARE_DIMENSION || viewport.height > MAX_SOFTWARE_DIMENSION {
            return Err(TargetError::TooLarge {
                width: viewport.width,
                height: viewport.height,
                max: MAX_SOFTWARE_DIMENSION,
            }
            .into());
        }

        let pixels = viewport.pixel_count();
        self.depth = vec![1.0; pixels];
        self.chain = [vec![Vec3::ZERO; pixels], vec![Vec3::ZERO; pixels]];
        self.presented = vec![Vec3::ZERO; pixels];
        self.viewport = Some(viewport);
        Ok(())
    }

    fn render_depth(&mut self, scene: &SoftwareScene, _camera: &CameraState) -> Result<(), FrameError> {
        self.check_scene(scene)?;
        self.depth.copy_from_slice(&scene.depth);
        Ok(())
    }

    fn render_scene(
        &mut self,
        scene: &SoftwareScene,
        _camera: &CameraState,
        target: ChainTarget,
    ) -> Result<(), FrameError> {
        self.check_scene(scene)?;
        self.chain[target.index()].copy_from_slice(&scene.color);
        Ok(())
    }

    fn prepare_material(&mut self, id: BodyId) -> MaterialState {
        self.materials.insert(id);
        MaterialState::Ready
    }

    fn release_material(&mut self, id: BodyId) {
        self.materials.remove(&id);
    }

    fn scatter_pass(
        &mut self,
        depth: &DepthToken,
        link: ChainLink,
        pass: &BodyPass<'_>,
    ) -> Result<(), FrameError> {
        let viewport = self.viewport.ok_or(FrameError::TargetsMissing)?;
        if !self.materials.contains(&pass.id) {
            return Err(FrameError::MaterialMissing(pass.id));
        }

        let [ping, pong] = &mut self.chain;
        let (source, destination) = match link.source {
            ChainTarget::Ping => (&*ping, pong),
            ChainTarget::Pong => (&*pong, ping),
        };
        let depth_texels = &self.depth;
        let width = viewport.width as usize;
        let rows_per_band = (viewport.height as usize).div_ceil(self.threads).max(1);

        std::thread::scope(|scope| {
            for (band, out) in destination.chunks_mut(rows_per_band * width).enumerate() {
                let first_row = band * rows_per_band;
                scope.spawn(move || {
                    for (offset, texel) in out.iter_mut().enumerate() {
                        let index = first_row * width + offset;
                        let (x, y) = ((index % width) as u32, (index / width) as u32);
                        *texel = shade_pixel(
                            pixel_uv(x, y, viewport.width, viewport.height),
                            depth_texels[index],
                            source[index],
                            pass.camera,
                            pass.body,
                            pass.coefficients,
                        );
                    }
                });
            }
        });

        tracing::trace!(
            "Frame {}: shaded {} on the CPU",
            depth.frame(),
            pass.body.name
        );
        Ok(())
    }

    fn present(&mut self, source: ChainTarget) -> Result<(), FrameError> {
        if self.viewport.is_none() {
            return Err(FrameError::TargetsMissing);
        }
        self.presented.copy_from_slice(&self.chain[source.index()]);
        Ok(())
    }

    fn release_targets(&mut self) {
        self.viewport = None;
        self.depth = Vec::new();
        self.chain = [Vec::new(), Vec::new()];
        self.presented = Vec::new();
    }
}

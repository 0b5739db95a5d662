//! wgpu implementation of the frame backend.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytemuck::{Pod, Zeroable};
use halo_render::{
    BlitPipeline, ColorTarget, DepthTarget, FULLSCREEN_VERTEX_WGSL, FrameEncoder, HDR_FORMAT,
    RenderContext, RenderPassBuilder, ShaderError, ShaderLibrary, TargetError, Viewport,
    create_fullscreen_pipeline, read_rgba8, unfiltered_texture_entry, validated,
};

use crate::body::BodyId;
use crate::compositor::{
    BodyPass, ChainLink, ChainTarget, FrameBackend, FrameError, MaterialState,
};
use crate::depth::{CameraState, DepthToken};

/// WGSL for the scattering pass, without the full-screen vertex stage.
pub const ATMOSPHERE_SHADER_SOURCE: &str = include_str!("atmosphere.wgsl");

const SHADER_NAME: &str = "atmosphere";
const SHADER_FILE: &str = "atmosphere.wgsl";

/// Format of the presented image.
pub const PRESENTATION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Per-body uniform block. Matches `BodyUniform` in `atmosphere.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BodyUniform {
    pub inv_projection: [[f32; 4]; 4],
    pub camera_world: [[f32; 4]; 4],
    pub camera_position: [f32; 3],
    pub near: f32,
    pub planet_center: [f32; 3],
    pub planet_radius: f32,
    pub light_direction: [f32; 3],
    pub atmosphere_radius: f32,
    pub scatter_coefficients: [f32; 3],
    pub density_falloff: f32,
    pub far: f32,
    pub _pad: [f32; 3],
}

impl BodyUniform {
    pub fn new(pass: &BodyPass<'_>) -> Self {
        let camera = pass.camera;
        let body = pass.body;
        Self {
            inv_projection: camera.inverse_projection.to_cols_array_2d(),
            camera_world: camera.world.to_cols_array_2d(),
            camera_position: camera.position.to_array(),
            near: camera.near,
            planet_center: body.center.to_array(),
            planet_radius: body.planet_radius,
            light_direction: body.light_direction.to_array(),
            atmosphere_radius: body.atmosphere_radius,
            scatter_coefficients: pass.coefficients.as_vec3().to_array(),
            density_falloff: body.density_falloff,
            far: camera.far,
            _pad: [0.0; 3],
        }
    }
}

/// A scene the GPU backend can draw.
///
/// Both passes carry the shared [`DepthTarget`]. The depth pass clears it;
/// the color pass (into [`HDR_FORMAT`]) loads it, so color pipelines should
/// test against it without writing.
pub trait GpuScene {
    /// Upload per-frame data before any pass is recorded.
    fn prepare(&self, _queue: &wgpu::Queue, _camera: &CameraState) -> Result<(), FrameError> {
        Ok(())
    }

    fn draw_depth(&self, pass: &mut wgpu::RenderPass<'_>);

    fn draw_color(&self, pass: &mut wgpu::RenderPass<'_>);
}

struct FrameTargets {
    viewport: Viewport,
    depth: DepthTarget,
    chain: [ColorTarget; 2],
    presentation: ColorTarget,
}

impl FrameTargets {
    fn new(
        device: &wgpu::Device,
        viewport: Viewport,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self, TargetError> {
        let none = wgpu::TextureUsages::empty();
        Ok(Self {
            viewport,
            depth: DepthTarget::new(device, viewport.width, viewport.height)?,
            chain: [
                ColorTarget::new(device, "chain-ping", HDR_FORMAT, viewport, none)?,
                ColorTarget::new(device, "chain-pong", HDR_FORMAT, viewport, none)?,
            ],
            presentation: ColorTarget::new(
                device,
                "presentation",
                output_format,
                viewport,
                wgpu::TextureUsages::COPY_SRC,
            )?,
        })
    }

    fn chain(&self, target: ChainTarget) -> &ColorTarget {
        &self.chain[target.index()]
    }

    fn destroy(&self) {
        self.depth.destroy();
        for target in &self.chain {
            target.destroy();
        }
        self.presentation.destroy();
    }
}

struct ScatterPipeline {
    pipeline: wgpu::RenderPipeline,
    source_layout: wgpu::BindGroupLayout,
    body_layout: wgpu::BindGroupLayout,
    generation: u64,
}

impl ScatterPipeline {
    fn new(
        device: &wgpu::Device,
        shader: &wgpu::ShaderModule,
        generation: u64,
    ) -> Result<Self, ShaderError> {
        validated(device, "atmosphere-pipeline", || {
            Self::build(device, shader, generation)
        })
    }

    fn build(device: &wgpu::Device, shader: &wgpu::ShaderModule, generation: u64) -> Self {
        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("atmosphere-source-bgl"),
            entries: &[unfiltered_texture_entry(0), DepthTarget::texture_entry(1)],
        });

        let body_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("atmosphere-body-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<BodyUniform>() as u64),
                },
                count: None,
            }],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("atmosphere-pipeline-layout"),
            bind_group_layouts: &[&source_layout, &body_layout],
            immediate_size: 0,
        });

        let pipeline = create_fullscreen_pipeline(
            device,
            shader,
            &layout,
            "fs_atmosphere",
            HDR_FORMAT,
            "atmosphere-pipeline",
        );

        tracing::debug!("Built atmosphere pipeline (shader generation {generation})");
        Self {
            pipeline,
            source_layout,
            body_layout,
            generation,
        }
    }
}

struct BodyMaterial {
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    generation: u64,
}

impl BodyMaterial {
    fn new(device: &wgpu::Device, pipeline: &ScatterPipeline, id: BodyId) -> Self {
        let label = format!("atmosphere-{id}");
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label.as_str()),
            size: std::mem::size_of::<BodyUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label.as_str()),
            layout: &pipeline.body_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        Self {
            uniform_buffer,
            bind_group,
            generation: pipeline.generation,
        }
    }
}

/// Runs the frame on a wgpu device into offscreen targets.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    device_lost: Arc<AtomicBool>,
    shaders: ShaderLibrary,
    pipeline: Option<ScatterPipeline>,
    /// Shader generation whose pipeline the device rejected.
    rejected_generation: Option<u64>,
    blit: BlitPipeline,
    clear_color: wgpu::Color,
    targets: Option<FrameTargets>,
    materials: HashMap<BodyId, BodyMaterial>,
}

impl GpuBackend {
    /// Backend using the built-in scattering shader.
    pub fn new(context: &RenderContext) -> Self {
        let mut backend = Self::empty(context, ShaderLibrary::new());
        if let Err(err) =
            backend
                .shaders
                .load_from_source(&backend.device, SHADER_NAME, ATMOSPHERE_SHADER_SOURCE)
        {
            tracing::error!("Atmosphere shader unavailable: {err}");
        }
        backend
    }

    /// Backend loading `atmosphere.wgsl` from `dir`, reloadable with
    /// [`GpuBackend::reload_shader`]. If the file cannot be read or does not
    /// compile, every body stays pending until a reload succeeds.
    pub fn with_shader_dir(context: &RenderContext, dir: impl Into<PathBuf>) -> Self {
        let mut backend = Self::empty(context, ShaderLibrary::new().with_shader_dir(dir));
        if let Err(err) = backend
            .shaders
            .load_from_file(&backend.device, SHADER_NAME, SHADER_FILE)
        {
            tracing::error!("Atmosphere shader unavailable: {err}");
        }
        backend
    }

    fn empty(context: &RenderContext, shaders: ShaderLibrary) -> Self {
        Self {
            device: context.device.clone(),
            queue: context.queue.clone(),
            device_lost: context.device_lost_flag(),
            shaders: shaders.with_prelude(FULLSCREEN_VERTEX_WGSL),
            pipeline: None,
            rejected_generation: None,
            blit: BlitPipeline::new(&context.device, PRESENTATION_FORMAT),
            clear_color: wgpu::Color::BLACK,
            targets: None,
            materials: HashMap::new(),
        }
    }

    /// Color the scene pass clears to.
    pub fn with_clear_color(mut self, clear_color: wgpu::Color) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Recompile the scattering shader from disk. Pipelines and materials are
    /// rebuilt on the next frame. Source that fails to compile leaves every
    /// body pending until a later reload compiles cleanly.
    pub fn reload_shader(&mut self) -> Result<(), ShaderError> {
        let before = self.shaders.generation(SHADER_NAME);
        let result = match before {
            Some(_) => self.shaders.reload(&self.device, SHADER_NAME).map(|_| ()),
            None => self
                .shaders
                .load_from_file(&self.device, SHADER_NAME, SHADER_FILE)
                .map(|_| ()),
        };
        if self.shaders.generation(SHADER_NAME) != before {
            self.pipeline = None;
        }
        result
    }

    /// Whether the scattering pipeline is built for the current shader.
    pub fn is_pipeline_ready(&self) -> bool {
        match (&self.pipeline, self.shaders.generation(SHADER_NAME)) {
            (Some(pipeline), Some(generation)) => pipeline.generation == generation,
            _ => false,
        }
    }

    /// Copy the presented image back as RGBA8 rows.
    pub fn read_presentation(&self) -> Result<Vec<u8>, FrameError> {
        let targets = self.targets.as_ref().ok_or(FrameError::TargetsMissing)?;
        Ok(read_rgba8(
            &self.device,
            &self.queue,
            &targets.presentation.texture,
            targets.viewport,
        )?)
    }

    fn check_device(&self) -> Result<(), FrameError> {
        if self.device_lost.load(Ordering::Acquire) {
            Err(FrameError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Build the pipeline if the shader changed. Returns its generation, or
    /// `None` while no valid shader or pipeline exists.
    fn ensure_pipeline(&mut self) -> Option<u64> {
        let generation = self.shaders.generation(SHADER_NAME)?;
        if self.pipeline.as_ref().map(|p| p.generation) == Some(generation) {
            return Some(generation);
        }
        if self.rejected_generation == Some(generation) {
            return None;
        }
        let shader = self.shaders.get(SHADER_NAME)?;
        match ScatterPipeline::new(&self.device, &shader, generation) {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                Some(generation)
            }
            Err(err) => {
                tracing::error!("{err}");
                self.pipeline = None;
                self.rejected_generation = Some(generation);
                None
            }
        }
    }
}

impl FrameBackend for GpuBackend {
    type Scene = dyn GpuScene;

    fn ensure_targets(&mut self, viewport: Viewport) -> Result<(), FrameError> {
        self.check_device()?;
        if self.targets.as_ref().is_some_and(|t| t.viewport == viewport) {
            return Ok(());
        }
        if let Some(old) = self.targets.take() {
            old.destroy();
        }
        tracing::debug!(
            "Allocating frame targets {}x{}",
            viewport.width,
            viewport.height
        );
        self.targets = Some(FrameTargets::new(
            &self.device,
            viewport,
            self.blit.target_format(),
        )?);
        Ok(())
    }

    fn render_depth(&mut self, scene: &dyn GpuScene, camera: &CameraState) -> Result<(), FrameError> {
        self.check_device()?;
        let targets = self.targets.as_ref().ok_or(FrameError::TargetsMissing)?;
        scene.prepare(&self.queue, camera)?;

        let mut frame = FrameEncoder::new(&self.device);
        {
            let mut pass = RenderPassBuilder::new()
                .depth_clear(DepthTarget::CLEAR_VALUE)
                .label("depth-capture")
                .begin(frame.encoder(), None, Some(&targets.depth.view));
            scene.draw_depth(&mut pass);
        }
        frame.submit(&self.queue);
        Ok(())
    }

    fn render_scene(
        &mut self,
        scene: &dyn GpuScene,
        _camera: &CameraState,
        target: ChainTarget,
    ) -> Result<(), FrameError> {
        self.check_device()?;
        let targets = self.targets.as_ref().ok_or(FrameError::TargetsMissing)?;

        let mut frame = FrameEncoder::new(&self.device);
        {
            let mut pass = RenderPassBuilder::new()
                .clear_color(self.clear_color)
                .depth_load()
                .label("scene-color")
                .begin(
                    frame.encoder(),
                    Some(&targets.chain(target).view),
                    Some(&targets.depth.view),
                );
            scene.draw_color(&mut pass);
        }
        frame.submit(&self.queue);
        Ok(())
    }

    fn prepare_material(&mut self, id: BodyId) -> MaterialState {
        if self.check_device().is_err() {
            return MaterialState::Pending;
        }
        let Some(generation) = self.ensure_pipeline() else {
            return MaterialState::Pending;
        };
        let Some(pipeline) = self.pipeline.as_ref() else {
            return MaterialState::Pending;
        };

        let stale = self
            .materials
            .get(&id)
            .is_none_or(|material| material.generation != generation);
        if stale {
            if let Some(old) = self
                .materials
                .insert(id, BodyMaterial::new(&self.device, pipeline, id))
            {
                old.uniform_buffer.destroy();
            }
        }
        MaterialState::Ready
    }

    fn release_material(&mut self, id: BodyId) {
        if let Some(material) = self.materials.remove(&id) {
            material.uniform_buffer.destroy();
        }
    }

    fn scatter_pass(
        &mut self,
        depth: &DepthToken,
        link: ChainLink,
        pass: &BodyPass<'_>,
    ) -> Result<(), FrameError> {
        self.check_device()?;
        let targets = self.targets.as_ref().ok_or(FrameError::TargetsMissing)?;
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or(FrameError::MaterialMissing(pass.id))?;
        let material = self
            .materials
            .get(&pass.id)
            .ok_or(FrameError::MaterialMissing(pass.id))?;

        self.queue.write_buffer(
            &material.uniform_buffer,
            0,
            bytemuck::bytes_of(&BodyUniform::new(pass)),
        );

        let source_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("atmosphere-source-bg"),
            layout: &pipeline.source_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(
                        &targets.chain(link.source).view,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.depth.view),
                },
            ],
        });

        let mut frame = FrameEncoder::new(&self.device);
        {
            let mut render_pass = RenderPassBuilder::new().label("atmosphere-pass").begin(
                frame.encoder(),
                Some(&targets.chain(link.destination).view),
                None,
            );
            render_pass.set_pipeline(&pipeline.pipeline);
            render_pass.set_bind_group(0, &source_group, &[]);
            render_pass.set_bind_group(1, &material.bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        frame.submit(&self.queue);

        tracing::trace!(
            "Frame {}: {} {:?} -> {:?}",
            depth.frame(),
            pass.body.name,
            link.source,
            link.destination
        );
        Ok(())
    }

    fn present(&mut self, source: ChainTarget) -> Result<(), FrameError> {
        self.check_device()?;
        let targets = self.targets.as_ref().ok_or(FrameError::TargetsMissing)?;
        let source_group = self.blit.bind_source(&self.device, &targets.chain(source).view);

        let mut frame = FrameEncoder::new(&self.device);
        {
            let mut pass = RenderPassBuilder::new().label("present").begin(
                frame.encoder(),
                Some(&targets.presentation.view),
                None,
            );
            self.blit.draw(&mut pass, &source_group);
        }
        frame.submit(&self.queue);
        Ok(())
    }

    fn release_targets(&mut self) {
        if let Some(targets) = self.targets.take() {
            targets.destroy();
            tracing::debug!("Released frame targets");
        }
    }
}

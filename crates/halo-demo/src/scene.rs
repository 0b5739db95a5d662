//! Analytic sphere scene: one lit sphere per configured planet.
//!
//! The same scene is produced on the CPU as depth/color buffers and on the GPU
//! as a full-screen ray cast writing `frag_depth`.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use halo_atmosphere::scatter::{pixel_uv, ray_sphere};
use halo_atmosphere::{CameraState, FrameError, GpuScene, SoftwareScene};
use halo_config::Config;
use halo_render::{
    DepthTarget, FULLSCREEN_VERTEX_WGSL, HDR_FORMAT, ShaderError, ShaderLibrary, Viewport,
};

/// Most spheres the GPU scene uniform holds.
pub const MAX_SPHERES: usize = 8;

const AMBIENT: f32 = 0.04;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneSphere {
    pub center: Vec3,
    pub radius: f32,
    pub color: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SphereScene {
    pub spheres: Vec<SceneSphere>,
    pub light_position: Vec3,
    pub clear_color: Vec3,
}

impl SphereScene {
    pub fn from_config(config: &Config) -> Self {
        let spheres: Vec<SceneSphere> = config
            .planets
            .iter()
            .map(|planet| SceneSphere {
                center: Vec3::from_array(planet.center),
                radius: planet.planet_radius,
                color: Vec3::from_array(planet.surface_color),
            })
            .collect();
        if spheres.len() > MAX_SPHERES {
            tracing::warn!(
                "{} planets configured, the GPU scene draws the first {MAX_SPHERES}",
                spheres.len()
            );
        }
        Self {
            spheres,
            light_position: Vec3::from_array(config.light.position),
            clear_color: Vec3::from_array(config.render.clear_color),
        }
    }

    /// Nearest sphere hit along the ray as `(distance, sphere)`.
    fn trace(&self, origin: Vec3, dir: Vec3) -> Option<(f32, &SceneSphere)> {
        self.spheres
            .iter()
            .filter_map(|sphere| {
                let (entry, length) = ray_sphere(sphere.center, sphere.radius, origin, dir);
                (entry > 0.0 && length > 0.0).then_some((entry, sphere))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }

    fn shade(&self, sphere: &SceneSphere, point: Vec3) -> Vec3 {
        let normal = (point - sphere.center).normalize_or_zero();
        let to_light = (self.light_position - point).normalize_or_zero();
        sphere.color * (AMBIENT + normal.dot(to_light).max(0.0))
    }

    /// Ray cast the scene into CPU buffers.
    pub fn rasterize(&self, camera: &CameraState, viewport: Viewport) -> SoftwareScene {
        let view_projection = camera.inverse_projection.inverse() * camera.world.inverse();
        let mut scene = SoftwareScene::new(viewport.width, viewport.height, self.clear_color);

        for y in 0..viewport.height {
            for x in 0..viewport.width {
                let dir = camera.view_ray(pixel_uv(x, y, viewport.width, viewport.height));
                let Some((distance, sphere)) = self.trace(camera.position, dir) else {
                    continue;
                };
                let point = camera.position + dir * distance;
                let depth = view_projection.project_point3(point).z;
                if (0.0..=1.0).contains(&depth) {
                    scene.plot(x, y, self.shade(sphere, point), depth);
                }
            }
        }
        scene
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct SphereData {
    center_radius: [f32; 4],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct SceneUniform {
    view_projection: [[f32; 4]; 4],
    inv_projection: [[f32; 4]; 4],
    camera_world: [[f32; 4]; 4],
    camera_position: [f32; 3],
    sphere_count: u32,
    light_position: [f32; 3],
    ambient: f32,
    spheres: [SphereData; MAX_SPHERES],
}

const SCENE_WGSL: &str = r#"
const MAX_SPHERES: u32 = 8u;

struct SphereData {
    center_radius: vec4<f32>,
    color: vec4<f32>,
};

struct SceneUniform {
    view_projection: mat4x4<f32>,
    inv_projection: mat4x4<f32>,
    camera_world: mat4x4<f32>,
    camera_position: vec3<f32>,
    sphere_count: u32,
    light_position: vec3<f32>,
    ambient: f32,
    spheres: array<SphereData, 8>,
};

@group(0) @binding(0) var<uniform> scene: SceneUniform;

struct Hit {
    distance: f32,
    index: u32,
};

fn trace(origin: vec3<f32>, dir: vec3<f32>) -> Hit {
    var best = Hit(-1.0, 0u);
    for (var i = 0u; i < min(scene.sphere_count, MAX_SPHERES); i++) {
        let sphere = scene.spheres[i].center_radius;
        let offset = origin - sphere.xyz;
        let b = dot(dir, offset);
        let c = dot(offset, offset) - sphere.w * sphere.w;
        let discriminant = b * b - c;
        if (discriminant < 0.0) {
            continue;
        }
        let entry = -b - sqrt(discriminant);
        if (entry > 0.0 && (best.distance < 0.0 || entry < best.distance)) {
            best = Hit(entry, i);
        }
    }
    return best;
}

fn view_ray(uv: vec2<f32>) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 1.0, 1.0);
    let view = scene.inv_projection * ndc;
    let far_point = (scene.camera_world * vec4<f32>(view.xyz / view.w, 1.0)).xyz;
    return normalize(far_point - scene.camera_position);
}

fn device_depth(point: vec3<f32>) -> f32 {
    let clip = scene.view_projection * vec4<f32>(point, 1.0);
    return clip.z / clip.w;
}

@fragment
fn fs_depth(in: FullscreenOutput) -> @builtin(frag_depth) f32 {
    let dir = view_ray(in.uv);
    let hit = trace(scene.camera_position, dir);
    if (hit.distance < 0.0) {
        discard;
    }
    return device_depth(scene.camera_position + dir * hit.distance);
}

struct ColorOutput {
    @location(0) color: vec4<f32>,
    @builtin(frag_depth) depth: f32,
};

@fragment
fn fs_color(in: FullscreenOutput) -> ColorOutput {
    let dir = view_ray(in.uv);
    let hit = trace(scene.camera_position, dir);
    if (hit.distance < 0.0) {
        discard;
    }
    let point = scene.camera_position + dir * hit.distance;
    let sphere = scene.spheres[hit.index];
    let normal = normalize(point - sphere.center_radius.xyz);
    let to_light = normalize(scene.light_position - point);
    let lit = sphere.color.rgb * (scene.ambient + max(dot(normal, to_light), 0.0));

    var out: ColorOutput;
    out.color = vec4<f32>(lit, 1.0);
    out.depth = device_depth(point);
    return out;
}
"#;

/// GPU rendition of a [`SphereScene`].
pub struct GpuSphereScene {
    scene: SphereScene,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    depth_pipeline: wgpu::RenderPipeline,
    color_pipeline: wgpu::RenderPipeline,
}

impl GpuSphereScene {
    pub fn new(device: &wgpu::Device, scene: SphereScene) -> Result<Self, ShaderError> {
        let mut shaders = ShaderLibrary::new().with_prelude(FULLSCREEN_VERTEX_WGSL);
        let shader = shaders.load_from_source(device, "sphere-scene", SCENE_WGSL)?;

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sphere-scene-uniform"),
            size: std::mem::size_of::<SceneUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sphere-scene-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<SceneUniform>() as u64),
                },
                count: None,
            }],
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sphere-scene-bg"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sphere-scene-layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });

        let color_targets = [Some(wgpu::ColorTargetState {
            format: HDR_FORMAT,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let depth_pipeline = create_scene_pipeline(
            device,
            &shader,
            &pipeline_layout,
            "fs_depth",
            &[],
            true,
            "sphere-scene-depth",
        );
        let color_pipeline = create_scene_pipeline(
            device,
            &shader,
            &pipeline_layout,
            "fs_color",
            &color_targets,
            false,
            "sphere-scene-color",
        );

        Ok(Self {
            scene,
            uniform_buffer,
            bind_group,
            depth_pipeline,
            color_pipeline,
        })
    }

    fn uniform(&self, camera: &CameraState) -> SceneUniform {
        let view_projection: Mat4 = camera.inverse_projection.inverse() * camera.world.inverse();
        let mut spheres = [SphereData::zeroed(); MAX_SPHERES];
        for (slot, sphere) in spheres.iter_mut().zip(&self.scene.spheres) {
            *slot = SphereData {
                center_radius: sphere.center.extend(sphere.radius).to_array(),
                color: sphere.color.extend(1.0).to_array(),
            };
        }
        SceneUniform {
            view_projection: view_projection.to_cols_array_2d(),
            inv_projection: camera.inverse_projection.to_cols_array_2d(),
            camera_world: camera.world.to_cols_array_2d(),
            camera_position: camera.position.to_array(),
            sphere_count: self.scene.spheres.len().min(MAX_SPHERES) as u32,
            light_position: self.scene.light_position.to_array(),
            ambient: AMBIENT,
            spheres,
        }
    }
}

fn create_scene_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    fragment_entry: &str,
    targets: &[Option<wgpu::ColorTargetState>],
    depth_write_enabled: bool,
    label: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_fullscreen"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: Some(DepthTarget::depth_stencil_state(depth_write_enabled)),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}

impl GpuScene for GpuSphereScene {
    fn prepare(&self, queue: &wgpu::Queue, camera: &CameraState) -> Result<(), FrameError> {
        queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&self.uniform(camera)),
        );
        Ok(())
    }

    fn draw_depth(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_pipeline(&self.depth_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn draw_color(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_pipeline(&self.color_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

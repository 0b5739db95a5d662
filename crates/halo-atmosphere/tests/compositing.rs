//! End-to-end frames through the compositor on both backends.

use glam::Vec3;
use halo_atmosphere::{
    AtmosphereBody, BodyId, CameraState, FrameCompositor, FrameInputs, FrameOutcome, GpuBackend,
    GpuScene, PlanetRegistry, ScatterCoefficientModel, SoftwareBackend, SoftwareScene,
};
use halo_render::{Camera, Viewport, init_headless_context_blocking};

const WIDTH: u32 = 24;
const HEIGHT: u32 = 16;
const WAVELENGTHS: [f32; 3] = [700.0, 530.0, 440.0];

fn camera() -> Camera {
    let mut camera = Camera::look_at(Vec3::ZERO, Vec3::NEG_Z, 1.0, 0.1, 100.0);
    camera.set_aspect_ratio(WIDTH as f32, HEIGHT as f32);
    camera
}

fn inputs() -> FrameInputs {
    FrameInputs {
        camera: CameraState::from_camera(&camera()),
        viewport: Viewport::new(WIDTH, HEIGHT),
        wavelengths: WAVELENGTHS,
        strength: 1.0,
    }
}

/// A scene with a gradient background and a strip of near geometry.
fn gradient_scene() -> SoftwareScene {
    let mut scene = SoftwareScene::new(WIDTH, HEIGHT, Vec3::ZERO);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let color = Vec3::new(
                x as f32 / WIDTH as f32,
                y as f32 / HEIGHT as f32,
                0.25,
            );
            let index = (y * WIDTH + x) as usize;
            scene.color[index] = color;
            if y >= HEIGHT - 3 {
                scene.depth[index] = 0.5;
            }
        }
    }
    scene
}

fn software_compositor() -> FrameCompositor<SoftwareBackend> {
    FrameCompositor::new(
        SoftwareBackend::new().with_threads(3),
        ScatterCoefficientModel::new(WAVELENGTHS, 1.0),
    )
}

fn presented(compositor: &FrameCompositor<SoftwareBackend>) -> Vec<Vec3> {
    compositor
        .backend()
        .presented()
        .expect("targets allocated")
        .to_vec()
}

#[test]
fn test_zero_bodies_output_matches_scene() {
    let scene = gradient_scene();
    let mut compositor = software_compositor();

    let outcome = compositor.render_frame(&PlanetRegistry::new(), &scene, &inputs());
    let report = outcome.report().expect("frame presented");
    assert!(report.order.is_empty());
    assert_eq!(presented(&compositor), scene.color);
}

#[test]
fn test_body_beyond_far_plane_leaves_frame_untouched() {
    let scene = gradient_scene();
    let mut registry = PlanetRegistry::new();
    registry
        .register(AtmosphereBody::new(
            "distant",
            Vec3::new(0.0, 0.0, -500.0),
            10.0,
            15.0,
            4.0,
        ))
        .unwrap();
    let mut compositor = software_compositor();

    let outcome = compositor.render_frame(&registry, &scene, &inputs());
    assert_eq!(outcome.report().unwrap().order.len(), 1);
    assert_eq!(presented(&compositor), scene.color);
}

#[test]
fn test_farther_body_composites_first() {
    let mut registry = PlanetRegistry::new();
    let near = registry
        .register(AtmosphereBody::new("near", Vec3::new(-3.0, 0.0, -10.0), 1.0, 1.5, 4.0))
        .unwrap();
    let far = registry
        .register(AtmosphereBody::new("far", Vec3::new(4.0, 0.0, -20.0), 2.0, 3.0, 4.0))
        .unwrap();
    let mut compositor = software_compositor();

    let outcome = compositor.render_frame(&registry, &gradient_scene(), &inputs());
    assert_eq!(outcome.report().unwrap().order, vec![far, near]);
}

#[test]
fn test_atmosphere_brightens_black_background() {
    let scene = SoftwareScene::new(WIDTH, HEIGHT, Vec3::ZERO);
    let mut registry = PlanetRegistry::new();
    registry
        .register(AtmosphereBody::new("terra", Vec3::new(0.0, 0.0, -8.0), 2.0, 3.0, 4.0))
        .unwrap();
    registry.track_light(Vec3::new(0.0, 50.0, -8.0));
    let mut compositor = software_compositor();

    compositor.render_frame(&registry, &scene, &inputs());
    let image = presented(&compositor);
    assert!(image.iter().all(|c| c.min_element() >= 0.0 && c.is_finite()));
    assert!(image.iter().any(|c| c.max_element() > 0.0));
    // Blue scatters more than red at the reference wavelengths.
    let total = image.iter().fold(Vec3::ZERO, |acc, c| acc + *c);
    assert!(total.z > total.x);
}

#[test]
fn test_coefficients_are_deterministic() {
    let mut first = software_compositor();
    let mut second = software_compositor();
    let registry = PlanetRegistry::new();
    let scene = gradient_scene();

    let a = first.render_frame(&registry, &scene, &inputs());
    let b = second.render_frame(&registry, &scene, &inputs());
    let (a, b) = (a.report().unwrap(), b.report().unwrap());
    assert_eq!(a.coefficients, b.coefficients);

    let expected = Vec3::new(
        (400.0f32 / 700.0).powi(4),
        (400.0f32 / 530.0).powi(4),
        (400.0f32 / 440.0).powi(4),
    );
    assert!((a.coefficients.as_vec3() - expected).abs().max_element() < 1e-6);
}

#[test]
fn test_resize_reallocates_targets() {
    let mut compositor = software_compositor();
    let registry = PlanetRegistry::new();
    compositor.render_frame(&registry, &gradient_scene(), &inputs());

    let small = SoftwareScene::new(8, 8, Vec3::ONE);
    let mut small_inputs = inputs();
    small_inputs.viewport = Viewport::new(8, 8);
    let outcome = compositor.render_frame(&registry, &small, &small_inputs);
    assert!(matches!(outcome, FrameOutcome::Presented(_)));
    assert_eq!(presented(&compositor), small.color);
}

#[test]
fn test_mismatched_scene_skips_then_recovers() {
    let mut compositor = software_compositor();
    let registry = PlanetRegistry::new();

    let wrong = SoftwareScene::new(4, 4, Vec3::ONE);
    let outcome = compositor.render_frame(&registry, &wrong, &inputs());
    assert!(matches!(outcome, FrameOutcome::Skipped(_)));
    assert!(compositor.backend().presented().is_none());

    let scene = gradient_scene();
    let outcome = compositor.render_frame(&registry, &scene, &inputs());
    assert!(matches!(outcome, FrameOutcome::Presented(_)));
    assert_eq!(presented(&compositor), scene.color);
}

#[test]
fn test_thread_count_does_not_change_output() {
    let scene = gradient_scene();
    let mut registry = PlanetRegistry::new();
    registry
        .register(AtmosphereBody::new("terra", Vec3::new(1.0, 0.5, -7.0), 2.0, 3.0, 4.0))
        .unwrap();
    registry.track_light(Vec3::new(30.0, 20.0, 0.0));

    let mut single = FrameCompositor::new(
        SoftwareBackend::new().with_threads(1),
        ScatterCoefficientModel::new(WAVELENGTHS, 1.0),
    );
    let mut many = FrameCompositor::new(
        SoftwareBackend::new().with_threads(5),
        ScatterCoefficientModel::new(WAVELENGTHS, 1.0),
    );
    single.render_frame(&registry, &scene, &inputs());
    many.render_frame(&registry, &scene, &inputs());
    assert_eq!(presented(&single), presented(&many));
}

#[test]
fn test_removed_body_no_longer_rendered() {
    let scene = SoftwareScene::new(WIDTH, HEIGHT, Vec3::ZERO);
    let mut registry = PlanetRegistry::new();
    let id: BodyId = registry
        .register(AtmosphereBody::new("terra", Vec3::new(0.0, 0.0, -8.0), 2.0, 3.0, 4.0))
        .unwrap();
    let mut compositor = software_compositor();
    compositor.render_frame(&registry, &scene, &inputs());
    assert_eq!(compositor.backend().material_count(), 1);

    registry.deregister(id);
    let outcome = compositor.render_frame(&registry, &scene, &inputs());
    assert!(outcome.report().unwrap().order.is_empty());
    assert_eq!(compositor.backend().material_count(), 0);
    assert_eq!(presented(&compositor), scene.color);
}

/// Draws nothing; the frame is the scene pass's clear color.
struct EmptyScene;

impl GpuScene for EmptyScene {
    fn draw_depth(&self, _pass: &mut wgpu::RenderPass<'_>) {}

    fn draw_color(&self, _pass: &mut wgpu::RenderPass<'_>) {}
}

fn assert_rgba_close(pixels: &[u8], expected: [u8; 4], tolerance: u8) {
    for texel in pixels.chunks_exact(4) {
        for (got, want) in texel.iter().zip(expected) {
            assert!(
                got.abs_diff(want) <= tolerance,
                "texel {texel:?} differs from {expected:?}"
            );
        }
    }
}

#[test]
fn test_gpu_zero_bodies_presents_scene() {
    let Ok(context) = init_headless_context_blocking() else {
        return;
    };
    let backend = GpuBackend::new(&context).with_clear_color(wgpu::Color {
        r: 0.2,
        g: 0.4,
        b: 0.6,
        a: 1.0,
    });
    let mut compositor =
        FrameCompositor::new(backend, ScatterCoefficientModel::new(WAVELENGTHS, 1.0));

    let outcome = compositor.render_frame(&PlanetRegistry::new(), &EmptyScene, &inputs());
    assert!(matches!(outcome, FrameOutcome::Presented(_)));
    let pixels = compositor.backend().read_presentation().unwrap();
    assert_eq!(pixels.len(), (WIDTH * HEIGHT * 4) as usize);
    assert_rgba_close(&pixels, [51, 102, 153, 255], 1);
}

#[test]
fn test_gpu_body_beyond_far_plane_presents_scene() {
    let Ok(context) = init_headless_context_blocking() else {
        return;
    };
    let backend = GpuBackend::new(&context).with_clear_color(wgpu::Color {
        r: 0.2,
        g: 0.4,
        b: 0.6,
        a: 1.0,
    });
    let mut compositor =
        FrameCompositor::new(backend, ScatterCoefficientModel::new(WAVELENGTHS, 1.0));
    let mut registry = PlanetRegistry::new();
    registry
        .register(AtmosphereBody::new(
            "distant",
            Vec3::new(0.0, 0.0, -500.0),
            10.0,
            15.0,
            4.0,
        ))
        .unwrap();

    let outcome = compositor.render_frame(&registry, &EmptyScene, &inputs());
    assert_eq!(outcome.report().unwrap().order.len(), 1);
    let pixels = compositor.backend().read_presentation().unwrap();
    assert_rgba_close(&pixels, [51, 102, 153, 255], 1);
}

#[test]
fn test_gpu_matches_software_reference() {
    let Ok(context) = init_headless_context_blocking() else {
        return;
    };
    let mut registry = PlanetRegistry::new();
    registry
        .register(AtmosphereBody::new("terra", Vec3::new(0.0, 0.0, -8.0), 2.0, 3.0, 4.0))
        .unwrap();
    registry.track_light(Vec3::new(0.0, 50.0, -8.0));

    let mut gpu = FrameCompositor::new(
        GpuBackend::new(&context),
        ScatterCoefficientModel::new(WAVELENGTHS, 1.0),
    );
    let outcome = gpu.render_frame(&registry, &EmptyScene, &inputs());
    assert!(matches!(outcome, FrameOutcome::Presented(_)));
    let gpu_pixels = gpu.backend().read_presentation().unwrap();

    let mut cpu = software_compositor();
    cpu.render_frame(
        &registry,
        &SoftwareScene::new(WIDTH, HEIGHT, Vec3::ZERO),
        &inputs(),
    );
    let cpu_pixels = cpu.backend().presented_rgba8().unwrap();

    let worst = gpu_pixels
        .iter()
        .zip(&cpu_pixels)
        .map(|(a, b)| a.abs_diff(*b))
        .max()
        .unwrap_or(0);
    assert!(worst <= 4, "GPU and CPU differ by {worst}");
}

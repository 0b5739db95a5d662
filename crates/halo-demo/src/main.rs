//! Renders one frame of the configured planets with their atmospheres and
//! writes it to a PNG.

mod output;
mod scene;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use glam::Vec3;
use halo_atmosphere::{
    CameraState, FrameBackend, FrameCompositor, FrameError, FrameInputs, FrameOutcome,
    GpuBackend, PlanetRegistry, ScatterCoefficientModel, SoftwareBackend,
};
use halo_config::{BackendKind, CliArgs, Config};
use halo_render::{
    Camera, RenderContextError, ShaderError, Viewport, init_headless_context_blocking,
};
use tracing::{error, info, warn};

use scene::{GpuSphereScene, SphereScene};

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("render context error: {0}")]
    Context(#[from] RenderContextError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("shader error: {0}")]
    Shader(#[from] ShaderError),
    #[error("PNG encoding failed: {0}")]
    Png(#[from] png::EncodingError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn build_camera(config: &Config) -> Camera {
    let settings = &config.camera;
    let mut camera = Camera::look_at(
        Vec3::from_array(settings.position),
        Vec3::from_array(settings.look_at),
        settings.fov_y_degrees.to_radians(),
        settings.near,
        settings.far,
    );
    camera.set_aspect_ratio(config.window.width as f32, config.window.height as f32);
    camera
}

/// Turn a frame outcome into RGBA8 pixels, substituting the clear color for a
/// skipped frame.
fn frame_pixels<B: FrameBackend>(
    compositor: &FrameCompositor<B>,
    outcome: &FrameOutcome,
    viewport: Viewport,
    clear_color: Vec3,
    read: impl FnOnce(&B) -> Result<Vec<u8>, FrameError>,
) -> Result<Vec<u8>, DemoError> {
    match outcome {
        FrameOutcome::Presented(report) => {
            info!(
                "Frame {}: composited {} bodies ({} not ready), coefficients {:?}",
                compositor.frame_index(),
                report.order.len(),
                report.skipped_unready.len(),
                report.coefficients.as_vec3()
            );
            Ok(read(compositor.backend())?)
        }
        FrameOutcome::Skipped(err) => {
            warn!(
                "Frame {} skipped ({err}), writing clear color",
                compositor.frame_index()
            );
            Ok(output::clear_image(viewport.width, viewport.height, clear_color))
        }
    }
}

fn render_software(
    config: &Config,
    registry: &PlanetRegistry,
    inputs: &FrameInputs,
) -> Result<Vec<u8>, DemoError> {
    let scene = SphereScene::from_config(config).rasterize(&inputs.camera, inputs.viewport);
    let mut compositor = FrameCompositor::new(
        SoftwareBackend::new(),
        ScatterCoefficientModel::from(&config.scattering),
    );
    let outcome = compositor.render_frame(registry, &scene, inputs);
    frame_pixels(
        &compositor,
        &outcome,
        inputs.viewport,
        Vec3::from_array(config.render.clear_color),
        |backend| backend.presented_rgba8().ok_or(FrameError::TargetsMissing),
    )
}

fn render_gpu(
    config: &Config,
    registry: &PlanetRegistry,
    inputs: &FrameInputs,
) -> Result<Vec<u8>, DemoError> {
    let context = init_headless_context_blocking()?;
    let [r, g, b] = config.render.clear_color.map(f64::from);
    let backend = GpuBackend::new(&context).with_clear_color(wgpu::Color { r, g, b, a: 1.0 });
    let scene = GpuSphereScene::new(backend.device(), SphereScene::from_config(config))?;
    let mut compositor =
        FrameCompositor::new(backend, ScatterCoefficientModel::from(&config.scattering));

    let outcome = compositor.render_frame(registry, &scene, inputs);
    frame_pixels(
        &compositor,
        &outcome,
        inputs.viewport,
        Vec3::from_array(config.render.clear_color),
        GpuBackend::read_presentation,
    )
}

fn run(config: &Config) -> Result<PathBuf, DemoError> {
    let mut registry = PlanetRegistry::from_configs(&config.planets);
    registry.track_light(Vec3::from_array(config.light.position));
    info!("{} atmosphere bodies registered", registry.len());

    let viewport = Viewport::new(config.window.width, config.window.height);
    let inputs = FrameInputs {
        camera: CameraState::from_camera(&build_camera(config)),
        viewport,
        wavelengths: config.scattering.wavelengths,
        strength: config.scattering.strength,
    };

    let pixels = match config.render.backend {
        BackendKind::Software => render_software(config, &registry, &inputs)?,
        BackendKind::Gpu => match render_gpu(config, &registry, &inputs) {
            Err(err @ (DemoError::Context(_) | DemoError::Shader(_))) => {
                warn!("GPU unavailable ({err}), using the software backend");
                render_software(config, &registry, &inputs)?
            }
            result => result?,
        },
    };

    let path = PathBuf::from(&config.render.output_path);
    output::write_png(&path, viewport.width, viewport.height, &pixels)?;
    Ok(path)
}

fn load_config(config_dir: &Path, args: &CliArgs) -> Config {
    let mut config = Config::load_or_create(config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::with_demo_planets()
    });
    config.apply_cli_overrides(args);
    config
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = Config::resolve_dir(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("{e}, using the working directory");
        PathBuf::from(".")
    });
    let mut config = load_config(&config_dir, &args);

    let log_dir = config_dir.join("logs");
    halo_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let corrections = config.sanitize();
    if corrections > 0 {
        warn!("{corrections} config values were out of range and have been clamped");
    }

    match run(&config) {
        Ok(path) => {
            info!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(dir: &Path) -> Config {
        let mut config = Config::with_demo_planets();
        config.window.width = 32;
        config.window.height = 18;
        config.render.backend = BackendKind::Software;
        config.render.output_path = dir.join("frame.png").display().to_string();
        config
    }

    #[test]
    fn test_camera_follows_config() {
        let config = Config::default();
        let camera = build_camera(&config);
        assert_eq!(camera.position, Vec3::from_array(config.camera.position));
        assert!((camera.aspect_ratio - 1280.0 / 720.0).abs() < 1e-6);
        assert!((camera.forward() - Vec3::NEG_Z).length() < 1e-5);
    }

    #[test]
    fn test_software_run_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let path = run(&config).unwrap();
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_oversized_frame_falls_back_to_clear_color() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.window.width = halo_atmosphere::software::MAX_SOFTWARE_DIMENSION + 1;
        config.window.height = 1;
        config.render.clear_color = [0.0, 1.0, 0.0];
        let registry = PlanetRegistry::new();
        let viewport = Viewport::new(config.window.width, 1);
        let inputs = FrameInputs {
            camera: CameraState::from_camera(&build_camera(&config)),
            viewport,
            wavelengths: config.scattering.wavelengths,
            strength: config.scattering.strength,
        };
        let pixels = render_software(&config, &registry, &inputs).unwrap();
        assert_eq!(pixels.len(), viewport.pixel_count() * 4);
        assert_eq!(&pixels[..4], &[0, 255, 0, 255]);
    }
}

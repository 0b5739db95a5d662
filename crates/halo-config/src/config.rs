//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Shortest wavelength (nm) accepted for a scattering channel.
pub const MIN_WAVELENGTH_NM: f32 = 380.0;
/// Longest wavelength (nm) accepted for a scattering channel.
pub const MAX_WAVELENGTH_NM: f32 = 780.0;
/// Smallest scattering strength the pipeline is handed.
pub const MIN_SCATTER_STRENGTH: f32 = 1e-4;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Output image size.
    pub window: WindowConfig,
    /// Rendering settings.
    pub render: RenderConfig,
    /// Camera placement for the demo scene.
    pub camera: CameraConfig,
    /// Global scattering inputs shared by every atmosphere.
    pub scattering: ScatteringConfig,
    /// The single tracked light source.
    pub light: LightConfig,
    /// Planet bodies, each with an atmosphere shell.
    pub planets: Vec<PlanetConfig>,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Size of the offscreen frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Width in physical pixels.
    pub width: u32,
    /// Height in physical pixels.
    pub height: u32,
}

/// Which compositor backend renders the frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// wgpu device path.
    #[default]
    Gpu,
    /// CPU reference path.
    Software,
}

/// Rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Compositor backend.
    pub backend: BackendKind,
    /// Color presented when a frame has to be skipped.
    pub clear_color: [f32; 3],
    /// Where the demo writes the composited frame.
    pub output_path: String,
}

/// Camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera position in world space.
    pub position: [f32; 3],
    /// Point the camera looks at.
    pub look_at: [f32; 3],
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f32,
    /// Near clip plane distance.
    pub near: f32,
    /// Far clip plane distance.
    pub far: f32,
}

/// Global scattering inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScatteringConfig {
    /// Red, green and blue wavelengths in nanometers.
    pub wavelengths: [f32; 3],
    /// Scattering strength multiplier.
    pub strength: f32,
}

/// Light source configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LightConfig {
    /// World-space position of the light (the sun).
    pub position: [f32; 3],
}

/// One planet with an atmosphere shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanetConfig {
    /// Unique display name.
    pub name: String,
    /// World-space center of the solid body.
    pub center: [f32; 3],
    /// Radius of the solid body.
    pub planet_radius: f32,
    /// Outer radius of the atmosphere shell.
    pub atmosphere_radius: f32,
    /// Exponential density decay rate with altitude.
    pub density_falloff: f32,
    /// Surface albedo used by the demo scene.
    pub surface_color: [f32; 3],
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Write JSON logs next to the config in release builds too. Debug
    /// builds always write them.
    pub file_logging: bool,
}

// --- Default implementations ---

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Gpu,
            clear_color: [0.0, 0.0, 0.0],
            output_path: "halo.png".to_string(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 12.0],
            look_at: [0.0, 0.0, 0.0],
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 400.0,
        }
    }
}

impl Default for ScatteringConfig {
    fn default() -> Self {
        Self {
            wavelengths: [700.0, 530.0, 440.0],
            strength: 1.0,
        }
    }
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            position: [200.0, 60.0, 120.0],
        }
    }
}

impl Default for PlanetConfig {
    fn default() -> Self {
        Self {
            name: "Planet".to_string(),
            center: [0.0, 0.0, 0.0],
            planet_radius: 2.0,
            atmosphere_radius: 2.6,
            density_falloff: 4.0,
            surface_color: [0.25, 0.45, 0.3],
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            file_logging: false,
        }
    }
}

// --- Validation ---

impl ScatteringConfig {
    /// Clamp wavelengths and strength into the range the pipeline assumes.
    /// Returns the number of corrected values.
    pub fn sanitize(&mut self) -> usize {
        let mut corrections = 0;
        for (channel, wavelength) in self.wavelengths.iter_mut().enumerate() {
            let clamped = if wavelength.is_finite() {
                wavelength.clamp(MIN_WAVELENGTH_NM, MAX_WAVELENGTH_NM)
            } else {
                MIN_WAVELENGTH_NM
            };
            if clamped != *wavelength {
                log::warn!("Wavelength[{channel}] {wavelength} clamped to {clamped}");
                *wavelength = clamped;
                corrections += 1;
            }
        }
        if !(self.strength >= MIN_SCATTER_STRENGTH) {
            log::warn!(
                "Scatter strength {} raised to {MIN_SCATTER_STRENGTH}",
                self.strength
            );
            self.strength = MIN_SCATTER_STRENGTH;
            corrections += 1;
        }
        corrections
    }
}

impl PlanetConfig {
    /// Repair radii and falloff so that `atmosphere_radius > planet_radius > 0`
    /// and `density_falloff > 0`. Returns the number of corrected values.
    pub fn sanitize(&mut self) -> usize {
        let mut corrections = 0;
        if !(self.planet_radius > 0.0) {
            log::warn!(
                "Planet '{}': radius {} replaced with 1.0",
                self.name,
                self.planet_radius
            );
            self.planet_radius = 1.0;
            corrections += 1;
        }
        if !(self.atmosphere_radius > self.planet_radius) {
            let repaired = self.planet_radius * 1.25;
            log::warn!(
                "Planet '{}': atmosphere radius {} must exceed planet radius, using {repaired}",
                self.name,
                self.atmosphere_radius
            );
            self.atmosphere_radius = repaired;
            corrections += 1;
        }
        if !(self.density_falloff > 0.0) {
            log::warn!(
                "Planet '{}': density falloff {} replaced with 1.0",
                self.name,
                self.density_falloff
            );
            self.density_falloff = 1.0;
            corrections += 1;
        }
        corrections
    }
}

impl Config {
    /// Clamp every value the atmosphere core treats as a validated invariant.
    /// Returns the total number of corrections made.
    pub fn sanitize(&mut self) -> usize {
        let mut corrections = self.scattering.sanitize();
        for planet in &mut self.planets {
            corrections += planet.sanitize();
        }
        if self.camera.near <= 0.0 || self.camera.far <= self.camera.near {
            log::warn!(
                "Camera clip planes ({}, {}) invalid, using defaults",
                self.camera.near,
                self.camera.far
            );
            let defaults = CameraConfig::default();
            self.camera.near = defaults.near;
            self.camera.far = defaults.far;
            corrections += 1;
        }
        self.window.width = self.window.width.max(1);
        self.window.height = self.window.height.max(1);
        corrections
    }

    /// A two-planet system used when no config file exists yet.
    pub fn with_demo_planets() -> Self {
        Self {
            planets: vec![
                PlanetConfig {
                    name: "Terra".to_string(),
                    ..PlanetConfig::default()
                },
                PlanetConfig {
                    name: "Selene".to_string(),
                    center: [-5.0, 1.5, -10.0],
                    planet_radius: 1.2,
                    atmosphere_radius: 1.7,
                    density_falloff: 6.0,
                    surface_color: [0.55, 0.4, 0.35],
                },
            ],
            ..Self::default()
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Platform default directory for `config.ron`.
    pub fn default_dir() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("halo"))
    }

    /// The directory given on the command line, else the platform default.
    pub fn resolve_dir(cli_dir: Option<&Path>) -> Result<std::path::PathBuf, ConfigError> {
        match cli_dir {
            Some(dir) => Ok(dir.to_path_buf()),
            None => Self::default_dir().ok_or(ConfigError::NoConfigDir),
        }
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::with_demo_planets();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }
}

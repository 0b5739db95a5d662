//! Configuration for Halo.
//!
//! Provides runtime-configurable settings that persist to disk as RON files,
//! CLI overrides via clap, and the clamping that keeps
//! scattering inputs and planet radii inside the ranges the atmosphere core
//! assumes.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    BackendKind, CameraConfig, Config, DebugConfig, LightConfig, MAX_WAVELENGTH_NM,
    MIN_SCATTER_STRENGTH, MIN_WAVELENGTH_NM, PlanetConfig, RenderConfig, ScatteringConfig,
    WindowConfig,
};
pub use error::ConfigError;

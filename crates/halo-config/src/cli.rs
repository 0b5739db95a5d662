//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::{BackendKind, Config};

/// Halo command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "halo", about = "Multi-body atmospheric scattering renderer")]
pub struct CliArgs {
    /// Output width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Output height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Render with the CPU reference backend instead of the GPU.
    #[arg(long)]
    pub software: bool,

    /// Scattering strength multiplier.
    #[arg(long)]
    pub strength: Option<f32>,

    /// PNG file the composited frame is written to.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
        if args.software {
            self.render.backend = BackendKind::Software;
        }
        if let Some(strength) = args.strength {
            self.scattering.strength = strength;
        }
        if let Some(ref output) = args.output {
            self.render.output_path = output.display().to_string();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

//! Shader module loading, caching, and hot-reload.
//!
//! Every shader carries a generation counter that bumps whenever its module is
//! replaced, so pipelines built from it can tell that they are stale and must
//! be rebuilt before their next use.
//!
//! Compilation runs inside a validation error scope. Source that fails to
//! compile leaves the entry in place without a module, so [`ShaderLibrary::get`]
//! returns `None` until a later compile succeeds.

use log::{debug, info, warn};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use thiserror::Error;
use wgpu::{ShaderModuleDescriptor, ShaderSource};

/// Error types for shader loading operations.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read shader file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("shader '{name}' not found in library")]
    NotLoaded { name: String },

    #[error("shader '{name}' was not loaded from a file and cannot be reloaded")]
    NotFileBacked { name: String },

    #[error("no shader directory configured for file-based loading")]
    NoShaderDir,

    #[error("'{name}' failed validation: {message}")]
    Invalid { name: String, message: String },
}

/// Run `build` inside a validation error scope and report anything the device
/// rejected as [`ShaderError::Invalid`].
pub fn validated<T>(
    device: &wgpu::Device,
    name: &str,
    build: impl FnOnce() -> T,
) -> Result<T, ShaderError> {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(scope.pop()) {
        None => Ok(value),
        Some(err) => Err(ShaderError::Invalid {
            name: name.to_string(),
            message: err.to_string(),
        }),
    }
}

struct LoadedShader {
    module: Option<Arc<wgpu::ShaderModule>>,
    filename: Option<String>,
    generation: u64,
}

/// Central registry for compiled shader modules with hot-reload support.
pub struct ShaderLibrary {
    modules: HashMap<String, LoadedShader>,
    shader_dir: Option<PathBuf>,
    prelude: &'static str,
}

impl ShaderLibrary {
    /// Create a new empty shader library.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            shader_dir: None,
            prelude: "",
        }
    }

    /// Set the directory to load .wgsl files from (development mode).
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }

    /// WGSL prepended to every shader compiled by this library, e.g. a
    /// shared vertex stage.
    pub fn with_prelude(mut self, prelude: &'static str) -> Self {
        self.prelude = prelude;
        self
    }

    /// Compile a shader from a WGSL source string.
    pub fn load_from_source(
        &mut self,
        device: &wgpu::Device,
        name: &str,
        source: &str,
    ) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        self.insert(device, name, source, None)
    }

    /// Compile a shader from a file in the shader directory.
    pub fn load_from_file(
        &mut self,
        device: &wgpu::Device,
        name: &str,
        filename: &str,
    ) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        let source = self.read_source(filename)?;
        self.insert(device, name, &source, Some(filename.to_string()))
    }

    /// Recompile a file-backed shader from disk.
    pub fn reload(
        &mut self,
        device: &wgpu::Device,
        name: &str,
    ) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        let filename = self
            .modules
            .get(name)
            .ok_or_else(|| ShaderError::NotLoaded {
                name: name.to_string(),
            })?
            .filename
            .clone()
            .ok_or_else(|| ShaderError::NotFileBacked {
                name: name.to_string(),
            })?;

        info!("Reloading shader '{}'", name);
        let source = self.read_source(&filename)?;
        self.insert(device, name, &source, Some(filename))
    }

    /// Get a previously loaded shader by name. `None` if it was never loaded
    /// or its last compile failed.
    pub fn get(&self, name: &str) -> Option<Arc<wgpu::ShaderModule>> {
        self.modules.get(name).and_then(|s| s.module.clone())
    }

    /// How many times the named shader has been (re)compiled, failed attempts
    /// included; `None` if it was never loaded.
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.modules.get(name).map(|s| s.generation)
    }

    /// Number of loaded shaders.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the shader library is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn read_source(&self, filename: &str) -> Result<String, ShaderError> {
        let shader_dir = self.shader_dir.as_ref().ok_or(ShaderError::NoShaderDir)?;
        let path = shader_dir.join(filename);
        debug!("Reading shader source {:?}", path);
        if !path.exists() {
            return Err(ShaderError::FileNotFound { path });
        }
        Ok(std::fs::read_to_string(&path)?)
    }

    fn compose(&self, source: &str) -> String {
        format!("{}{}", self.prelude, source)
    }

    fn insert(
        &mut self,
        device: &wgpu::Device,
        name: &str,
        source: &str,
        filename: Option<String>,
    ) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        debug!("Compiling shader '{}'", name);
        let source = self.compose(source);
        let compiled = validated(device, name, || {
            device.create_shader_module(ShaderModuleDescriptor {
                label: Some(name),
                source: ShaderSource::Wgsl(source.into()),
            })
        })
        .map(Arc::new);

        let generation = self.modules.get(name).map_or(1, |s| s.generation + 1);
        match &compiled {
            Ok(_) if generation > 1 => {
                info!("Replaced shader '{}' (generation {})", name, generation)
            }
            Ok(_) => info!("Loaded shader '{}'", name),
            Err(err) => warn!("{}", err),
        }

        self.modules.insert(
            name.to_string(),
            LoadedShader {
                module: compiled.as_ref().ok().cloned(),
                filename,
                generation,
            },
        );
        compiled
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_device;

    const TRIVIAL_WGSL: &str = "@vertex fn vs() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";

    #[test]
    fn test_new_library_is_empty() {
        let library = ShaderLibrary::new();
        assert!(library.is_empty());
        assert_eq!(library.generation("missing"), None);
    }

    #[test]
    fn test_prelude_is_prepended() {
        let library = ShaderLibrary::new().with_prelude("// shared\n");
        assert_eq!(library.compose("fn f() {}"), "// shared\nfn f() {}");
        assert_eq!(ShaderLibrary::new().compose("x"), "x");
    }

    #[test]
    fn test_file_loading_requires_shader_dir() {
        let library = ShaderLibrary::new();
        assert!(matches!(
            library.read_source("x.wgsl"),
            Err(ShaderError::NoShaderDir)
        ));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let library = ShaderLibrary::new().with_shader_dir(dir.path());
        assert!(matches!(
            library.read_source("absent.wgsl"),
            Err(ShaderError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_generation_bumps_on_replace() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        library
            .load_from_source(&device, "trivial", TRIVIAL_WGSL)
            .unwrap();
        assert_eq!(library.generation("trivial"), Some(1));
        library
            .load_from_source(&device, "trivial", TRIVIAL_WGSL)
            .unwrap();
        assert_eq!(library.generation("trivial"), Some(2));
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn test_reload_from_file() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("trivial.wgsl"), TRIVIAL_WGSL).unwrap();
        let mut library = ShaderLibrary::new().with_shader_dir(dir.path());
        library
            .load_from_file(&device, "trivial", "trivial.wgsl")
            .unwrap();
        library.reload(&device, "trivial").unwrap();
        assert_eq!(library.generation("trivial"), Some(2));
    }

    #[test]
    fn test_invalid_source_is_reported_and_not_served() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        assert!(matches!(
            library.load_from_source(&device, "broken", "fn broken( {"),
            Err(ShaderError::Invalid { .. })
        ));
        assert!(library.get("broken").is_none());
        assert_eq!(library.generation("broken"), Some(1));
    }

    #[test]
    fn test_broken_reload_drops_module_until_fixed() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trivial.wgsl");
        std::fs::write(&path, TRIVIAL_WGSL).unwrap();
        let mut library = ShaderLibrary::new().with_shader_dir(dir.path());
        library
            .load_from_file(&device, "trivial", "trivial.wgsl")
            .unwrap();

        std::fs::write(&path, "@vertex fn vs() -> f32 {").unwrap();
        assert!(matches!(
            library.reload(&device, "trivial"),
            Err(ShaderError::Invalid { .. })
        ));
        assert!(library.get("trivial").is_none());

        std::fs::write(&path, TRIVIAL_WGSL).unwrap();
        library.reload(&device, "trivial").unwrap();
        assert!(library.get("trivial").is_some());
        assert_eq!(library.generation("trivial"), Some(3));
    }

    #[test]
    fn test_reload_of_source_shader_is_rejected() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        library
            .load_from_source(&device, "inline", TRIVIAL_WGSL)
            .unwrap();
        assert!(matches!(
            library.reload(&device, "inline"),
            Err(ShaderError::NotFileBacked { .. })
        ));
    }
}

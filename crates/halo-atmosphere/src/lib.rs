//! Multi-body atmospheric scattering as a post-process chain.
//!
//! Each registered body gets one single-scattering pass over the rendered
//! scene. Passes run farthest body first, each reading the previous pass's
//! output, so nearer atmospheres composite over farther ones. The per-pixel
//! math lives in [`scatter`] and is mirrored by `atmosphere.wgsl`; frame
//! orchestration lives in [`compositor`] and runs against either the wgpu
//! backend or the CPU reference backend.

pub mod body;
pub mod coefficients;
pub mod compositor;
pub mod depth;
pub mod gpu_backend;
pub mod scatter;
pub mod software;

pub use body::{AtmosphereBody, BodyId, PlanetRegistry, RegistryError};
pub use coefficients::{REFERENCE_WAVELENGTH, ScatterCoefficientModel, ScatterCoefficients};
pub use compositor::{
    BodyPass, ChainLink, ChainTarget, FrameBackend, FrameCompositor, FrameError, FrameInputs,
    FrameOutcome, FrameReport, MaterialState, PingPong, sort_back_to_front,
};
pub use depth::{BACKGROUND_DEPTH, CameraState, DepthToken, linearize_depth};
pub use gpu_backend::{ATMOSPHERE_SHADER_SOURCE, BodyUniform, GpuBackend, GpuScene};
pub use scatter::{SAMPLE_COUNT, density, in_scatter, optical_depth, ray_sphere, shade_pixel};
pub use software::{SoftwareBackend, SoftwareScene, encode_rgba8};

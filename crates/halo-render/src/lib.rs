//! Headless wgpu plumbing for post-process chains: device setup, offscreen
//! targets, scoped target binding, render passes, shader loading and readback.

pub mod binding;
pub mod camera;
pub mod depth;
pub mod fullscreen;
pub mod gpu;
pub mod pass;
pub mod readback;
pub mod shader;
pub mod target;

pub use binding::{ActiveTarget, RenderTargetId, TargetBinding};
pub use camera::Camera;
pub use depth::DepthTarget;
pub use fullscreen::{
    BlitPipeline, FULLSCREEN_VERTEX_WGSL, create_fullscreen_pipeline, unfiltered_texture_entry,
};
pub use gpu::{RenderContext, RenderContextError, init_headless_context_blocking};
pub use pass::{AttachmentLoad, CLEAR_BLACK, FrameEncoder, RenderPassBuilder};
pub use readback::{ReadbackError, read_rgba8};
pub use shader::{ShaderError, ShaderLibrary, validated};
pub use target::{ColorTarget, HDR_FORMAT, TargetError, Viewport, check_extent};

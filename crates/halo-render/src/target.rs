//! Offscreen color render targets and viewport sizing.

/// HDR format for intermediate color targets.
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Errors raised while allocating render targets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// Width or height is zero.
    #[error("render target dimensions must be non-zero, got {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },

    /// The device cannot allocate a texture this large.
    #[error("render target {width}x{height} exceeds the device limit of {max}")]
    TooLarge { width: u32, height: u32, max: u32 },
}

/// Pixel size of the area being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width / height.
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Validate a target extent against the device limits before allocating it.
pub fn check_extent(device: &wgpu::Device, width: u32, height: u32) -> Result<(), TargetError> {
    if width == 0 || height == 0 {
        return Err(TargetError::ZeroDimensions { width, height });
    }
    let max = device.limits().max_texture_dimension_2d;
    if width > max || height > max {
        return Err(TargetError::TooLarge { width, height, max });
    }
    Ok(())
}

/// A sampleable color render target.
pub struct ColorTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    viewport: Viewport,
}

impl ColorTarget {
    /// Allocate a color target. `extra_usage` is OR-ed onto
    /// `RENDER_ATTACHMENT | TEXTURE_BINDING` (e.g. `COPY_SRC` for readback).
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        format: wgpu::TextureFormat,
        viewport: Viewport,
        extra_usage: wgpu::TextureUsages,
    ) -> Result<Self, TargetError> {
        check_extent(device, viewport.width, viewport.height)?;

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: viewport.width,
                height: viewport.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | extra_usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        log::trace!(
            "Allocated color target '{label}' {}x{} {format:?}",
            viewport.width,
            viewport.height
        );

        Ok(Self {
            texture,
            view,
            format,
            viewport,
        })
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Release the GPU memory now rather than when the last handle drops.
    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

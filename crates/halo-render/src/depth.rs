//! Depth-only render target shared by every atmosphere pass of a frame.
//!
//! Uses the standard wgpu depth convention: the near plane stores 0.0 and the
//! far plane 1.0, so a cleared texel (1.0) reads back as "no geometry".

use crate::target::{TargetError, check_extent};

/// Color-less render target with an attached, sampleable depth texture.
pub struct DepthTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl DepthTarget {
    /// 32-bit float depth, sampled without filtering.
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Clear value: the far plane.
    pub const CLEAR_VALUE: f32 = 1.0;

    /// Closer fragments have smaller depth.
    pub const COMPARE_FUNCTION: wgpu::CompareFunction = wgpu::CompareFunction::LessEqual;

    /// Create a depth target with the specified dimensions.
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Result<Self, TargetError> {
        check_extent(device, width, height)?;

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("scene-depth-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }

    /// Depth state for pipelines drawing into this target. Scene color passes
    /// run against the captured depth with `depth_write_enabled = false`.
    pub fn depth_stencil_state(depth_write_enabled: bool) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format: Self::FORMAT,
            depth_write_enabled,
            depth_compare: Self::COMPARE_FUNCTION,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }

    /// Layout entry for reading the depth texture texel-exact with
    /// `textureLoad` (no sampler, so no interpolation across silhouettes).
    ///
    /// Bound as unfilterable `texture_2d<f32>` rather than `texture_depth_2d`:
    /// GLSL targets cannot `textureLoad` a depth texture. Read `.r` in WGSL.
    pub fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
        crate::fullscreen::unfiltered_texture_entry(binding)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Release the GPU memory now rather than when the last handle drops.
    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_device;

    #[test]
    fn test_depth_texture_format_is_depth32float() {
        assert_eq!(DepthTarget::FORMAT, wgpu::TextureFormat::Depth32Float);
    }

    #[test]
    fn test_clear_value_is_far_plane() {
        assert_eq!(DepthTarget::CLEAR_VALUE, 1.0);
    }

    #[test]
    fn test_depth_compare_function_is_less_equal() {
        assert_eq!(
            DepthTarget::COMPARE_FUNCTION,
            wgpu::CompareFunction::LessEqual
        );
    }

    #[test]
    fn test_stencil_state_uses_target_format() {
        let state = DepthTarget::depth_stencil_state(false);
        assert_eq!(state.format, DepthTarget::FORMAT);
        assert!(!state.depth_write_enabled);
        assert_eq!(state.depth_compare, DepthTarget::COMPARE_FUNCTION);
    }

    #[test]
    fn test_depth_binds_as_unfilterable_float() {
        let entry = DepthTarget::texture_entry(1);
        assert_eq!(entry.binding, 1);
        assert!(matches!(
            entry.ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            }
        ));
    }

    #[test]
    fn test_depth_target_dimensions() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let depth = DepthTarget::new(&device, 320, 200).unwrap();
        assert_eq!(depth.width(), 320);
        assert_eq!(depth.height(), 200);
    }

    #[test]
    fn test_oversized_depth_target_is_rejected() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let too_wide = device.limits().max_texture_dimension_2d + 1;
        assert!(matches!(
            DepthTarget::new(&device, too_wide, 4),
            Err(TargetError::TooLarge { .. })
        ));
    }
}

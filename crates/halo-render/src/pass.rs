//! Render pass abstraction for reducing wgpu boilerplate.
//!
//! Provides [`RenderPassBuilder`] for declarative render pass configuration
//! and [`FrameEncoder`] for the per-frame command encoding lifecycle.

/// Opaque black, presented when a frame is skipped.
pub const CLEAR_BLACK: wgpu::Color = wgpu::Color {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 1.0,
};

/// What happens to an attachment's previous contents when the pass begins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttachmentLoad<T> {
    Clear(T),
    Load,
}

impl<T> AttachmentLoad<T> {
    fn to_wgpu(self) -> wgpu::LoadOp<T> {
        match self {
            Self::Clear(value) => wgpu::LoadOp::Clear(value),
            Self::Load => wgpu::LoadOp::Load,
        }
    }
}

/// Builder for configuring render pass descriptors with a fluent API.
#[derive(Debug, Clone)]
pub struct RenderPassBuilder {
    color_load: AttachmentLoad<wgpu::Color>,
    depth_load: Option<AttachmentLoad<f32>>,
    label: Option<&'static str>,
}

impl Default for RenderPassBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPassBuilder {
    /// A pass clearing its color attachment to black, without depth.
    pub fn new() -> Self {
        Self {
            color_load: AttachmentLoad::Clear(CLEAR_BLACK),
            depth_load: None,
            label: None,
        }
    }

    /// Set the clear color for the color attachment.
    pub fn clear_color(mut self, color: wgpu::Color) -> Self {
        self.color_load = AttachmentLoad::Clear(color);
        self
    }

    /// Attach depth, cleared to `clear_value`.
    pub fn depth_clear(mut self, clear_value: f32) -> Self {
        self.depth_load = Some(AttachmentLoad::Clear(clear_value));
        self
    }

    /// Attach depth, keeping its existing contents.
    pub fn depth_load(mut self) -> Self {
        self.depth_load = Some(AttachmentLoad::Load);
        self
    }

    /// Set debug label for the render pass.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    /// Begin the pass. `color_view` may be `None` for depth-only passes;
    /// `depth_view` is ignored unless a depth load op was configured.
    pub fn begin<'encoder>(
        &self,
        encoder: &'encoder mut wgpu::CommandEncoder,
        color_view: Option<&'encoder wgpu::TextureView>,
        depth_view: Option<&'encoder wgpu::TextureView>,
    ) -> wgpu::RenderPass<'encoder> {
        let color_attachment = color_view.map(|view| wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: self.color_load.to_wgpu(),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        });

        let depth_stencil_attachment =
            self.depth_load
                .zip(depth_view)
                .map(|(load, view)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: load.to_wgpu(),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

        let color_attachments = [color_attachment];
        let color_attachments: &[Option<wgpu::RenderPassColorAttachment<'_>>] =
            if color_attachments[0].is_some() {
                &color_attachments
            } else {
                &[]
            };

        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: self.label,
            color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        })
    }
}

/// Owns one frame's command encoder until it is submitted.
pub struct FrameEncoder {
    encoder: Option<wgpu::CommandEncoder>,
}

impl FrameEncoder {
    pub fn new(device: &wgpu::Device) -> Self {
        let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame-encoder"),
        });
        Self {
            encoder: Some(encoder),
        }
    }

    /// The encoder passes are recorded into.
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        // `encoder` is only taken by `submit`, which consumes self.
        self.encoder
            .as_mut()
            .unwrap_or_else(|| unreachable!("FrameEncoder used after submit"))
    }

    /// Submit the recorded commands. Consumes self to prevent double-submission.
    pub fn submit(mut self, queue: &wgpu::Queue) -> Option<wgpu::SubmissionIndex> {
        self.encoder
            .take()
            .map(|encoder| queue.submit([encoder.finish()]))
    }
}

impl Drop for FrameEncoder {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            log::warn!("FrameEncoder dropped without submit() - frame commands discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_clear_color() {
        let builder = RenderPassBuilder::new().clear_color(wgpu::Color::RED);
        assert_eq!(builder.color_load, AttachmentLoad::Clear(wgpu::Color::RED));
    }

    #[test]
    fn test_default_clears_to_black_without_depth() {
        let builder = RenderPassBuilder::new();
        assert_eq!(builder.color_load, AttachmentLoad::Clear(CLEAR_BLACK));
        assert!(builder.depth_load.is_none());
    }

    #[test]
    fn test_depth_ops() {
        assert_eq!(
            RenderPassBuilder::new().depth_clear(1.0).depth_load,
            Some(AttachmentLoad::Clear(1.0))
        );
        assert_eq!(
            RenderPassBuilder::new().depth_load().depth_load,
            Some(AttachmentLoad::Load)
        );
        assert!(matches!(
            AttachmentLoad::<f32>::Load.to_wgpu(),
            wgpu::LoadOp::Load
        ));
    }

    #[test]
    fn test_label_is_stored() {
        let builder = RenderPassBuilder::new().label("my-pass");
        assert_eq!(builder.label, Some("my-pass"));
    }
}

//! Copying rendered 8-bit color targets back to the CPU.

use crate::target::Viewport;

const BYTES_PER_PIXEL: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error("unsupported readback format {0:?}; expected an 8-bit RGBA or BGRA format")]
    UnsupportedFormat(wgpu::TextureFormat),

    #[error("readback buffer mapping failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("readback channel closed before the buffer was mapped")]
    ChannelClosed,

    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
}

/// Row pitch of a texture copy, rounded up to the copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn is_bgra(format: wgpu::TextureFormat) -> bool {
    matches!(
        format,
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
    )
}

fn check_format(format: wgpu::TextureFormat) -> Result<(), ReadbackError> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm
        | wgpu::TextureFormat::Rgba8UnormSrgb
        | wgpu::TextureFormat::Bgra8Unorm
        | wgpu::TextureFormat::Bgra8UnormSrgb => Ok(()),
        other => Err(ReadbackError::UnsupportedFormat(other)),
    }
}

/// Drop row padding and swizzle BGRA to RGBA, producing tightly packed RGBA8.
pub fn unpad_rows(mapped: &[u8], viewport: Viewport, padded_row: u32, bgra: bool) -> Vec<u8> {
    let row_bytes = (viewport.width * BYTES_PER_PIXEL) as usize;
    let mut pixels = Vec::with_capacity(row_bytes * viewport.height as usize);
    for row in 0..viewport.height {
        let start = (row * padded_row) as usize;
        let row_data = &mapped[start..start + row_bytes];
        if bgra {
            for chunk in row_data.chunks_exact(4) {
                pixels.extend_from_slice(&[chunk[2], chunk[1], chunk[0], chunk[3]]);
            }
        } else {
            pixels.extend_from_slice(row_data);
        }
    }
    pixels
}

/// Copy `texture` into a mappable buffer, wait for the GPU, and return its
/// pixels as tightly packed RGBA8 rows, top row first.
pub fn read_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    viewport: Viewport,
) -> Result<Vec<u8>, ReadbackError> {
    let format = texture.format();
    check_format(format)?;

    let padded_row = padded_bytes_per_row(viewport.width);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback-buffer"),
        size: u64::from(padded_row) * u64::from(viewport.height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback-encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(viewport.height),
            },
        },
        wgpu::Extent3d {
            width: viewport.width,
            height: viewport.height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit([encoder.finish()]);

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::PollType::Wait {
        submission_index: None,
        timeout: None,
    })?;
    rx.recv().map_err(|_| ReadbackError::ChannelClosed)??;

    let pixels = {
        let mapped = slice.get_mapped_range();
        unpad_rows(&mapped, viewport, padded_row, is_bgra(format))
    };
    buffer.unmap();
    Ok(pixels)
}

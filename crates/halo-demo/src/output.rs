//! PNG output of the presented frame.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use glam::Vec3;
use halo_atmosphere::encode_rgba8;

use crate::DemoError;

/// A full frame of `color`, used when a frame is skipped.
pub fn clear_image(width: u32, height: u32, color: Vec3) -> Vec<u8> {
    encode_rgba8(&vec![color; width as usize * height as usize])
}

/// Encode tightly packed RGBA8 rows as a PNG.
pub fn encode_png<W: std::io::Write>(
    writer: W,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<(), DemoError> {
    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(pixels)?;
    writer.finish()?;
    Ok(())
}

pub fn write_png(path: &Path, width: u32, height: u32, pixels: &[u8]) -> Result<(), DemoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    encode_png(BufWriter::new(file), width, height, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_image_size_and_color() {
        let image = clear_image(3, 2, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(image.len(), 3 * 2 * 4);
        assert_eq!(&image[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_png_signature_written() {
        let mut buffer = Vec::new();
        encode_png(&mut buffer, 2, 2, &clear_image(2, 2, Vec3::ONE)).unwrap();
        assert_eq!(&buffer[..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);
    }

    #[test]
    fn test_wrong_length_is_an_error() {
        let mut buffer = Vec::new();
        assert!(encode_png(&mut buffer, 4, 4, &[0; 8]).is_err());
    }

    #[test]
    fn test_write_png_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames").join("out.png");
        write_png(&path, 1, 1, &[10, 20, 30, 255]).unwrap();
        assert!(path.exists());
    }
}

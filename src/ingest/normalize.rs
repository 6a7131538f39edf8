//! Pixel format conversion into packed RGB8.

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
    Mjpeg,
}

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let plane = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Rgb24 => {
            expect_len(pixels, plane * 3, "RGB")?;
            Ok(pixels.to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, plane),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width as usize, height as usize),
        PixelFormat::Mjpeg => {
            let (rgb, w, h) = decode_jpeg(pixels)?;
            if (w, h) != (width, height) {
                return Err(anyhow!(
                    "MJPEG frame is {}x{}, device reported {}x{}",
                    w,
                    h,
                    width,
                    height
                ));
            }
            Ok(rgb)
        }
    }
}

/// Decode a JPEG into packed RGB8 plus its dimensions.
pub(crate) fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    Ok((image.into_rgb8().into_raw(), width, height))
}

fn expect_len(pixels: &[u8], expected: usize, format: &str) -> Result<()> {
    if pixels.len() != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

fn yuyv_to_rgb(pixels: &[u8], plane: usize) -> Result<Vec<u8>> {
    expect_len(pixels, plane * 2, "YUYV")?;
    let mut rgb = Vec::with_capacity(plane * 3);
    for chunk in pixels.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            push_yuv(&mut rgb, y as f32, u, v);
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>> {
    let y_plane = w * h;
    expect_len(pixels, y_plane + y_plane / 2, "NV12")?;
    let mut rgb = Vec::with_capacity(y_plane * 3);
    for j in 0..h {
        for i in 0..w {
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            push_yuv(&mut rgb, pixels[j * w + i] as f32, u, v);
        }
    }
    Ok(rgb)
}

fn push_yuv(rgb: &mut Vec<u8>, y: f32, u: f32, v: f32) {
    rgb.push(clamp_to_u8(y + 1.402 * v));
    rgb.push(clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v));
    rgb.push(clamp_to_u8(y + 1.772 * u));
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        assert_eq!(normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?, vec![128u8; 12]);

        let yuyv = vec![128u8; 2 * 2 * 2];
        assert_eq!(normalize_to_rgb(&yuyv, 2, 2, PixelFormat::Yuyv)?, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() {
        assert!(normalize_to_rgb(&[1u8; 9], 1, 3, PixelFormat::Rgb24).is_ok());
        assert!(normalize_to_rgb(&[1u8; 8], 1, 3, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn maps_known_fourccs() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"H264"), None);
    }
}

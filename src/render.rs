//! Frame overlay and JPEG encoding.
//!
//! Overlays are drawn onto a copy of the frame: verdict boxes (green normal,
//! red alert), a person-count bar in the top-left corner (one block per
//! person) and a yellow strip along the top edge on frames that raised an
//! alert.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::classify::{Verdict, VerdictState};
use crate::frame::Frame;

const NORMAL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const MARKER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const BAR_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const COUNT_BLOCK: i32 = 8;
const MAX_COUNT_BLOCKS: usize = 20;

pub struct Overlay<'a> {
    pub verdicts: &'a [Verdict],
    pub person_count: usize,
    pub alert_raised: bool,
}

/// Draw the overlay onto a copy of `frame`.
pub fn annotate(frame: &Frame, overlay: &Overlay<'_>) -> Result<RgbImage> {
    let mut image = frame.to_image()?;

    for verdict in overlay.verdicts {
        let color = match verdict.state {
            VerdictState::Normal => NORMAL_COLOR,
            VerdictState::Alert => ALERT_COLOR,
        };
        let (left, top, right, bottom) = verdict.bbox.corners();
        for inset in 0..BOX_THICKNESS {
            draw_rectangle(
                &mut image,
                left.round() as i32 + inset,
                top.round() as i32 + inset,
                right.round() as i32 - inset,
                bottom.round() as i32 - inset,
                color,
            );
        }
    }

    let blocks = overlay.person_count.min(MAX_COUNT_BLOCKS) as i32;
    if blocks > 0 {
        let bar_right = 4 + blocks * (COUNT_BLOCK + 2) + 2;
        fill_rect(&mut image, 4, 4, bar_right, 4 + COUNT_BLOCK + 4, BAR_BACKGROUND);
        for n in 0..blocks {
            let x = 6 + n * (COUNT_BLOCK + 2);
            fill_rect(&mut image, x, 6, x + COUNT_BLOCK, 6 + COUNT_BLOCK, NORMAL_COLOR);
        }
    }

    if overlay.alert_raised {
        let width = image.width() as i32;
        fill_rect(&mut image, 0, 0, width, 2, MARKER_COLOR);
    }

    Ok(image)
}

/// Encode an image as baseline JPEG. Quality is clamped to 1..=100.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 || right < left || bottom < top {
        return;
    }
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }
    let l = left.clamp(0, width - 1);
    let r = right.clamp(0, width - 1);
    let t = top.clamp(0, height - 1);
    let b = bottom.clamp(0, height - 1);

    for x in l..=r {
        if top >= 0 {
            image.put_pixel(x as u32, t as u32, color);
        }
        if bottom < height {
            image.put_pixel(x as u32, b as u32, color);
        }
    }
    for y in t..=b {
        if left >= 0 {
            image.put_pixel(l as u32, y as u32, color);
        }
        if right < width {
            image.put_pixel(r as u32, y as u32, color);
        }
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let l = left.max(0);
    let t = top.max(0);
    let r = right.min(width);
    let b = bottom.min(height);
    for y in t..b {
        for x in l..r {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

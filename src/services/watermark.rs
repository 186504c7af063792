//! Text watermark compositing for processed listing photos.
//!
//! The overlay is rasterised from the `font8x8` bitmap font, scaled so the
//! glyph height is 4% of the image width. Its left edge sits at 70% of the
//! width and its baseline at 95% of the height. Output is always JPEG.

use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";

const GLYPH_SIZE: u32 = 8;
const FONT_SIZE_RATIO: f32 = 0.04;
const ANCHOR_X_RATIO: f32 = 0.70;
const ANCHOR_Y_RATIO: f32 = 0.95;
const FILL_OPACITY: f32 = 0.65;
const FILL: [u8; 3] = [255, 255, 255];

#[derive(Debug, Clone)]
pub struct WatermarkOptions {
    pub label: String,
    pub jpeg_quality: u8,
}

impl WatermarkOptions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("unreadable image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("failed to encode output: {0}")]
    Encode(String),
}

/// Composite `options.label` onto the image and re-encode as JPEG.
///
/// Deterministic: the same bytes and label always produce the same output.
pub fn watermark(image_bytes: &[u8], options: &WatermarkOptions) -> Result<Vec<u8>, WatermarkError> {
    let decoded = image::load_from_memory(image_bytes)?;
    let mut canvas = decoded.to_rgb8();

    draw_label(&mut canvas, &options.label);

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, options.jpeg_quality.clamp(1, 100));
    DynamicImage::ImageRgb8(canvas)
        .write_with_encoder(encoder)
        .map_err(|e| WatermarkError::Encode(e.to_string()))?;
    Ok(out)
}

/// Pixel size of one font cell for an image `width` pixels wide.
pub fn glyph_scale(width: u32) -> u32 {
    let font_size = width as f32 * FONT_SIZE_RATIO;
    ((font_size / GLYPH_SIZE as f32).round() as u32).max(1)
}

/// Top-left corner of the text block for the given dimensions.
pub fn text_origin(width: u32, height: u32) -> (u32, u32) {
    let scale = glyph_scale(width);
    let x = (width as f32 * ANCHOR_X_RATIO).round() as u32;
    let baseline = (height as f32 * ANCHOR_Y_RATIO).round() as u32;
    (x, baseline.saturating_sub(GLYPH_SIZE * scale))
}

fn glyph(c: char) -> Option<[u8; 8]> {
    BASIC_FONTS.get(c).or_else(|| LATIN_FONTS.get(c))
}

fn draw_label(canvas: &mut RgbImage, label: &str) {
    let (width, height) = canvas.dimensions();
    let scale = glyph_scale(width);
    let (origin_x, origin_y) = text_origin(width, height);
    let advance = GLYPH_SIZE * scale;

    for (index, c) in label.chars().enumerate() {
        let cell_x = origin_x.saturating_add((index as u32).saturating_mul(advance));
        if cell_x >= width {
            break;
        }
        let Some(rows) = glyph(c) else {
            continue;
        };

        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let x0 = cell_x + col * scale;
                let y0 = origin_y + row as u32 * scale;
                fill_block(canvas, x0, y0, scale);
            }
        }
    }
}

fn fill_block(canvas: &mut RgbImage, x0: u32, y0: u32, size: u32) {
    let (width, height) = canvas.dimensions();
    for y in y0..(y0 + size).min(height) {
        for x in x0..(x0 + size).min(width) {
            let pixel = canvas.get_pixel_mut(x, y);
            *pixel = blend(*pixel);
        }
    }
}

fn blend(pixel: Rgb<u8>) -> Rgb<u8> {
    let mut out = pixel;
    for (channel, fill) in out.0.iter_mut().zip(FILL) {
        let mixed = *channel as f32 * (1.0 - FILL_OPACITY) + fill as f32 * FILL_OPACITY;
        *channel = mixed.round().clamp(0.0, 255.0) as u8;
    }
    out
}

//! # Compositor Module
//!
//! Pads a picture with a solid background so the result has an exact aspect ratio.
//!
//! ## Algorithm
//!
//! - The source is "vertical" when its own aspect ratio is below the target one. The binding
//!   dimension is then its height, otherwise its width.
//! - The binding dimension times the margin ratio gives the matching canvas side; the other side
//!   follows from the target aspect ratio.
//! - The source is pasted centered. With a margin ratio below 1 the offset goes negative and the
//!   source is clipped to the canvas.
//!
//! Everything here is pure: no shared state, safe to call from several threads at once.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ColorType, Rgb, RgbImage};
use log::debug;

use crate::errors::ComposeError;

/// Default JPEG quality for delivered pictures
pub const DEFAULT_JPEG_QUALITY: u8 = 100;

/// White, the background the bot uses unless configured otherwise
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Largest canvas side a baseline JPEG can carry
pub const MAX_CANVAS_SIDE: u32 = 65_535;

/// Largest RGB canvas buffer we allocate, the same budget `image` allows a decoder
pub const MAX_CANVAS_BYTES: u64 = 512 * 1024 * 1024;

/// Geometry of a bordered picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasLayout {
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Horizontal paste position of the source, negative when the source is clipped
    pub offset_x: i64,
    /// Vertical paste position of the source, negative when the source is clipped
    pub offset_y: i64,
    /// Whether the source height was the binding dimension
    pub vertical: bool,
}

/// Compute the canvas for a `src_width` x `src_height` source
///
/// # Errors
///
/// `InvalidParameter` when `aspect_ratio` is not strictly positive, `margin_ratio` is negative,
/// either value is not finite, the source is empty, or the canvas would exceed
/// [`MAX_CANVAS_SIDE`] on a side or [`MAX_CANVAS_BYTES`] in total.
pub fn plan_canvas(
    src_width: u32,
    src_height: u32,
    aspect_ratio: f64,
    margin_ratio: f64,
) -> Result<CanvasLayout, ComposeError> {
    validate_parameters(aspect_ratio, margin_ratio)?;
    if src_width == 0 || src_height == 0 {
        return Err(ComposeError::InvalidParameter(format!(
            "source has no pixels ({src_width}x{src_height})"
        )));
    }

    let source_aspect = f64::from(src_width) / f64::from(src_height);
    let vertical = source_aspect < aspect_ratio;

    let binding = if vertical { src_height } else { src_width };
    let margin_side = (f64::from(binding) * margin_ratio).round();

    let (width, height) = if vertical {
        ((margin_side * aspect_ratio).round(), margin_side)
    } else {
        (margin_side, (margin_side / aspect_ratio).round())
    };

    // A zero-sized canvas cannot be encoded
    let canvas_width = to_side(width)?;
    let canvas_height = to_side(height)?;

    let canvas_bytes = u64::from(canvas_width) * u64::from(canvas_height) * 3;
    if canvas_bytes > MAX_CANVAS_BYTES {
        return Err(ComposeError::InvalidParameter(format!(
            "canvas {canvas_width}x{canvas_height} needs {canvas_bytes} bytes, over {MAX_CANVAS_BYTES}"
        )));
    }

    Ok(CanvasLayout {
        canvas_width,
        canvas_height,
        offset_x: (i64::from(canvas_width) - i64::from(src_width)).div_euclid(2),
        offset_y: (i64::from(canvas_height) - i64::from(src_height)).div_euclid(2),
        vertical,
    })
}

fn validate_parameters(aspect_ratio: f64, margin_ratio: f64) -> Result<(), ComposeError> {
    if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
        return Err(ComposeError::InvalidParameter(format!(
            "aspect ratio must be positive, got {aspect_ratio}"
        )));
    }
    if !margin_ratio.is_finite() || margin_ratio < 0.0 {
        return Err(ComposeError::InvalidParameter(format!(
            "margin ratio must not be negative, got {margin_ratio}"
        )));
    }
    Ok(())
}

fn to_side(value: f64) -> Result<u32, ComposeError> {
    if value > f64::from(MAX_CANVAS_SIDE) {
        return Err(ComposeError::InvalidParameter(format!(
            "canvas side {value} exceeds {MAX_CANVAS_SIDE} pixels"
        )));
    }
    Ok((value as u32).max(1))
}

/// Paste `source` centered on a solid `background` canvas described by `layout`
pub fn border_image(source: &RgbImage, layout: &CanvasLayout, background: Rgb<u8>) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(layout.canvas_width, layout.canvas_height, background);
    imageops::replace(&mut canvas, source, layout.offset_x, layout.offset_y);
    canvas
}

/// Encode an RGB canvas as JPEG (no alpha channel)
pub fn encode_jpeg(canvas: &RgbImage, quality: u8) -> Result<Vec<u8>, ComposeError> {
    let mut bytes = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
        encoder
            .encode(
                canvas.as_raw(),
                canvas.width(),
                canvas.height(),
                ColorType::Rgb8,
            )
            .map_err(|e| ComposeError::Encode(e.to_string()))?;
    }
    Ok(bytes)
}

/// Border `raw_image` to `aspect_ratio` with `margin_ratio` and return JPEG bytes
pub fn compose(
    raw_image: &[u8],
    aspect_ratio: f64,
    margin_ratio: f64,
    background: Rgb<u8>,
) -> Result<Vec<u8>, ComposeError> {
    compose_with_quality(
        raw_image,
        aspect_ratio,
        margin_ratio,
        background,
        DEFAULT_JPEG_QUALITY,
    )
}

/// Same as [`compose`] with an explicit JPEG quality
pub fn compose_with_quality(
    raw_image: &[u8],
    aspect_ratio: f64,
    margin_ratio: f64,
    background: Rgb<u8>,
    quality: u8,
) -> Result<Vec<u8>, ComposeError> {
    validate_parameters(aspect_ratio, margin_ratio)?;

    let source = image::load_from_memory(raw_image)
        .map_err(|e| ComposeError::Decode(e.to_string()))?
        .to_rgb8();

    let layout = plan_canvas(source.width(), source.height(), aspect_ratio, margin_ratio)?;
    debug!(
        "Bordering {}x{} picture onto {}x{} canvas (vertical: {})",
        source.width(),
        source.height(),
        layout.canvas_width,
        layout.canvas_height,
        layout.vertical
    );

    let canvas = border_image(&source, &layout, background);
    encode_jpeg(&canvas, quality)
}

use ab_glyph::{point, Font, FontArc, Glyph, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::{GenericImageView, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::models::geometry::{scaled_height, watermark_target_width, TextAnchor};
use crate::models::options::{ImageWatermark, TextWatermark};

/// Fonts tried when no font path is configured.
const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Decode, composite and encode watermarks. Output is always PNG.
///
/// Implementations are CPU-bound and synchronous; callers run them on a
/// blocking thread.
pub trait ImageProcessor: Send + Sync {
    fn apply_text(&self, base: &[u8], mark: &TextWatermark) -> Result<Vec<u8>, ImagingError>;

    fn apply_image(
        &self,
        base: &[u8],
        watermark: &[u8],
        mark: &ImageWatermark,
    ) -> Result<Vec<u8>, ImagingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    #[error("Failed to decode base image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to process watermark image: {0}")]
    Watermark(#[source] image::ImageError),

    #[error("Failed to encode output image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Unable to determine image dimensions")]
    EmptyImage,

    #[error("No font available for text watermarks")]
    FontUnavailable,

    #[error("Failed to load font {path}: {reason}")]
    Font { path: PathBuf, reason: String },
}

/// [`ImageProcessor`] backed by the `image` crate, with `ab_glyph` for text.
pub struct RasterProcessor {
    font: Option<FontArc>,
}

impl RasterProcessor {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// Load the configured font, or the first fallback font found on disk.
    ///
    /// An explicitly configured font that fails to load is an error; a missing
    /// fallback only disables text watermarks.
    pub fn from_font_path(path: Option<&Path>) -> Result<Self, ImagingError> {
        if let Some(path) = path {
            return Ok(Self::new(Some(load_font(path)?)));
        }

        let font = FALLBACK_FONTS
            .iter()
            .map(Path::new)
            .filter(|p| p.exists())
            .find_map(|p| load_font(p).ok());
        if font.is_none() {
            tracing::warn!("No font found; text watermark jobs will fail until FONT_PATH is set");
        }
        Ok(Self::new(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }
}

fn load_font(path: &Path) -> Result<FontArc, ImagingError> {
    let data = std::fs::read(path).map_err(|e| ImagingError::Font {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    FontArc::try_from_vec(data).map_err(|e| ImagingError::Font {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn decode_base(bytes: &[u8]) -> Result<RgbaImage, ImagingError> {
    let img = image::load_from_memory(bytes).map_err(ImagingError::Decode)?;
    if img.width() == 0 || img.height() == 0 {
        return Err(ImagingError::EmptyImage);
    }
    Ok(img.to_rgba8())
}

fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(ImagingError::Encode)?;
    Ok(buf.into_inner())
}

/// Multiply every pixel's alpha by a flat mask of `opacity`.
fn apply_opacity(img: &mut RgbaImage, opacity: f32) {
    let mask = (255.0 * opacity).floor() as u32;
    for pixel in img.pixels_mut() {
        pixel.0[3] = ((pixel.0[3] as u32 * mask) / 255) as u8;
    }
}

/// Blend white at `alpha` over one pixel.
fn blend_white(img: &mut RgbaImage, x: i64, y: i64, alpha: f32) {
    if x < 0 || y < 0 || x >= i64::from(img.width()) || y >= i64::from(img.height()) {
        return;
    }
    let a = alpha.clamp(0.0, 1.0);
    let pixel = img.get_pixel_mut(x as u32, y as u32);
    for channel in &mut pixel.0[..3] {
        *channel = (*channel as f32 * (1.0 - a) + 255.0 * a).round() as u8;
    }
    let dst_alpha = pixel.0[3] as f32;
    pixel.0[3] = (dst_alpha + (255.0 - dst_alpha) * a).round() as u8;
}

/// Lay out `text` on a single line starting at x = 0; returns glyphs and total advance.
fn layout_line(font: &FontArc, scale: PxScale, text: &str) -> (Vec<Glyph>, f32) {
    let scaled = font.as_scaled(scale);
    let mut glyphs = Vec::with_capacity(text.len());
    let mut caret = 0.0f32;
    let mut previous = None;

    for c in text.chars().filter(|c| !c.is_control()) {
        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            caret += scaled.kern(prev, id);
        }
        glyphs.push(id.with_scale_and_position(scale, point(caret, 0.0)));
        caret += scaled.h_advance(id);
        previous = Some(id);
    }
    (glyphs, caret)
}

impl ImageProcessor for RasterProcessor {
    fn apply_text(&self, base: &[u8], mark: &TextWatermark) -> Result<Vec<u8>, ImagingError> {
        let font = self.font.as_ref().ok_or(ImagingError::FontUnavailable)?;
        let mut canvas = decode_base(base)?;
        let (width, height) = canvas.dimensions();

        let size = mark.font_size as f32;
        let scale = PxScale::from(size);
        let (glyphs, text_width) = layout_line(font, scale, &mark.text);

        let anchor = mark.gravity.anchor();
        let (ax, ay) = anchor.to_pixels(width, height);
        let left = match anchor.text_anchor {
            TextAnchor::Start => ax,
            TextAnchor::Middle => ax - text_width / 2.0,
            TextAnchor::End => ax - text_width,
        };
        // The anchor y sits 0.3em above the baseline.
        let baseline = ay + 0.3 * size;

        for mut glyph in glyphs {
            glyph.position = point(glyph.position.x + left, baseline);
            let Some(outlined) = font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let x = bounds.min.x as i64 + i64::from(gx);
                let y = bounds.min.y as i64 + i64::from(gy);
                blend_white(&mut canvas, x, y, coverage * mark.opacity);
            });
        }

        encode_png(&canvas)
    }

    fn apply_image(
        &self,
        base: &[u8],
        watermark: &[u8],
        mark: &ImageWatermark,
    ) -> Result<Vec<u8>, ImagingError> {
        let mut canvas = decode_base(base)?;
        let logo = image::load_from_memory(watermark).map_err(ImagingError::Watermark)?;
        let native = logo.dimensions();
        if native.0 == 0 || native.1 == 0 {
            return Err(ImagingError::EmptyImage);
        }

        let target_width = watermark_target_width(mark.width, canvas.width(), native.0);
        let mut overlay = if target_width == native.0 {
            logo.to_rgba8()
        } else {
            let target_height = scaled_height(native, target_width);
            imageops::resize(&logo.to_rgba8(), target_width, target_height, FilterType::Lanczos3)
        };
        apply_opacity(&mut overlay, mark.opacity);

        let (x, y) = mark.gravity.place(canvas.dimensions(), overlay.dimensions());
        imageops::overlay(&mut canvas, &overlay, x, y);

        encode_png(&canvas)
    }
}

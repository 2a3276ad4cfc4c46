use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// One of the nine positional anchors a watermark can be placed at.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Gravity {
    Northwest,
    North,
    Northeast,
    West,
    Center,
    East,
    Southwest,
    South,
    #[default]
    Southeast,
}

/// Horizontal alignment of text relative to its anchor point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum TextAnchor {
    Start,
    Middle,
    End,
}

/// Anchor point expressed as percentages of the base image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub x_pct: u32,
    pub y_pct: u32,
    pub text_anchor: TextAnchor,
}

impl Anchor {
    /// Resolve the anchor to pixel coordinates on a `width` x `height` image.
    pub fn to_pixels(self, width: u32, height: u32) -> (f32, f32) {
        (
            width as f32 * self.x_pct as f32 / 100.0,
            height as f32 * self.y_pct as f32 / 100.0,
        )
    }
}

impl Gravity {
    /// Lenient parse: anything absent or unrecognized lands on southeast.
    pub fn resolve(value: Option<&str>) -> Gravity {
        value
            .and_then(|v| Gravity::from_str(v.trim()).ok())
            .unwrap_or_default()
    }

    pub fn anchor(self) -> Anchor {
        let (x_pct, y_pct, text_anchor) = match self {
            Gravity::Northwest => (5, 10, TextAnchor::Start),
            Gravity::North => (50, 10, TextAnchor::Middle),
            Gravity::Northeast => (95, 10, TextAnchor::End),
            Gravity::West => (5, 50, TextAnchor::Start),
            Gravity::Center => (50, 50, TextAnchor::Middle),
            Gravity::East => (95, 50, TextAnchor::End),
            Gravity::Southwest => (5, 90, TextAnchor::Start),
            Gravity::South => (50, 90, TextAnchor::Middle),
            Gravity::Southeast => (95, 90, TextAnchor::End),
        };
        Anchor {
            x_pct,
            y_pct,
            text_anchor,
        }
    }

    /// Top-left offset of an overlay aligned to this gravity's edges.
    pub fn place(self, base: (u32, u32), overlay: (u32, u32)) -> (i64, i64) {
        let (bw, bh) = (i64::from(base.0), i64::from(base.1));
        let (ow, oh) = (i64::from(overlay.0), i64::from(overlay.1));

        let left = 0;
        let center_x = (bw - ow) / 2;
        let right = bw - ow;
        let top = 0;
        let center_y = (bh - oh) / 2;
        let bottom = bh - oh;

        match self {
            Gravity::Northwest => (left, top),
            Gravity::North => (center_x, top),
            Gravity::Northeast => (right, top),
            Gravity::West => (left, center_y),
            Gravity::Center => (center_x, center_y),
            Gravity::East => (right, center_y),
            Gravity::Southwest => (left, bottom),
            Gravity::South => (center_x, bottom),
            Gravity::Southeast => (right, bottom),
        }
    }
}

pub fn clamp_opacity(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Smallest font size text is ever rendered at.
pub const MIN_RENDER_FONT_SIZE: u32 = 8;

pub fn render_font_size(requested: u32) -> u32 {
    requested.max(MIN_RENDER_FONT_SIZE)
}

/// Width a watermark image is resized to: the explicit width, else a quarter
/// of the base width, never wider than the watermark itself.
pub fn watermark_target_width(explicit: Option<u32>, base_width: u32, native_width: u32) -> u32 {
    let target = explicit.unwrap_or_else(|| (base_width as f64 * 0.25).round() as u32);
    target.clamp(1, native_width.max(1))
}

/// Height that keeps the aspect ratio of a `native` image scaled to `width`.
pub fn scaled_height(native: (u32, u32), width: u32) -> u32 {
    let (nw, nh) = native;
    if nw == 0 {
        return nh.max(1);
    }
    ((nh as f64 * width as f64 / nw as f64).round() as u32).max(1)
}

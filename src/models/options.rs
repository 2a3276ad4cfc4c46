use garde::Validate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::geometry::{clamp_opacity, render_font_size, Gravity};
use super::job::JobType;

pub const DEFAULT_FONT_SIZE: u32 = 48;
pub const DEFAULT_TEXT_OPACITY: f32 = 0.7;
pub const DEFAULT_IMAGE_OPACITY: f32 = 0.5;

/// Options for a text watermark, as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TextOptions {
    #[garde(length(min = 1), custom(not_blank))]
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1))]
    pub font_size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(custom(known_gravity))]
    pub gravity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub opacity: Option<f32>,
}

/// Options for an image (logo) watermark, as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptions {
    #[garde(length(min = 1), custom(not_blank))]
    pub watermark_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1))]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(custom(known_gravity))]
    pub gravity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub opacity: Option<f32>,
}

#[allow(clippy::ptr_arg)]
fn not_blank(value: &String, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

fn known_gravity(value: &Option<String>, _ctx: &()) -> garde::Result {
    match value {
        Some(g) if Gravity::from_str(g).is_err() => Err(garde::Error::new(
            "must be one of north, northeast, east, southeast, south, southwest, west, northwest, center",
        )),
        _ => Ok(()),
    }
}

/// Job type together with its type-specific options.
///
/// Serialized as `{"type": "...", "options": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "options", rename_all = "snake_case")]
pub enum WatermarkSpec {
    Text(TextOptions),
    Image(ImageOptions),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl WatermarkSpec {
    pub fn job_type(&self) -> JobType {
        match self {
            WatermarkSpec::Text(_) => JobType::Text,
            WatermarkSpec::Image(_) => JobType::Image,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let report = match self {
            WatermarkSpec::Text(opts) => opts.validate(),
            WatermarkSpec::Image(opts) => opts.validate(),
        };
        report.map_err(|r| ValidationError(r.to_string().trim().to_string()))
    }

    /// Options re-serialized from the typed struct, in field order. Used for
    /// submissions that did not arrive as a JSON object.
    pub fn options_value(&self) -> serde_json::Value {
        let value = match self {
            WatermarkSpec::Text(opts) => serde_json::to_value(opts),
            WatermarkSpec::Image(opts) => serde_json::to_value(opts),
        };
        value.unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }

    /// Rebuild a spec from a stored job type and options object.
    pub fn from_parts(job_type: JobType, options: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match job_type {
            JobType::Text => WatermarkSpec::Text(serde_json::from_value(options)?),
            JobType::Image => WatermarkSpec::Image(serde_json::from_value(options)?),
        })
    }

    /// Storage keys this job consumes, in cleanup order.
    pub fn source_keys<'a>(&'a self, input_key: &'a str) -> Vec<&'a str> {
        match self {
            WatermarkSpec::Text(_) => vec![input_key],
            WatermarkSpec::Image(opts) => vec![input_key, opts.watermark_key.as_str()],
        }
    }
}

/// Render-ready text watermark parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TextWatermark {
    pub text: String,
    pub font_size: u32,
    pub gravity: Gravity,
    pub opacity: f32,
}

impl From<&TextOptions> for TextWatermark {
    fn from(opts: &TextOptions) -> Self {
        Self {
            text: opts.text.clone(),
            font_size: render_font_size(opts.font_size.unwrap_or(DEFAULT_FONT_SIZE)),
            gravity: Gravity::resolve(opts.gravity.as_deref()),
            opacity: clamp_opacity(opts.opacity.unwrap_or(DEFAULT_TEXT_OPACITY)),
        }
    }
}

/// Render-ready image watermark parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageWatermark {
    pub width: Option<u32>,
    pub gravity: Gravity,
    pub opacity: f32,
}

impl From<&ImageOptions> for ImageWatermark {
    fn from(opts: &ImageOptions) -> Self {
        Self {
            width: opts.width,
            gravity: Gravity::resolve(opts.gravity.as_deref()),
            opacity: clamp_opacity(opts.opacity.unwrap_or(DEFAULT_IMAGE_OPACITY)),
        }
    }
}

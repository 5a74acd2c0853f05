//! Lenient parsing of cluster definition records
//!
//! Definitions arrive as JSON objects with loosely typed values: numbers may be
//! given as numbers or numeric strings, flags as booleans, numbers or strings,
//! colors as integers or `#rrggbb[aa]` strings. Anything unparsable falls back
//! to the documented default with a warning.

use crate::cluster::point::Point;
use crate::error::{ClusterError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// One definition record as supplied by the host
pub type RawDefinition = Map<String, Value>;

/// Packed `0xAARRGGBB` color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Color(pub u32);

impl Color {
    pub const BLACK: Color = Color(0xff00_0000);
    pub const WHITE: Color = Color(0xffff_ffff);

    /// Parses `#rrggbb`, `#aarrggbb` or a decimal/hex integer
    pub fn parse(text: &str) -> Option<Color> {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix('#') {
            let value = u32::from_str_radix(hex, 16).ok()?;
            return match hex.len() {
                6 => Some(Color(0xff00_0000 | value)),
                8 => Some(Color(value)),
                _ => None,
            };
        }
        if let Some(hex) = text.strip_prefix("0x") {
            return u32::from_str_radix(hex, 16).ok().map(Color);
        }
        text.parse::<u32>().ok().map(Color)
    }
}

/// Rendering parameters of one definition, carried for the host
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayParams {
    pub text_color: Color,
    pub text_font_name: String,
    pub text_font_size: f64,
    pub text_font_bold: bool,
    pub text_format: String,
    pub spot_color: Color,
    pub spot_size: f64,
    pub area_border_color: Option<Color>,
    pub area_border_color_selected: Option<Color>,
    pub area_border_width: f64,
    pub area_fill_color: Option<Color>,
    pub area_fill_color_selected: Option<Color>,
    pub area_permanent: bool,
    pub animation: bool,
    /// Pixel offset added to every record position
    pub offset: Point,
    /// Draw order; lower draws first
    pub order: i64,
}

impl Default for DisplayParams {
    fn default() -> Self {
        DisplayParams {
            text_color: Color::BLACK,
            text_font_name: "Arial".to_string(),
            text_font_size: 12.0,
            text_font_bold: false,
            text_format: "%d".to_string(),
            spot_color: Color::WHITE,
            spot_size: 24.0,
            area_border_color: None,
            area_border_color_selected: None,
            area_border_width: 1.0,
            area_fill_color: None,
            area_fill_color_selected: None,
            area_permanent: false,
            animation: true,
            offset: Point::default(),
            order: 0,
        }
    }
}

impl DisplayParams {
    pub fn from_raw(raw: &RawDefinition, id: &str) -> Self {
        let d = DisplayParams::default();
        DisplayParams {
            text_color: color(raw, "textcolor", id).unwrap_or(d.text_color),
            text_font_name: text(raw, "textfontname").unwrap_or(d.text_font_name),
            text_font_size: number(raw, "textfontsize", id).unwrap_or(d.text_font_size),
            text_font_bold: flag(raw, "textfontbold", id).unwrap_or(d.text_font_bold),
            text_format: text(raw, "textformat").unwrap_or(d.text_format),
            spot_color: color(raw, "spotcol", id).unwrap_or(d.spot_color),
            spot_size: number(raw, "spotsize", id).unwrap_or(d.spot_size),
            area_border_color: color(raw, "areabordercol", id),
            area_border_color_selected: color(raw, "areabordercolsel", id),
            area_border_width: number(raw, "areaborderwidth", id).unwrap_or(d.area_border_width),
            area_fill_color: color(raw, "areafillcol", id),
            area_fill_color_selected: color(raw, "areafillcolsel", id),
            area_permanent: flag(raw, "areapermanent", id).unwrap_or(d.area_permanent),
            animation: flag(raw, "animation", id).unwrap_or(d.animation),
            offset: Point([
                number(raw, "offsetX", id).unwrap_or(0.0),
                number(raw, "offsetY", id).unwrap_or(0.0),
            ]),
            order: number(raw, "order", id).map(|o| o as i64).unwrap_or(d.order),
        }
    }
}

/// Looks up `key` case-insensitively
fn lookup<'a>(raw: &'a RawDefinition, key: &str) -> Option<&'a Value> {
    raw.get(key).or_else(|| {
        raw.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Numeric field; `None` if absent, warns and returns `None` if unparsable
pub fn number(raw: &RawDefinition, key: &str, id: &str) -> Option<f64> {
    let parsed = match lookup(raw, key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Some(v),
        _ => {
            log::warn!("definition {}: ignoring non-numeric {}", id, key);
            None
        }
    }
}

pub fn text(raw: &RawDefinition, key: &str) -> Option<String> {
    match lookup(raw, key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

pub fn flag(raw: &RawDefinition, key: &str, id: &str) -> Option<bool> {
    let parsed = match lookup(raw, key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    };
    if parsed.is_none() {
        log::warn!("definition {}: ignoring non-boolean {}", id, key);
    }
    parsed
}

pub fn color(raw: &RawDefinition, key: &str, id: &str) -> Option<Color> {
    let parsed = match lookup(raw, key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()).map(Color),
        Value::String(s) => Color::parse(s),
        _ => None,
    };
    if parsed.is_none() {
        log::warn!("definition {}: ignoring invalid color {}", id, key);
    }
    parsed
}

/// Parses a JSON array of definition objects
pub fn parse_definitions(json: &str) -> Result<Vec<RawDefinition>> {
    let value: Value = serde_json::from_str(json)?;
    let Value::Array(items) = value else {
        return Err(ClusterError::InvalidConfig(
            "expected an array of definitions".to_string(),
        ));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map),
            _ => Err(ClusterError::InvalidConfig(format!(
                "definition {} is not an object",
                i
            ))),
        })
        .collect()
}

//! Drawing data model shared by server and clients.
//!
//! Shapes are plain immutable values. The server never renders them; it only
//! stores them in draw order and relays them, so geometry stays as the client
//! produced it (no normalization of negative extents).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// COLOR
// =============================================================================

/// 24-bit RGB color, serialized as `#rrggbb`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color `{0}` (expected #rrggbb or a named color)")]
pub struct ColorParseError(String);

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);

    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let named = match s.to_ascii_lowercase().as_str() {
            "black" => Some(Self::BLACK),
            "white" => Some(Self::WHITE),
            "red" => Some(Self::rgb(255, 0, 0)),
            "green" => Some(Self::rgb(0, 255, 0)),
            "blue" => Some(Self::rgb(0, 0, 255)),
            "yellow" => Some(Self::rgb(255, 255, 0)),
            "orange" => Some(Self::rgb(255, 200, 0)),
            "gray" | "grey" => Some(Self::rgb(128, 128, 128)),
            _ => None,
        };
        if let Some(color) = named {
            return Ok(color);
        }

        let Some(hex) = s.strip_prefix('#') else {
            return Err(ColorParseError(s.to_owned()));
        };
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ColorParseError(s.to_owned()));
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ColorParseError(s.to_owned()));
        Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl TryFrom<String> for Color {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// A canvas coordinate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// =============================================================================
// SHAPE
// =============================================================================

/// One drawn element. Board z-order is the order shapes were appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Line { color: Color, start: Point, end: Point },
    Rectangle { color: Color, origin: Point, width: f64, height: f64 },
    Oval { color: Color, origin: Point, width: f64, height: f64 },
    Circle { color: Color, origin: Point, diameter: f64 },
    FreeDraw { color: Color, points: Vec<Point> },
    Text { color: Color, origin: Point, text: String },
    /// Square stamp of background color centered on `center`.
    Eraser { color: Color, center: Point, size: f64 },
}

impl Shape {
    /// Wire name of the variant, matching the serialized `kind` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Line { .. } => "line",
            Self::Rectangle { .. } => "rectangle",
            Self::Oval { .. } => "oval",
            Self::Circle { .. } => "circle",
            Self::FreeDraw { .. } => "free_draw",
            Self::Text { .. } => "text",
            Self::Eraser { .. } => "eraser",
        }
    }

    #[must_use]
    pub fn color(&self) -> Color {
        match self {
            Self::Line { color, .. }
            | Self::Rectangle { color, .. }
            | Self::Oval { color, .. }
            | Self::Circle { color, .. }
            | Self::FreeDraw { color, .. }
            | Self::Text { color, .. }
            | Self::Eraser { color, .. } => *color,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line { start, end, .. } => {
                write!(f, "line ({}, {}) -> ({}, {})", start.x, start.y, end.x, end.y)
            }
            Self::Rectangle { origin, width, height, .. } => {
                write!(f, "rectangle at ({}, {}) {width}x{height}", origin.x, origin.y)
            }
            Self::Oval { origin, width, height, .. } => {
                write!(f, "oval at ({}, {}) {width}x{height}", origin.x, origin.y)
            }
            Self::Circle { origin, diameter, .. } => {
                write!(f, "circle at ({}, {}) d={diameter}", origin.x, origin.y)
            }
            Self::FreeDraw { points, .. } => write!(f, "free draw with {} points", points.len()),
            Self::Text { origin, text, .. } => write!(f, "text {text:?} at ({}, {})", origin.x, origin.y),
            Self::Eraser { center, size, .. } => {
                write!(f, "eraser at ({}, {}) size={size}", center.x, center.y)
            }
        }?;
        write!(f, " {}", self.color())
    }
}

#[cfg(test)]
#[path = "shape_test.rs"]
mod tests;

//! Typed views over the client's state object and the arithmetic behind
//! relative edits.
//!
//! The client reports its scene as nested JSON:
//!
//! ```text
//! { model:      { color, position{x,y,z}, rotation{x,y,z}, scale{x,y,z} },
//!   keyLight:   { intensity, color, position{..}, rotation{..}, size{width,height} },
//!   fillLight:  { same as keyLight },
//!   camera:     { distance, fov },
//!   backgroundColor }
//! ```
//!
//! Rotations are in degrees.

use std::fmt;

use serde::Serialize;

use crate::cache::Snapshot;
use crate::command::Light;

pub const MODEL_COLOR: &str = "/model/color";
pub const MODEL_POSITION: &str = "/model/position";
pub const MODEL_ROTATION: &str = "/model/rotation";
pub const MODEL_SCALE: &str = "/model/scale";
pub const CAMERA_DISTANCE: &str = "/camera/distance";
pub const CAMERA_FOV: &str = "/camera/fov";
pub const BACKGROUND_COLOR: &str = "/backgroundColor";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Read `{x, y, z}` at `pointer`. All three components must be numbers.
    pub fn read(snapshot: &Snapshot, pointer: &str) -> Option<Self> {
        Some(Self {
            x: snapshot.f64_at(&format!("{pointer}/x"))?,
            y: snapshot.f64_at(&format!("{pointer}/y"))?,
            z: snapshot.f64_at(&format!("{pointer}/z"))?,
        })
    }

    pub fn offset(self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", round(self.x), round(self.y), round(self.z))
    }
}

/// Round for display so float noise from relative edits stays out of
/// agent-facing text.
pub fn round(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LightView {
    pub intensity: Option<f64>,
    pub color: Option<String>,
    pub position: Option<Vec3>,
    pub rotation: Option<Vec3>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl LightView {
    pub fn read(snapshot: &Snapshot, light: Light) -> Self {
        let base = format!("/{}", light.state_key());
        Self {
            intensity: snapshot.f64_at(&format!("{base}/intensity")),
            color: snapshot.str_at(&format!("{base}/color")).map(str::to_owned),
            position: Vec3::read(snapshot, &format!("{base}/position")),
            rotation: Vec3::read(snapshot, &format!("{base}/rotation")),
            width: snapshot.f64_at(&format!("{base}/size/width")),
            height: snapshot.f64_at(&format!("{base}/size/height")),
        }
    }

    pub fn intensity_pointer(light: Light) -> String {
        format!("/{}/intensity", light.state_key())
    }
}

impl fmt::Display for LightView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(i) = self.intensity {
            parts.push(format!("intensity {}", round(i)));
        }
        if let Some(ref c) = self.color {
            parts.push(format!("color {c}"));
        }
        if let Some(p) = self.position {
            parts.push(format!("position {p}"));
        }
        if let Some(r) = self.rotation {
            parts.push(format!("rotation {r}"));
        }
        if let (Some(w), Some(h)) = (self.width, self.height) {
            parts.push(format!("size {}x{}", round(w), round(h)));
        }
        if parts.is_empty() {
            f.write_str("unknown")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse `#rrggbb` or `#rgb` (leading `#` optional, case-insensitive).
    pub fn parse(input: &str) -> Option<Self> {
        let hex = input.trim().trim_start_matches('#');
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        match hex.len() {
            6 => Some(Self(
                u8::from_str_radix(&hex[0..2], 16).ok()?,
                u8::from_str_radix(&hex[2..4], 16).ok()?,
                u8::from_str_radix(&hex[4..6], 16).ok()?,
            )),
            3 => {
                let digit = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|d| d * 17);
                Some(Self(digit(0)?, digit(1)?, digit(2)?))
            }
            _ => None,
        }
    }

    /// Move each channel `percent` of the way toward black.
    pub fn darken(self, percent: f64) -> Self {
        let keep = 1.0 - clamp_percent(percent) / 100.0;
        self.map(|c| c as f64 * keep)
    }

    /// Move each channel `percent` of the way toward white.
    pub fn lighten(self, percent: f64) -> Self {
        let amount = clamp_percent(percent) / 100.0;
        self.map(|c| c as f64 + (255.0 - c as f64) * amount)
    }

    fn map(self, f: impl Fn(u8) -> f64) -> Self {
        let channel = |c: u8| f(c).round().clamp(0.0, 255.0) as u8;
        Self(channel(self.0), channel(self.1), channel(self.2))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

fn clamp_percent(percent: f64) -> f64 {
    percent.clamp(0.0, 100.0)
}

/// Normalize a user-supplied color to lowercase `#rrggbb`.
pub fn normalize_color(input: &str) -> Option<String> {
    Rgb::parse(input).map(|rgb| rgb.to_string())
}

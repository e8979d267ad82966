// MCP tool parameter types and validation helpers

use rmcp::model::ErrorData;
use serde::Deserialize;

use crate::scene;

/// Parameters for tools that set a color.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ColorParams {
    #[schemars(description = "Hex color, e.g. \"#ff8800\" or \"#f80\".")]
    pub color: String,
}

/// Parameters for `change_model_size`.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SizeParams {
    #[schemars(description = "Uniform model size. Must be greater than zero; 1.0 is the default size.")]
    pub size: f64,
}

/// An absolute x/y/z triple.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct Vec3Params {
    #[schemars(description = "X component.")]
    pub x: f64,
    #[schemars(description = "Y component.")]
    pub y: f64,
    #[schemars(description = "Z component.")]
    pub z: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DegreesParams {
    #[schemars(description = "Angle in degrees.")]
    pub degrees: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ToggleParams {
    #[schemars(description = "true to enable, false to disable.")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct IntensityParams {
    #[schemars(description = "Light intensity. Must be zero or greater.")]
    pub intensity: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct LightSizeParams {
    #[schemars(description = "Width of the area light. Must be greater than zero.")]
    pub width: f64,
    #[schemars(description = "Height of the area light. Must be greater than zero.")]
    pub height: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DistanceParams {
    #[schemars(description = "Camera distance from the model. Must be greater than zero.")]
    pub distance: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FovParams {
    #[schemars(description = "Vertical field of view in degrees, between 0 and 180 exclusive.")]
    pub fov: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SpeedParams {
    #[schemars(description = "Auto-rotation speed. Negative values rotate the other way.")]
    pub speed: f64,
}

/// Parameters for every read tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct ReadParams {
    /// Bypass the cache and ask the viewer directly.
    #[serde(default)]
    #[schemars(description = "Query the viewer directly instead of answering from cache. Use this if the user may have changed the scene by hand.")]
    pub force_refresh: bool,
}

/// Parameters for `nudge_model` and `rotate_model_by`.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct OffsetParams {
    #[serde(default)]
    #[schemars(description = "Change along X. Defaults to 0.")]
    pub x: f64,
    #[serde(default)]
    #[schemars(description = "Change along Y. Defaults to 0.")]
    pub y: f64,
    #[serde(default)]
    #[schemars(description = "Change along Z. Defaults to 0.")]
    pub z: f64,
    #[serde(default)]
    #[schemars(description = "Re-read the current value from the viewer before applying the change.")]
    pub force_refresh: bool,
}

/// Parameters for `scale_model_by` and `zoom_camera_by`.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FactorParams {
    #[schemars(description = "Multiplier. Must be greater than zero.")]
    pub factor: f64,
    #[serde(default)]
    #[schemars(description = "Re-read the current value from the viewer before applying the change.")]
    pub force_refresh: bool,
}

/// Parameters for `darken_model_by` and `lighten_model_by`.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PercentParams {
    #[schemars(description = "Percentage between 0 and 100.")]
    pub percent: f64,
    #[serde(default)]
    #[schemars(description = "Re-read the current color from the viewer before applying the change.")]
    pub force_refresh: bool,
}

/// Parameters for the light intensity adjustment tools.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeltaParams {
    #[schemars(description = "Amount to add to the current intensity; negative to dim. The result is clamped at zero.")]
    pub delta: f64,
    #[serde(default)]
    #[schemars(description = "Re-read the current intensity from the viewer before applying the change.")]
    pub force_refresh: bool,
}

pub(crate) fn finite(name: &str, value: f64) -> Result<f64, ErrorData> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ErrorData::invalid_params(
            format!("{name} must be a finite number"),
            None,
        ))
    }
}

pub(crate) fn positive(name: &str, value: f64) -> Result<f64, ErrorData> {
    let value = finite(name, value)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(ErrorData::invalid_params(
            format!("{name} must be greater than zero, got {value}"),
            None,
        ))
    }
}

pub(crate) fn non_negative(name: &str, value: f64) -> Result<f64, ErrorData> {
    let value = finite(name, value)?;
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(ErrorData::invalid_params(
            format!("{name} must be zero or greater, got {value}"),
            None,
        ))
    }
}

pub(crate) fn percent(value: f64) -> Result<f64, ErrorData> {
    let value = finite("percent", value)?;
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(ErrorData::invalid_params(
            format!("percent must be between 0 and 100, got {value}"),
            None,
        ))
    }
}

pub(crate) fn fov(value: f64) -> Result<f64, ErrorData> {
    let value = finite("fov", value)?;
    if value > 0.0 && value < 180.0 {
        Ok(value)
    } else {
        Err(ErrorData::invalid_params(
            format!("fov must be between 0 and 180 degrees, got {value}"),
            None,
        ))
    }
}

pub(crate) fn color(value: &str) -> Result<String, ErrorData> {
    scene::normalize_color(value).ok_or_else(|| {
        ErrorData::invalid_params(
            format!("color must be a hex value like #ff8800, got '{value}'"),
            None,
        )
    })
}

pub(crate) fn vec3(params: &Vec3Params) -> Result<(f64, f64, f64), ErrorData> {
    Ok((
        finite("x", params.x)?,
        finite("y", params.y)?,
        finite("z", params.z)?,
    ))
}

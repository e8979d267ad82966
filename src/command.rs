//! Commands sent to the visualization client.
//!
//! Each variant is one capability of the client and serializes to a tagged
//! JSON object, e.g. `{"type":"changeColor","color":"#ff0000"}`. The routing
//! core treats a command as opaque cargo; only the tool layer builds them.

use serde::{Deserialize, Serialize};

/// Which of the two light rigs a light command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Light {
    Key,
    Fill,
}

impl Light {
    pub fn label(&self) -> &'static str {
        match self {
            Light::Key => "key light",
            Light::Fill => "fill light",
        }
    }

    /// Top-level field of the light rig in the client state.
    pub fn state_key(&self) -> &'static str {
        match self {
            Light::Key => "keyLight",
            Light::Fill => "fillLight",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    // ── Model ──────────────────────────────────────────────────────
    ChangeColor { color: String },
    ChangeModelSize { size: f64 },
    ScaleModel { x: f64, y: f64, z: f64 },
    SetModelPosition { x: f64, y: f64, z: f64 },
    /// Euler angles in degrees.
    SetModelRotation { x: f64, y: f64, z: f64 },
    RotateModelClockwise { degrees: f64 },
    RotateModelCounterclockwise { degrees: f64 },
    SetModelWireframe { enabled: bool },
    ResetModel,

    // ── Key light ──────────────────────────────────────────────────
    SetKeyLightIntensity { intensity: f64 },
    SetKeyLightColor { color: String },
    SetKeyLightPosition { x: f64, y: f64, z: f64 },
    SetKeyLightRotation { x: f64, y: f64, z: f64 },
    SetKeyLightSize { width: f64, height: f64 },

    // ── Fill light ─────────────────────────────────────────────────
    SetFillLightIntensity { intensity: f64 },
    SetFillLightColor { color: String },
    SetFillLightPosition { x: f64, y: f64, z: f64 },
    SetFillLightRotation { x: f64, y: f64, z: f64 },
    SetFillLightSize { width: f64, height: f64 },

    // ── Camera ─────────────────────────────────────────────────────
    SetCameraDistance { distance: f64 },
    SetCameraFov { fov: f64 },
    SetCameraPosition { x: f64, y: f64, z: f64 },
    ResetCamera,

    // ── Scene ──────────────────────────────────────────────────────
    SetBackgroundColor { color: String },
    SetAutoRotate { enabled: bool },
    SetAutoRotateSpeed { speed: f64 },
    ResetScene,
}

impl Command {
    pub fn light_intensity(light: Light, intensity: f64) -> Self {
        match light {
            Light::Key => Command::SetKeyLightIntensity { intensity },
            Light::Fill => Command::SetFillLightIntensity { intensity },
        }
    }

    pub fn light_color(light: Light, color: String) -> Self {
        match light {
            Light::Key => Command::SetKeyLightColor { color },
            Light::Fill => Command::SetFillLightColor { color },
        }
    }

    pub fn light_position(light: Light, x: f64, y: f64, z: f64) -> Self {
        match light {
            Light::Key => Command::SetKeyLightPosition { x, y, z },
            Light::Fill => Command::SetFillLightPosition { x, y, z },
        }
    }

    pub fn light_rotation(light: Light, x: f64, y: f64, z: f64) -> Self {
        match light {
            Light::Key => Command::SetKeyLightRotation { x, y, z },
            Light::Fill => Command::SetFillLightRotation { x, y, z },
        }
    }

    pub fn light_size(light: Light, width: f64, height: f64) -> Self {
        match light {
            Light::Key => Command::SetKeyLightSize { width, height },
            Light::Fill => Command::SetFillLightSize { width, height },
        }
    }

    /// The wire tag, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::ChangeColor { .. } => "changeColor",
            Command::ChangeModelSize { .. } => "changeModelSize",
            Command::ScaleModel { .. } => "scaleModel",
            Command::SetModelPosition { .. } => "setModelPosition",
            Command::SetModelRotation { .. } => "setModelRotation",
            Command::RotateModelClockwise { .. } => "rotateModelClockwise",
            Command::RotateModelCounterclockwise { .. } => "rotateModelCounterclockwise",
            Command::SetModelWireframe { .. } => "setModelWireframe",
            Command::ResetModel => "resetModel",
            Command::SetKeyLightIntensity { .. } => "setKeyLightIntensity",
            Command::SetKeyLightColor { .. } => "setKeyLightColor",
            Command::SetKeyLightPosition { .. } => "setKeyLightPosition",
            Command::SetKeyLightRotation { .. } => "setKeyLightRotation",
            Command::SetKeyLightSize { .. } => "setKeyLightSize",
            Command::SetFillLightIntensity { .. } => "setFillLightIntensity",
            Command::SetFillLightColor { .. } => "setFillLightColor",
            Command::SetFillLightPosition { .. } => "setFillLightPosition",
            Command::SetFillLightRotation { .. } => "setFillLightRotation",
            Command::SetFillLightSize { .. } => "setFillLightSize",
            Command::SetCameraDistance { .. } => "setCameraDistance",
            Command::SetCameraFov { .. } => "setCameraFov",
            Command::SetCameraPosition { .. } => "setCameraPosition",
            Command::ResetCamera => "resetCamera",
            Command::SetBackgroundColor { .. } => "setBackgroundColor",
            Command::SetAutoRotate { .. } => "setAutoRotate",
            Command::SetAutoRotateSpeed { .. } => "setAutoRotateSpeed",
            Command::ResetScene => "resetScene",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_color_wire_shape() {
        let cmd = Command::ChangeColor {
            color: "#ff0000".into(),
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"type": "changeColor", "color": "#ff0000"})
        );
    }

    #[test]
    fn unit_variant_serializes_as_bare_tag() {
        assert_eq!(
            serde_json::to_value(&Command::ResetCamera).unwrap(),
            json!({"type": "resetCamera"})
        );
    }

    #[test]
    fn tag_matches_serialized_type() {
        let samples = [
            Command::ChangeModelSize { size: 2.0 },
            Command::RotateModelCounterclockwise { degrees: 15.0 },
            Command::light_intensity(Light::Key, 1.2),
            Command::light_size(Light::Fill, 1.0, 2.0),
            Command::SetCameraFov { fov: 50.0 },
            Command::SetAutoRotateSpeed { speed: 0.5 },
            Command::ResetScene,
        ];
        for cmd in samples {
            let value = serde_json::to_value(&cmd).unwrap();
            assert_eq!(value["type"], cmd.tag());
        }
    }

    #[test]
    fn light_helpers_pick_the_right_rig() {
        assert_eq!(
            Command::light_color(Light::Fill, "#ffffff".into()),
            Command::SetFillLightColor {
                color: "#ffffff".into()
            }
        );
        assert_eq!(
            Command::light_position(Light::Key, 1.0, 2.0, 3.0).tag(),
            "setKeyLightPosition"
        );
    }

    #[test]
    fn deserializes_from_wire() {
        let cmd: Command =
            serde_json::from_value(json!({"type": "setKeyLightSize", "width": 2, "height": 3}))
                .unwrap();
        assert_eq!(
            cmd,
            Command::SetKeyLightSize {
                width: 2.0,
                height: 3.0
            }
        );
    }
}

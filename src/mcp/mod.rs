pub mod tools;

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::*,
    service::RequestContext,
    tool, tool_router, RoleServer, ServerHandler,
};

use crate::bridge::Bridge;
use crate::command::{Command, Light};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::reconcile::StateReading;
use crate::router::Delivery;
use crate::scene::{self, LightView, Rgb, Vec3};
use crate::session::{current_session, with_session, SessionSource};

use tools::{
    ColorParams, DegreesParams, DeltaParams, DistanceParams, FactorParams, FovParams,
    IntensityParams, LightSizeParams, OffsetParams, PercentParams, ReadParams, SizeParams,
    SpeedParams, ToggleParams, Vec3Params,
};

/// Exposes the scene bridge as MCP tools.
///
/// Every tool call runs inside [`with_session`] for the session resolved
/// from [`SessionSource`], so the tools themselves never take a session
/// parameter.
#[derive(Clone)]
pub struct SceneMcpServer {
    bridge: Bridge,
    source: SessionSource,
    config: Arc<BridgeConfig>,
    tool_router: ToolRouter<SceneMcpServer>,
}

fn text(message: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(message.into())])
}

fn missing(what: &str) -> BridgeError {
    BridgeError::InvalidSnapshot(format!("{what} is missing from the viewer state"))
}

impl SceneMcpServer {
    pub fn new(bridge: Bridge, source: SessionSource, config: Arc<BridgeConfig>) -> Self {
        Self {
            bridge,
            source,
            config,
            tool_router: Self::tool_router(),
        }
    }

    /// Render a tool outcome. Bridge failures become error results the
    /// agent can read, not protocol errors.
    fn respond(&self, outcome: Result<String, BridgeError>) -> CallToolResult {
        match outcome {
            Ok(message) => text(message),
            Err(err) => {
                let mut message = err.to_string();
                if let BridgeError::NoRoute(ref session) = err {
                    message.push_str(&format!(
                        ". Open {} in a browser to connect a viewer.",
                        self.config.viewer_url(session)
                    ));
                }
                CallToolResult::error(vec![Content::text(message)])
            }
        }
    }

    /// Fire `command` at the current session and return `confirmation` if
    /// it left the bridge.
    fn send(&self, command: Command, confirmation: String) -> Result<String, BridgeError> {
        if current_session().is_none() && self.source.ambient().is_none() {
            // Broadcasting is a last resort for the single-session process only.
            tracing::warn!(command = command.tag(), "no session bound to request, dropping command");
            return Err(BridgeError::NoSession);
        }
        match self.bridge.router().dispatch(&command) {
            Delivery::Delivered(_) => Ok(confirmation),
            Delivery::Broadcast(n) if n > 0 => Ok(format!(
                "{confirmation} (no session was bound to this request, so it was sent to all {n} connected viewer(s))"
            )),
            Delivery::NoRoute(session) => Err(BridgeError::NoRoute(session)),
            Delivery::Broadcast(_) | Delivery::Dropped => Err(BridgeError::NoSession),
        }
    }

    async fn read_state(&self, force_refresh: bool) -> Result<StateReading, BridgeError> {
        let session = current_session().ok_or(BridgeError::NoSession)?;
        self.bridge
            .reconciler()
            .get_state(&session, force_refresh)
            .await
    }

    async fn describe(
        &self,
        force_refresh: bool,
        label: &str,
        render: impl FnOnce(&StateReading) -> String,
    ) -> Result<String, BridgeError> {
        let reading = self.read_state(force_refresh).await?;
        let value = render(&reading);
        Ok(reading.annotate(label, &value))
    }

    async fn offset_model(
        &self,
        pointer: &str,
        what: &str,
        offset: (f64, f64, f64),
        force_refresh: bool,
    ) -> Result<String, BridgeError> {
        let reading = self.read_state(force_refresh).await?;
        let current = Vec3::read(&reading.snapshot, pointer).ok_or_else(|| missing(what))?;
        let target = current.offset(offset.0, offset.1, offset.2);
        let command = if pointer == scene::MODEL_ROTATION {
            Command::SetModelRotation {
                x: target.x,
                y: target.y,
                z: target.z,
            }
        } else {
            Command::SetModelPosition {
                x: target.x,
                y: target.y,
                z: target.z,
            }
        };
        self.send(
            command,
            format!(
                "Changed model {what} from {current} to {target}, {}",
                reading.basis()
            ),
        )
    }

    async fn shade_model(
        &self,
        percent: f64,
        darken: bool,
        force_refresh: bool,
    ) -> Result<String, BridgeError> {
        let reading = self.read_state(force_refresh).await?;
        let current = reading
            .snapshot
            .str_at(scene::MODEL_COLOR)
            .ok_or_else(|| missing("model color"))?;
        let rgb = Rgb::parse(current).ok_or_else(|| {
            BridgeError::InvalidSnapshot(format!("model color '{current}' is not a hex color"))
        })?;
        let (target, verb) = if darken {
            (rgb.darken(percent), "Darkened")
        } else {
            (rgb.lighten(percent), "Lightened")
        };
        self.send(
            Command::ChangeColor {
                color: target.to_string(),
            },
            format!(
                "{verb} model color by {percent}% from {rgb} to {target}, {}",
                reading.basis()
            ),
        )
    }

    async fn adjust_light(
        &self,
        light: Light,
        delta: f64,
        force_refresh: bool,
    ) -> Result<String, BridgeError> {
        let reading = self.read_state(force_refresh).await?;
        let current = reading
            .snapshot
            .f64_at(&LightView::intensity_pointer(light))
            .ok_or_else(|| missing(&format!("{} intensity", light.label())))?;
        let target = (current + delta).max(0.0);
        self.send(
            Command::light_intensity(light, target),
            format!(
                "Changed {} intensity from {} to {}, {}",
                light.label(),
                scene::round(current),
                scene::round(target),
                reading.basis()
            ),
        )
    }

    fn set_light(&self, light: Light, command: Command, what: &str) -> CallToolResult {
        self.respond(self.send(command, format!("Set {} {what}", light.label())))
    }
}

#[tool_router]
impl SceneMcpServer {
    // ── Model ──────────────────────────────────────────────────────

    #[tool(description = "Set the model's color. Takes a hex color such as #ff0000.")]
    async fn change_model_color(
        &self,
        Parameters(params): Parameters<ColorParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let color = tools::color(&params.color)?;
        Ok(self.respond(self.send(
            Command::ChangeColor {
                color: color.clone(),
            },
            format!("Model color set to {color}"),
        )))
    }

    #[tool(description = "Set the model's uniform size. 1.0 is the default size.")]
    async fn change_model_size(
        &self,
        Parameters(params): Parameters<SizeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let size = tools::positive("size", params.size)?;
        Ok(self.respond(self.send(
            Command::ChangeModelSize { size },
            format!("Model size set to {size}"),
        )))
    }

    #[tool(description = "Set the model's scale independently along x, y and z.")]
    async fn scale_model(
        &self,
        Parameters(params): Parameters<Vec3Params>,
    ) -> Result<CallToolResult, ErrorData> {
        let x = tools::positive("x", params.x)?;
        let y = tools::positive("y", params.y)?;
        let z = tools::positive("z", params.z)?;
        Ok(self.respond(self.send(
            Command::ScaleModel { x, y, z },
            format!("Model scale set to {}", Vec3::new(x, y, z)),
        )))
    }

    #[tool(description = "Move the model to an absolute position. For a relative move use nudge_model.")]
    async fn set_model_position(
        &self,
        Parameters(params): Parameters<Vec3Params>,
    ) -> Result<CallToolResult, ErrorData> {
        let (x, y, z) = tools::vec3(&params)?;
        Ok(self.respond(self.send(
            Command::SetModelPosition { x, y, z },
            format!("Model position set to {}", Vec3::new(x, y, z)),
        )))
    }

    #[tool(description = "Set the model's absolute rotation in degrees around x, y and z. For a relative rotation use rotate_model_by.")]
    async fn set_model_rotation(
        &self,
        Parameters(params): Parameters<Vec3Params>,
    ) -> Result<CallToolResult, ErrorData> {
        let (x, y, z) = tools::vec3(&params)?;
        Ok(self.respond(self.send(
            Command::SetModelRotation { x, y, z },
            format!("Model rotation set to {} degrees", Vec3::new(x, y, z)),
        )))
    }

    #[tool(description = "Rotate the model clockwise around its vertical axis by the given number of degrees.")]
    async fn rotate_model_clockwise(
        &self,
        Parameters(params): Parameters<DegreesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let degrees = tools::finite("degrees", params.degrees)?;
        Ok(self.respond(self.send(
            Command::RotateModelClockwise { degrees },
            format!("Model rotated {degrees} degrees clockwise"),
        )))
    }

    #[tool(description = "Rotate the model counterclockwise around its vertical axis by the given number of degrees.")]
    async fn rotate_model_counterclockwise(
        &self,
        Parameters(params): Parameters<DegreesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let degrees = tools::finite("degrees", params.degrees)?;
        Ok(self.respond(self.send(
            Command::RotateModelCounterclockwise { degrees },
            format!("Model rotated {degrees} degrees counterclockwise"),
        )))
    }

    #[tool(description = "Show or hide the model's wireframe.")]
    async fn set_model_wireframe(
        &self,
        Parameters(params): Parameters<ToggleParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let state = if params.enabled { "enabled" } else { "disabled" };
        Ok(self.respond(self.send(
            Command::SetModelWireframe {
                enabled: params.enabled,
            },
            format!("Model wireframe {state}"),
        )))
    }

    #[tool(description = "Reset the model's color, size, position and rotation to defaults.")]
    async fn reset_model(&self) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(self.send(Command::ResetModel, "Model reset".to_string())))
    }

    // ── Lights ─────────────────────────────────────────────────────

    #[tool(description = "Set the key light's intensity. 0 turns it off.")]
    async fn set_key_light_intensity(
        &self,
        Parameters(params): Parameters<IntensityParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let intensity = tools::non_negative("intensity", params.intensity)?;
        Ok(self.set_light(
            Light::Key,
            Command::light_intensity(Light::Key, intensity),
            &format!("intensity to {intensity}"),
        ))
    }

    #[tool(description = "Set the key light's color. Takes a hex color such as #ffffff.")]
    async fn set_key_light_color(
        &self,
        Parameters(params): Parameters<ColorParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let color = tools::color(&params.color)?;
        Ok(self.set_light(
            Light::Key,
            Command::light_color(Light::Key, color.clone()),
            &format!("color to {color}"),
        ))
    }

    #[tool(description = "Move the key light to an absolute position.")]
    async fn set_key_light_position(
        &self,
        Parameters(params): Parameters<Vec3Params>,
    ) -> Result<CallToolResult, ErrorData> {
        let (x, y, z) = tools::vec3(&params)?;
        Ok(self.set_light(
            Light::Key,
            Command::light_position(Light::Key, x, y, z),
            &format!("position to {}", Vec3::new(x, y, z)),
        ))
    }

    #[tool(description = "Set the key light's rotation in degrees around x, y and z.")]
    async fn set_key_light_rotation(
        &self,
        Parameters(params): Parameters<Vec3Params>,
    ) -> Result<CallToolResult, ErrorData> {
        let (x, y, z) = tools::vec3(&params)?;
        Ok(self.set_light(
            Light::Key,
            Command::light_rotation(Light::Key, x, y, z),
            &format!("rotation to {} degrees", Vec3::new(x, y, z)),
        ))
    }

    #[tool(description = "Set the key light's area size.")]
    async fn set_key_light_size(
        &self,
        Parameters(params): Parameters<LightSizeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let width = tools::positive("width", params.width)?;
        let height = tools::positive("height", params.height)?;
        Ok(self.set_light(
            Light::Key,
            Command::light_size(Light::Key, width, height),
            &format!("size to {width}x{height}"),
        ))
    }

    #[tool(description = "Set the fill light's intensity. 0 turns it off.")]
    async fn set_fill_light_intensity(
        &self,
        Parameters(params): Parameters<IntensityParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let intensity = tools::non_negative("intensity", params.intensity)?;
        Ok(self.set_light(
            Light::Fill,
            Command::light_intensity(Light::Fill, intensity),
            &format!("intensity to {intensity}"),
        ))
    }

    #[tool(description = "Set the fill light's color. Takes a hex color such as #ffffff.")]
    async fn set_fill_light_color(
        &self,
        Parameters(params): Parameters<ColorParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let color = tools::color(&params.color)?;
        Ok(self.set_light(
            Light::Fill,
            Command::light_color(Light::Fill, color.clone()),
            &format!("color to {color}"),
        ))
    }

    #[tool(description = "Move the fill light to an absolute position.")]
    async fn set_fill_light_position(
        &self,
        Parameters(params): Parameters<Vec3Params>,
    ) -> Result<CallToolResult, ErrorData> {
        let (x, y, z) = tools::vec3(&params)?;
        Ok(self.set_light(
            Light::Fill,
            Command::light_position(Light::Fill, x, y, z),
            &format!("position to {}", Vec3::new(x, y, z)),
        ))
    }

    #[tool(description = "Set the fill light's rotation in degrees around x, y and z.")]
    async fn set_fill_light_rotation(
        &self,
        Parameters(params): Parameters<Vec3Params>,
    ) -> Result<CallToolResult, ErrorData> {
        let (x, y, z) = tools::vec3(&params)?;
        Ok(self.set_light(
            Light::Fill,
            Command::light_rotation(Light::Fill, x, y, z),
            &format!("rotation to {} degrees", Vec3::new(x, y, z)),
        ))
    }

    #[tool(description = "Set the fill light's area size.")]
    async fn set_fill_light_size(
        &self,
        Parameters(params): Parameters<LightSizeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let width = tools::positive("width", params.width)?;
        let height = tools::positive("height", params.height)?;
        Ok(self.set_light(
            Light::Fill,
            Command::light_size(Light::Fill, width, height),
            &format!("size to {width}x{height}"),
        ))
    }

    // ── Camera ─────────────────────────────────────────────────────

    #[tool(description = "Set the camera's distance from the model. For a relative change use zoom_camera_by.")]
    async fn set_camera_distance(
        &self,
        Parameters(params): Parameters<DistanceParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let distance = tools::positive("distance", params.distance)?;
        Ok(self.respond(self.send(
            Command::SetCameraDistance { distance },
            format!("Camera distance set to {distance}"),
        )))
    }

    #[tool(description = "Set the camera's vertical field of view in degrees.")]
    async fn set_camera_fov(
        &self,
        Parameters(params): Parameters<FovParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let fov = tools::fov(params.fov)?;
        Ok(self.respond(self.send(
            Command::SetCameraFov { fov },
            format!("Camera field of view set to {fov} degrees"),
        )))
    }

    #[tool(description = "Move the camera to an absolute position.")]
    async fn set_camera_position(
        &self,
        Parameters(params): Parameters<Vec3Params>,
    ) -> Result<CallToolResult, ErrorData> {
        let (x, y, z) = tools::vec3(&params)?;
        Ok(self.respond(self.send(
            Command::SetCameraPosition { x, y, z },
            format!("Camera position set to {}", Vec3::new(x, y, z)),
        )))
    }

    #[tool(description = "Reset the camera to its default framing.")]
    async fn reset_camera(&self) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(self.send(Command::ResetCamera, "Camera reset".to_string())))
    }

    // ── Scene ──────────────────────────────────────────────────────

    #[tool(description = "Set the scene's background color. Takes a hex color such as #202020.")]
    async fn set_background_color(
        &self,
        Parameters(params): Parameters<ColorParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let color = tools::color(&params.color)?;
        Ok(self.respond(self.send(
            Command::SetBackgroundColor {
                color: color.clone(),
            },
            format!("Background color set to {color}"),
        )))
    }

    #[tool(description = "Turn continuous auto-rotation of the model on or off.")]
    async fn set_auto_rotate(
        &self,
        Parameters(params): Parameters<ToggleParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let state = if params.enabled { "enabled" } else { "disabled" };
        Ok(self.respond(self.send(
            Command::SetAutoRotate {
                enabled: params.enabled,
            },
            format!("Auto-rotate {state}"),
        )))
    }

    #[tool(description = "Set the auto-rotation speed.")]
    async fn set_auto_rotate_speed(
        &self,
        Parameters(params): Parameters<SpeedParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let speed = tools::finite("speed", params.speed)?;
        Ok(self.respond(self.send(
            Command::SetAutoRotateSpeed { speed },
            format!("Auto-rotate speed set to {speed}"),
        )))
    }

    #[tool(description = "Reset the whole scene (model, lights, camera and background) to defaults.")]
    async fn reset_scene(&self) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(self.send(Command::ResetScene, "Scene reset".to_string())))
    }

    // ── Reads ──────────────────────────────────────────────────────

    #[tool(description = "Get the full scene state as JSON. Answers from cache unless force_refresh is set; the response says which.")]
    async fn get_scene_state(
        &self,
        Parameters(params): Parameters<ReadParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(
            self.describe(params.force_refresh, "Scene state", |r| {
                r.snapshot.as_value().to_string()
            })
            .await,
        ))
    }

    #[tool(description = "Get the model's current color.")]
    async fn get_model_color(
        &self,
        Parameters(params): Parameters<ReadParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(
            self.describe(params.force_refresh, "Model color", |r| {
                r.snapshot
                    .str_at(scene::MODEL_COLOR)
                    .unwrap_or("unknown")
                    .to_string()
            })
            .await,
        ))
    }

    #[tool(description = "Get the model's current position, rotation (degrees) and scale.")]
    async fn get_model_transform(
        &self,
        Parameters(params): Parameters<ReadParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(
            self.describe(params.force_refresh, "Model transform", |r| {
                let show = |pointer: &str| {
                    Vec3::read(&r.snapshot, pointer)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                };
                format!(
                    "position {}, rotation {}, scale {}",
                    show(scene::MODEL_POSITION),
                    show(scene::MODEL_ROTATION),
                    show(scene::MODEL_SCALE)
                )
            })
            .await,
        ))
    }

    #[tool(description = "Get the key light's intensity, color, position, rotation and size.")]
    async fn get_key_light(
        &self,
        Parameters(params): Parameters<ReadParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(
            self.describe(params.force_refresh, "Key light", |r| {
                LightView::read(&r.snapshot, Light::Key).to_string()
            })
            .await,
        ))
    }

    #[tool(description = "Get the fill light's intensity, color, position, rotation and size.")]
    async fn get_fill_light(
        &self,
        Parameters(params): Parameters<ReadParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(
            self.describe(params.force_refresh, "Fill light", |r| {
                LightView::read(&r.snapshot, Light::Fill).to_string()
            })
            .await,
        ))
    }

    #[tool(description = "Get the camera's distance and field of view.")]
    async fn get_camera(
        &self,
        Parameters(params): Parameters<ReadParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(
            self.describe(params.force_refresh, "Camera", |r| {
                let show = |pointer: &str| {
                    r.snapshot
                        .f64_at(pointer)
                        .map(|v| scene::round(v).to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                };
                format!(
                    "distance {}, fov {}",
                    show(scene::CAMERA_DISTANCE),
                    show(scene::CAMERA_FOV)
                )
            })
            .await,
        ))
    }

    #[tool(description = "Get the scene's background color.")]
    async fn get_background_color(
        &self,
        Parameters(params): Parameters<ReadParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.respond(
            self.describe(params.force_refresh, "Background color", |r| {
                r.snapshot
                    .str_at(scene::BACKGROUND_COLOR)
                    .unwrap_or("unknown")
                    .to_string()
            })
            .await,
        ))
    }

    // ── Relative edits ─────────────────────────────────────────────

    #[tool(description = "Move the model relative to its current position. Reads the current position (from cache unless force_refresh is set) and sends the resulting absolute position.")]
    async fn nudge_model(
        &self,
        Parameters(params): Parameters<OffsetParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let offset = (
            tools::finite("x", params.x)?,
            tools::finite("y", params.y)?,
            tools::finite("z", params.z)?,
        );
        Ok(self.respond(
            self.offset_model(scene::MODEL_POSITION, "position", offset, params.force_refresh)
                .await,
        ))
    }

    #[tool(description = "Rotate the model relative to its current rotation, in degrees around x, y and z.")]
    async fn rotate_model_by(
        &self,
        Parameters(params): Parameters<OffsetParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let offset = (
            tools::finite("x", params.x)?,
            tools::finite("y", params.y)?,
            tools::finite("z", params.z)?,
        );
        Ok(self.respond(
            self.offset_model(scene::MODEL_ROTATION, "rotation", offset, params.force_refresh)
                .await,
        ))
    }

    #[tool(description = "Multiply the model's current scale by a factor, e.g. 2 doubles it and 0.5 halves it.")]
    async fn scale_model_by(
        &self,
        Parameters(params): Parameters<FactorParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let factor = tools::positive("factor", params.factor)?;
        let outcome = async {
            let reading = self.read_state(params.force_refresh).await?;
            let current = Vec3::read(&reading.snapshot, scene::MODEL_SCALE)
                .ok_or_else(|| missing("model scale"))?;
            let target = current.scaled(factor);
            self.send(
                Command::ScaleModel {
                    x: target.x,
                    y: target.y,
                    z: target.z,
                },
                format!(
                    "Scaled model by {factor} from {current} to {target}, {}",
                    reading.basis()
                ),
            )
        }
        .await;
        Ok(self.respond(outcome))
    }

    #[tool(description = "Darken the model's current color by a percentage (0-100) toward black.")]
    async fn darken_model_by(
        &self,
        Parameters(params): Parameters<PercentParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let percent = tools::percent(params.percent)?;
        Ok(self.respond(self.shade_model(percent, true, params.force_refresh).await))
    }

    #[tool(description = "Lighten the model's current color by a percentage (0-100) toward white.")]
    async fn lighten_model_by(
        &self,
        Parameters(params): Parameters<PercentParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let percent = tools::percent(params.percent)?;
        Ok(self.respond(self.shade_model(percent, false, params.force_refresh).await))
    }

    #[tool(description = "Add to the key light's current intensity; use a negative delta to dim it.")]
    async fn adjust_key_light_intensity_by(
        &self,
        Parameters(params): Parameters<DeltaParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let delta = tools::finite("delta", params.delta)?;
        Ok(self.respond(
            self.adjust_light(Light::Key, delta, params.force_refresh)
                .await,
        ))
    }

    #[tool(description = "Add to the fill light's current intensity; use a negative delta to dim it.")]
    async fn adjust_fill_light_intensity_by(
        &self,
        Parameters(params): Parameters<DeltaParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let delta = tools::finite("delta", params.delta)?;
        Ok(self.respond(
            self.adjust_light(Light::Fill, delta, params.force_refresh)
                .await,
        ))
    }

    #[tool(description = "Zoom the camera by a factor relative to its current distance: 2 moves twice as close, 0.5 twice as far.")]
    async fn zoom_camera_by(
        &self,
        Parameters(params): Parameters<FactorParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let factor = tools::positive("factor", params.factor)?;
        let outcome = async {
            let reading = self.read_state(params.force_refresh).await?;
            let current = reading
                .snapshot
                .f64_at(scene::CAMERA_DISTANCE)
                .ok_or_else(|| missing("camera distance"))?;
            let target = current / factor;
            self.send(
                Command::SetCameraDistance { distance: target },
                format!(
                    "Zoomed camera by {factor} from distance {} to {}, {}",
                    scene::round(current),
                    scene::round(target),
                    reading.basis()
                ),
            )
        }
        .await;
        Ok(self.respond(outcome))
    }

    // ── Session ────────────────────────────────────────────────────

    #[tool(description = "Get the URL that opens a viewer connected to this conversation's session.")]
    async fn get_viewer_url(&self) -> Result<CallToolResult, ErrorData> {
        let outcome = current_session()
            .ok_or(BridgeError::NoSession)
            .map(|session| {
                format!(
                    "Open {} to view the scene for session {session}",
                    self.config.viewer_url(&session)
                )
            });
        Ok(self.respond(outcome))
    }

    #[tool(description = "Report this session's connection status, cached state and pending queries as JSON.")]
    async fn get_session_info(&self) -> Result<CallToolResult, ErrorData> {
        let Some(session) = current_session() else {
            return Ok(self.respond(Err(BridgeError::NoSession)));
        };
        let info = self.bridge.session_info(&session);
        Ok(text(serde_json::to_string(&info).unwrap_or_default()))
    }
}

impl ServerHandler for SceneMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "scenebridge".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Drives a browser-based 3D viewer: set model, light, camera and scene \
                     properties, and read the viewer's state back."
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use get_viewer_url first and ask the user to open it. Write tools apply \
                 absolute values and return once the command is sent. Read tools answer \
                 from cache by default and say so; pass force_refresh=true if the user \
                 may have changed the scene by hand. Prefer the *_by tools for relative \
                 changes; they report which state they were computed from."
                    .to_string(),
            ),
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let session = self.source.resolve(&context);
        let tool = request.name.clone();
        let tcc = ToolCallContext::new(self, request, context);
        match session {
            Some(id) => {
                tracing::debug!(session = %id, tool = %tool, "tool call");
                with_session(id, self.tool_router.call(tcc)).await
            }
            None => {
                tracing::debug!(tool = %tool, "tool call without a session");
                self.tool_router.call(tcc).await
            }
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.tool_router.list_all()))
    }
}

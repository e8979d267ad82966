//! scenebridge: lets an MCP agent drive a browser-based 3D viewer.
//!
//! The routing core (transport registry, correlation table, state cache,
//! reconciler, command router) lives behind [`bridge::Bridge`]. The HTTP
//! surface in [`api`] carries viewer WebSockets and, in serve mode, MCP over
//! Streamable HTTP; [`mcp`] is the tool layer on top.

pub mod api;
pub mod bridge;
pub mod cache;
pub mod command;
pub mod config;
pub mod correlation;
pub mod error;
pub mod mcp;
pub mod protocol;
pub mod reconcile;
pub mod router;
pub mod scene;
pub mod session;
pub mod transport;

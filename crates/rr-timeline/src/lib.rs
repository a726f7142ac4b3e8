//! Timeline chart rendering.
//!
//! Turns per-participant presence and streaming intervals into a PNG chart
//! with an adaptive time axis. Drawing goes through the [`Canvas`] trait;
//! [`Raster`] is the bundled in-memory implementation.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod color;
pub mod frame;
mod glyph;
pub mod layout;
pub mod png;
pub mod raster;
pub mod render;
pub mod request;
pub mod ticks;

pub use color::{Rgba, main_color, palette_color};
pub use frame::frame_end;
pub use layout::{Geometry, Layout, Padding};
pub use raster::{Canvas, Raster, Rect};
pub use render::{Emphasis, Entry, PresenceSection, Section, Timeline};
pub use request::RenderRequest;
pub use ticks::{Tick, TickWeight, choose_ticks};

/// Rendering errors.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The chart would end before it starts.
    #[error("frame end {frame_end} precedes start {start}")]
    InvalidFrame {
        start: DateTime<Utc>,
        frame_end: DateTime<Utc>,
    },
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("failed to decode PNG: {0}")]
    PngDecode(#[from] ::png::DecodingError),
    #[error("failed to encode PNG: {0}")]
    PngEncode(#[from] ::png::EncodingError),
    #[error("invalid colour: {0}")]
    InvalidColor(String),
    #[error("invalid render request: {0}")]
    InvalidRequest(String),
    #[error("failed to parse render request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

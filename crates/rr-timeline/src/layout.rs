//! Chart geometry.

use serde::{Deserialize, Serialize};

use crate::raster::Rect;

/// Image padding on each side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Padding {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

/// Column and row sizes for the timeline chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Top padding leaves room for the two rows of tick labels.
    pub padding: Padding,
    pub row_height: f64,
    pub headline_width: f64,
    pub timeline_width: f64,
    /// Thickness of a presence bar within its row.
    pub online_bar_width: f64,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            padding: Padding {
                top: 40.0,
                right: 10.0,
                bottom: 10.0,
                left: 10.0,
            },
            row_height: 70.0,
            headline_width: 100.0,
            timeline_width: 900.0,
            online_bar_width: 20.0,
        }
    }
}

/// Widest height-to-width ratio before the timeline column is stretched (4:3).
const MAX_ASPECT: f64 = 3.0 / 4.0;

/// Resolved positions for one render.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    /// Avatar column spanning all rows.
    pub headline: Rect,
    /// Chart area spanning all rows.
    pub timeline: Rect,
    pub row_height: f64,
    pub bar_thickness: f64,
}

impl Geometry {
    /// Headline cell for row `index`.
    pub fn headline_cell(&self, index: usize) -> Rect {
        Rect::new(
            self.headline.x,
            self.row_top(index),
            self.headline.w,
            self.row_height,
        )
    }

    /// Timeline cell for row `index`.
    pub fn timeline_cell(&self, index: usize) -> Rect {
        Rect::new(
            self.timeline.x,
            self.row_top(index),
            self.timeline.w,
            self.row_height,
        )
    }

    /// X coordinate of fractional position `fraction` along the time axis.
    pub fn x_at(&self, fraction: f64) -> f64 {
        self.timeline.x + self.timeline.w * fraction.clamp(0.0, 1.0)
    }

    fn row_top(&self, index: usize) -> f64 {
        self.timeline.y + self.row_height * index as f64
    }
}

impl Layout {
    /// Lays out `rows` participant rows.
    ///
    /// The right margin also reserves `online_bar_width` so the last tick
    /// label is not cut off.
    pub fn geometry(&self, rows: usize) -> Geometry {
        let p = self.padding;
        let base_width =
            p.left + self.headline_width + self.timeline_width + self.online_bar_width + p.right;
        let height = p.top + self.row_height * rows as f64 + p.bottom;

        let mut timeline_width = self.timeline_width;
        if height / base_width > MAX_ASPECT {
            timeline_width += height / MAX_ASPECT - base_width;
        }
        let width = base_width - self.timeline_width + timeline_width;

        let body_height = self.row_height * rows as f64;
        Geometry {
            width: width.ceil() as u32,
            height: height.ceil() as u32,
            headline: Rect::new(p.left, p.top, self.headline_width, body_height),
            timeline: Rect::new(
                p.left + self.headline_width,
                p.top,
                timeline_width,
                body_height,
            ),
            row_height: self.row_height,
            bar_thickness: self.online_bar_width.min(self.row_height),
        }
    }
}

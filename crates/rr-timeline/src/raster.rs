//! Drawing surface abstraction and an in-memory RGBA implementation.

use crate::RenderError;
use crate::color::Rgba;
use crate::glyph;

/// Scale factor applied to the bitmap font.
pub const TEXT_SCALE: u32 = 2;

/// Axis-aligned rectangle in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }
}

/// The drawing primitives the timeline chart needs.
pub trait Canvas {
    fn fill_rect(&mut self, rect: Rect, color: Rgba);

    /// One pixel wide vertical line from `top` to `bottom`.
    fn vline(&mut self, x: f64, top: f64, bottom: f64, color: Rgba);

    /// Draws `text` with the bottom centre of its box at (`x`, `y`).
    fn text(&mut self, text: &str, x: f64, y: f64, color: Rgba);

    fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64, color: Rgba);

    /// Draws `image` scaled into the circle's bounding box, clipped to the circle.
    fn image_circle(&mut self, image: &Raster, cx: f64, cy: f64, radius: f64);
}

/// An owned RGBA8 pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Raster {
    pub fn new(width: u32, height: u32, fill: Rgba) -> Self {
        let count = width as usize * height as usize;
        let mut data = Vec::with_capacity(count * 4);
        for _ in 0..count {
            data.extend_from_slice(&[fill.r, fill.g, fill.b, fill.a]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wraps raw RGBA8 bytes in row-major order.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, RenderError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(RenderError::InvalidImage(format!(
                "expected {expected} bytes for {width}x{height}, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_pixels(width: u32, height: u32, pixels: &[Rgba]) -> Result<Self, RenderError> {
        let data = pixels.iter().flat_map(|p| [p.r, p.g, p.b, p.a]).collect();
        Self::from_rgba(width, height, data)
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some(Rgba {
            r: self.data[i],
            g: self.data[i + 1],
            b: self.data[i + 2],
            a: self.data[i + 3],
        })
    }

    pub fn pixels(&self) -> impl Iterator<Item = Rgba> + '_ {
        self.data.chunks_exact(4).map(|p| Rgba {
            r: p[0],
            g: p[1],
            b: p[2],
            a: p[3],
        })
    }

    const fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// Source-over blend of `color` onto the pixel at (`x`, `y`); out of bounds is ignored.
    fn blend(&mut self, x: i64, y: i64, color: Rgba) {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return;
        }
        let i = self.offset(x as u32, y as u32);
        let a = u32::from(color.a);
        let mix = |src: u8, dst: u8| -> u8 {
            ((u32::from(src) * a + u32::from(dst) * (255 - a) + 127) / 255) as u8
        };
        self.data[i] = mix(color.r, self.data[i]);
        self.data[i + 1] = mix(color.g, self.data[i + 1]);
        self.data[i + 2] = mix(color.b, self.data[i + 2]);
        let dst_a = u32::from(self.data[i + 3]);
        self.data[i + 3] = (a + (dst_a * (255 - a) + 127) / 255) as u8;
    }

    fn span(from: f64, to: f64) -> std::ops::Range<i64> {
        (from.round() as i64)..(to.round() as i64)
    }

    fn circle_bounds(cx: f64, cy: f64, radius: f64) -> (std::ops::Range<i64>, std::ops::Range<i64>) {
        (
            Self::span(cx - radius, cx + radius),
            Self::span(cy - radius, cy + radius),
        )
    }

    fn in_circle(px: i64, py: i64, cx: f64, cy: f64, radius: f64) -> bool {
        let dx = px as f64 + 0.5 - cx;
        let dy = py as f64 + 0.5 - cy;
        dx * dx + dy * dy <= radius * radius
    }
}

impl Canvas for Raster {
    fn fill_rect(&mut self, rect: Rect, color: Rgba) {
        for y in Self::span(rect.y, rect.bottom()) {
            for x in Self::span(rect.x, rect.right()) {
                self.blend(x, y, color);
            }
        }
    }

    fn vline(&mut self, x: f64, top: f64, bottom: f64, color: Rgba) {
        let x = x.round() as i64;
        for y in Self::span(top, bottom) {
            self.blend(x, y, color);
        }
    }

    fn text(&mut self, text: &str, x: f64, y: f64, color: Rgba) {
        let width = f64::from(glyph::text_width(text) * TEXT_SCALE);
        let height = f64::from(glyph::GLYPH_HEIGHT * TEXT_SCALE);
        let left = (x - width / 2.0).round() as i64;
        let top = (y - height).round() as i64;
        let scale = i64::from(TEXT_SCALE);
        for (gx, gy) in glyph::lit_pixels(text) {
            for dy in 0..scale {
                for dx in 0..scale {
                    self.blend(
                        left + i64::from(gx) * scale + dx,
                        top + i64::from(gy) * scale + dy,
                        color,
                    );
                }
            }
        }
    }

    fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64, color: Rgba) {
        let (xs, ys) = Self::circle_bounds(cx, cy, radius);
        for y in ys {
            for x in xs.clone() {
                if Self::in_circle(x, y, cx, cy, radius) {
                    self.blend(x, y, color);
                }
            }
        }
    }

    fn image_circle(&mut self, image: &Raster, cx: f64, cy: f64, radius: f64) {
        if image.width == 0 || image.height == 0 || radius <= 0.0 {
            return;
        }
        let diameter = radius * 2.0;
        let (xs, ys) = Self::circle_bounds(cx, cy, radius);
        for y in ys {
            for x in xs.clone() {
                if !Self::in_circle(x, y, cx, cy, radius) {
                    continue;
                }
                let u = (x as f64 + 0.5 - (cx - radius)) / diameter;
                let v = (y as f64 + 0.5 - (cy - radius)) / diameter;
                let sx = ((u * f64::from(image.width)) as u32).min(image.width - 1);
                let sy = ((v * f64::from(image.height)) as u32).min(image.height - 1);
                if let Some(src) = image.pixel(sx, sy) {
                    self.blend(x, y, src);
                }
            }
        }
    }
}

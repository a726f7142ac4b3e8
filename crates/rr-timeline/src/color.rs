//! Colours and avatar colour extraction.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::RenderError;
use crate::raster::Raster;

/// Straight-alpha RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    #[must_use]
    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    const fn is_whitish(self) -> bool {
        self.r > 0xBF && self.g > 0xBF && self.b > 0xBF
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

impl FromStr for Rgba {
    type Err = RenderError;

    /// Parses `#rrggbb` or `#rrggbbaa`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RenderError::InvalidColor(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a,
        })
    }
}

impl Serialize for Rgba {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Most frequent visible, non-white pixel colour of an avatar.
///
/// All-white or fully transparent avatars fall back to black.
pub fn main_color(image: &Raster) -> Rgba {
    let mut counts: HashMap<Rgba, usize> = HashMap::new();
    for pixel in image.pixels() {
        if pixel.a == 0 || pixel.is_whitish() {
            continue;
        }
        *counts.entry(pixel).or_default() += 1;
    }

    // Ties resolve to the smallest colour value so output is stable.
    counts
        .into_iter()
        .max_by(|(ca, na), (cb, nb)| {
            na.cmp(nb)
                .then_with(|| (cb.r, cb.g, cb.b, cb.a).cmp(&(ca.r, ca.g, ca.b, ca.a)))
        })
        .map_or(Rgba::BLACK, |(color, _)| color)
}

const PALETTE: [Rgba; 8] = [
    Rgba::rgb(0x1f, 0x77, 0xb4),
    Rgba::rgb(0xff, 0x7f, 0x0e),
    Rgba::rgb(0x2c, 0xa0, 0x2c),
    Rgba::rgb(0xd6, 0x27, 0x28),
    Rgba::rgb(0x94, 0x67, 0xbd),
    Rgba::rgb(0x8c, 0x56, 0x4b),
    Rgba::rgb(0xe3, 0x77, 0xc2),
    Rgba::rgb(0x17, 0xbe, 0xcf),
];

/// Stable colour for a participant without an avatar.
pub const fn palette_color(key: u64) -> Rgba {
    PALETTE[(key % PALETTE.len() as u64) as usize]
}

//! PNG codec for chart output and avatar input.
//!
//! Encoding always writes 8-bit RGBA. Decoding accepts anything the `png`
//! crate reads (palette, 16-bit, low bit depth, interlaced) and normalizes it
//! to 8-bit RGBA.

use ::png::{BitDepth, ColorType, Decoder, Encoder, Transformations};

use crate::RenderError;
use crate::raster::Raster;

/// Guard against decompression bombs in untrusted avatars.
const MAX_DIMENSION: u32 = 4_096;

pub fn encode(raster: &Raster) -> Result<Vec<u8>, RenderError> {
    let mut out = Vec::with_capacity(raster.as_bytes().len() / 4);
    let mut encoder = Encoder::new(&mut out, raster.width(), raster.height());
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(raster.as_bytes())?;
    writer.finish()?;
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Raster, RenderError> {
    let mut decoder = Decoder::new(bytes);
    decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;

    let (width, height) = (reader.info().width, reader.info().height);
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(RenderError::InvalidImage(format!(
            "unsupported PNG: dimensions {width}x{height}"
        )));
    }

    let mut buf = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf)?;
    let pixels = &buf[..frame.buffer_size()];
    let rgba = match frame.color_type {
        ColorType::Rgba => pixels.to_vec(),
        ColorType::Rgb => pixels
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        ColorType::Grayscale => pixels.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        ColorType::GrayscaleAlpha => pixels
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        ColorType::Indexed => {
            return Err(RenderError::InvalidImage(
                "palette was not expanded".to_string(),
            ));
        }
    };
    Raster::from_rgba(frame.width, frame.height, rgba)
}

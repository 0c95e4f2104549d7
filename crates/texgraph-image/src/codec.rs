//! Still-image decode/encode for stage inputs and persistence.
//!
//! Decoded images always come back as RGBA8; stages that want another layout
//! convert at upload time.

use std::path::Path;

use image::ImageFormat;
use texgraph_core::EngineError;

use crate::{Image, PixelFormat};

/// Decodes an image file into an RGBA8 [`Image`].
pub fn read_image(path: impl AsRef<Path>) -> Result<Image, EngineError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_image_mem(&bytes)
}

/// Decodes an in-memory encoded image (PNG/JPEG) into an RGBA8 [`Image`].
pub fn read_image_mem(data: &[u8]) -> Result<Image, EngineError> {
    let decoded = image::load_from_memory(data)
        .map_err(|e| EngineError::Decode(e.to_string()))?
        .to_rgba8();
    let (w, h) = decoded.dimensions();
    let mut img = Image::new(w, h, PixelFormat::Rgba8);
    img.set_bytes(decoded.as_raw())?;
    Ok(img)
}

/// Encodes an image losslessly as PNG into `out`.
///
/// Only 8-bit layouts are supported; HDR layouts must be tonemapped or packed
/// (e.g. RGBM) before persistence.
pub fn encode_png(img: &Image, out: &mut Vec<u8>) -> Result<(), EngineError> {
    let rgba = to_rgba8_bytes(img)?;
    let mut cursor = std::io::Cursor::new(Vec::new());
    image::write_buffer_with_format(
        &mut cursor,
        &rgba,
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgba8,
        ImageFormat::Png,
    )
    .map_err(|e| EngineError::Encode(e.to_string()))?;
    *out = cursor.into_inner();
    Ok(())
}

/// Encodes an image to a PNG file.
pub fn write_image(path: impl AsRef<Path>, img: &Image) -> Result<(), EngineError> {
    let mut png = Vec::new();
    encode_png(img, &mut png)?;
    let path = path.as_ref();
    std::fs::write(path, png).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Expands any 8-bit layout to tightly packed RGBA8 bytes (mip 0, face 0).
fn to_rgba8_bytes(img: &Image) -> Result<Vec<u8>, EngineError> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let src = img.bytes();
    let mut out = vec![0u8; w * h * 4];
    match img.format() {
        PixelFormat::Rgba8 | PixelFormat::Rgbm | PixelFormat::Rgbe => {
            out.copy_from_slice(&src[..w * h * 4]);
        }
        PixelFormat::Bgra8 => {
            for (dst, px) in out.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                dst.copy_from_slice(&[px[2], px[1], px[0], px[3]]);
            }
        }
        PixelFormat::Rgb8 => {
            for (dst, px) in out.chunks_exact_mut(4).zip(src.chunks_exact(3)) {
                dst.copy_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
        PixelFormat::Bgr8 => {
            for (dst, px) in out.chunks_exact_mut(4).zip(src.chunks_exact(3)) {
                dst.copy_from_slice(&[px[2], px[1], px[0], 255]);
            }
        }
        other => {
            return Err(EngineError::Encode(format!(
                "cannot encode {other:?} losslessly as PNG"
            )))
        }
    }
    Ok(out)
}

#![forbid(unsafe_code)]

//! texgraph image model and codecs.
//!
//! [`Image`] is the CPU-side pixel container every backend reads and writes:
//! a format-tagged, mip/cube-face-aware byte buffer that owns its storage.
//! Decode/encode goes through the `image` crate; RGBM packing helpers live
//! here because both the CPU kernels and the GL uploader need them.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod codec;
pub mod rgbm;

use texgraph_core::EngineError;

/// Pixel layouts the engine can represent.
///
/// Backends must accept any of these through the same interface and convert
/// internally if their native storage differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Bgr8,
    Rgb8,
    Rgb16,
    Rgb16F,
    Rgb32F,
    /// Shared-exponent HDR (8:8:8:8, exponent in alpha).
    Rgbe,
    Bgra8,
    Rgba8,
    Rgba16,
    Rgba16F,
    Rgba32F,
    /// Range-compressed HDR: RGB scaled by a multiplier stored in alpha.
    Rgbm,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 12] = [
        PixelFormat::Bgr8,
        PixelFormat::Rgb8,
        PixelFormat::Rgb16,
        PixelFormat::Rgb16F,
        PixelFormat::Rgb32F,
        PixelFormat::Rgbe,
        PixelFormat::Bgra8,
        PixelFormat::Rgba8,
        PixelFormat::Rgba16,
        PixelFormat::Rgba16F,
        PixelFormat::Rgba32F,
        PixelFormat::Rgbm,
    ];

    /// Storage cost of one pixel, in bytes.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Rgb16 | PixelFormat::Rgb16F => 6,
            PixelFormat::Rgb32F => 12,
            PixelFormat::Rgbe | PixelFormat::Bgra8 | PixelFormat::Rgba8 | PixelFormat::Rgbm => 4,
            PixelFormat::Rgba16 | PixelFormat::Rgba16F => 8,
            PixelFormat::Rgba32F => 16,
        }
    }

    pub fn component_count(self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 | PixelFormat::Rgb16 | PixelFormat::Rgb16F
            | PixelFormat::Rgb32F => 3,
            _ => 4,
        }
    }
}

/// A format-tagged pixel buffer owning its storage.
///
/// Invariant: `bytes.len() == data_size()` whenever the image is allocated.
/// Reassigning pixel data through [`Image::set_bytes`] reallocates only if the
/// size changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    format: PixelFormat,
    num_mips: u8,
    /// 1 for 2D images, 6 for cube maps.
    num_faces: u8,
    bytes: Vec<u8>,
}

impl Default for Image {
    fn default() -> Self {
        Self::empty()
    }
}

impl Image {
    /// An unallocated image (zero dimensions, no storage).
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Rgba8,
            num_mips: 1,
            num_faces: 1,
            bytes: Vec::new(),
        }
    }

    /// Allocates a zero-filled 2D image.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::with_layout(width, height, format, 1, 1)
    }

    /// Allocates a zero-filled image with an explicit mip/face layout.
    pub fn with_layout(
        width: u32,
        height: u32,
        format: PixelFormat,
        num_mips: u8,
        num_faces: u8,
    ) -> Self {
        let mut img = Self {
            width,
            height,
            format,
            num_mips: num_mips.max(1),
            num_faces: if num_faces == 6 { 6 } else { 1 },
            bytes: Vec::new(),
        };
        let size = img.data_size();
        img.bytes = vec![0; size];
        img
    }

    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn format(&self) -> PixelFormat {
        self.format
    }
    pub fn num_mips(&self) -> u8 {
        self.num_mips
    }
    pub fn num_faces(&self) -> u8 {
        self.num_faces
    }
    pub fn is_cube(&self) -> bool {
        self.num_faces == 6
    }

    /// Total byte size mandated by the current dimensions/format/layout.
    pub fn data_size(&self) -> usize {
        let mut per_face = 0usize;
        for mip in 0..self.num_mips {
            let (w, h) = self.mip_dimensions(mip);
            per_face += (w as usize) * (h as usize) * self.format.bytes_per_pixel();
        }
        per_face * self.num_faces as usize
    }

    pub fn mip_dimensions(&self, mip: u8) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    /// Byte offset of `(face, mip)` within the buffer. Faces are stored
    /// contiguously, each with its full mip chain.
    pub fn face_mip_offset(&self, face: u8, mip: u8) -> usize {
        let mut per_face = 0usize;
        for m in 0..self.num_mips {
            let (w, h) = self.mip_dimensions(m);
            per_face += (w as usize) * (h as usize) * self.format.bytes_per_pixel();
        }
        let mut off = per_face * face as usize;
        for m in 0..mip {
            let (w, h) = self.mip_dimensions(m);
            off += (w as usize) * (h as usize) * self.format.bytes_per_pixel();
        }
        off
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Replaces the pixel data. The buffer is reallocated only when the size
    /// changed; the caller is responsible for `bytes` matching the declared
    /// layout.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        if bytes.len() != self.data_size() {
            return Err(EngineError::other(format!(
                "image bytes: expected {} bytes, got {}",
                self.data_size(),
                bytes.len()
            )));
        }
        if self.bytes.len() != bytes.len() {
            self.bytes = bytes.to_vec();
        } else {
            self.bytes.copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Resizes the image, dropping prior contents. Storage is freed and
    /// reallocated when the byte size changes.
    pub fn reallocate(&mut self, width: u32, height: u32, format: PixelFormat) {
        self.width = width;
        self.height = height;
        self.format = format;
        self.num_mips = 1;
        self.num_faces = 1;
        let size = self.data_size();
        if self.bytes.len() != size {
            self.bytes = vec![0; size];
        } else {
            self.bytes.fill(0);
        }
    }

    /// Releases the pixel storage, leaving an unallocated image.
    pub fn release(&mut self) {
        *self = Self::empty();
    }
}

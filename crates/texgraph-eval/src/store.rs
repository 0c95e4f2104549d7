//! GPU texture/render-target lifecycle seam.
//!
//! The orchestrator and backends allocate, resize, upload and read back
//! through [`TextureStore`]; the glow implementation lives in
//! `texgraph-runtime-glow`, and [`CpuStore`] backs offline evaluation and
//! resource-lifecycle tests.

use std::collections::HashMap;

use texgraph_core::EngineError;
use texgraph_image::{codec, Image, PixelFormat};

/// Opaque texture handle minted by a [`TextureStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexId(pub u64);

pub trait TextureStore {
    /// Allocates a 2D target, optionally with a depth attachment.
    fn alloc_2d(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        depth: bool,
    ) -> Result<TexId, EngineError>;

    /// Allocates a cube target (6 faces, one edge length). Cube targets never
    /// take the 2D depth path; the two setups are distinct by contract.
    fn alloc_cube(&mut self, size: u32, format: PixelFormat) -> Result<TexId, EngineError>;

    /// Resizes a target. Prior storage is released before reallocating, so
    /// repeated interactive resizes never accumulate dead handles.
    fn resize(&mut self, tex: TexId, width: u32, height: u32) -> Result<(), EngineError>;

    /// Uploads CPU pixels. `cube_face` selects one face of a cube target.
    fn upload(
        &mut self,
        tex: TexId,
        image: &Image,
        cube_face: Option<u8>,
    ) -> Result<(), EngineError>;

    /// Reads pixels back into a CPU image.
    fn readback(&self, tex: TexId) -> Result<Image, EngineError>;

    /// Releases a texture and everything attached to it.
    fn free(&mut self, tex: TexId);

    /// The backend-native handle (e.g. a GL texture name), for hosts that
    /// display stage outputs directly. `None` for CPU stores.
    fn native_handle(&self, tex: TexId) -> Option<u64>;

    /// Metadata query: `(width, height, is_cube)` without touching pixel
    /// data. `None` for unknown handles. The walk consults this every time a
    /// dirty stage is visited, so implementations must keep it cheap.
    fn describe(&self, tex: TexId) -> Option<(u32, u32, bool)>;
}

#[derive(Debug, Clone)]
struct CpuEntry {
    image: Image,
    depth: bool,
    cube: bool,
}

/// In-memory [`TextureStore`]: every texture is just an [`Image`].
///
/// Besides powering offline (native-backend-only) evaluation, it counts
/// allocations and releases so tests can assert that no handle leaks across
/// resizes and deletions.
#[derive(Debug, Default)]
pub struct CpuStore {
    next: u64,
    entries: HashMap<TexId, CpuEntry>,
    allocated_total: u64,
    freed_total: u64,
}

impl CpuStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently live allocations.
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    pub fn allocated_total(&self) -> u64 {
        self.allocated_total
    }

    pub fn freed_total(&self) -> u64 {
        self.freed_total
    }

    fn mint(&mut self, entry: CpuEntry) -> TexId {
        let id = TexId(self.next);
        self.next += 1;
        self.allocated_total += 1;
        self.entries.insert(id, entry);
        id
    }

    fn entry_mut(&mut self, tex: TexId) -> Result<&mut CpuEntry, EngineError> {
        self.entries
            .get_mut(&tex)
            .ok_or_else(|| EngineError::other(format!("unknown texture {tex:?}")))
    }
}

impl TextureStore for CpuStore {
    fn alloc_2d(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        depth: bool,
    ) -> Result<TexId, EngineError> {
        Ok(self.mint(CpuEntry {
            image: Image::new(width, height, format),
            depth,
            cube: false,
        }))
    }

    fn alloc_cube(&mut self, size: u32, format: PixelFormat) -> Result<TexId, EngineError> {
        Ok(self.mint(CpuEntry {
            image: Image::with_layout(size, size, format, 1, 6),
            depth: false,
            cube: true,
        }))
    }

    fn resize(&mut self, tex: TexId, width: u32, height: u32) -> Result<(), EngineError> {
        let entry = self.entry_mut(tex)?;
        let format = entry.image.format();
        if entry.cube {
            entry.image = Image::with_layout(width, width, format, 1, 6);
        } else {
            entry.image.reallocate(width, height, format);
        }
        // Model the release-then-reallocate contract explicitly so leak
        // accounting sees both sides.
        self.freed_total += 1;
        self.allocated_total += 1;
        Ok(())
    }

    fn upload(
        &mut self,
        tex: TexId,
        image: &Image,
        cube_face: Option<u8>,
    ) -> Result<(), EngineError> {
        let entry = self.entry_mut(tex)?;
        match cube_face {
            None => {
                entry.image = image.clone();
            }
            Some(face) => {
                if face >= 6 {
                    return Err(EngineError::other(format!("cube face {face} out of range")));
                }
                if !entry.cube {
                    return Err(EngineError::other("cube-face upload to a 2D texture"));
                }
                let face_len = image.data_size();
                let off = entry.image.face_mip_offset(face, 0);
                entry.image.bytes_mut()[off..off + face_len].copy_from_slice(image.bytes());
            }
        }
        Ok(())
    }

    fn readback(&self, tex: TexId) -> Result<Image, EngineError> {
        self.entries
            .get(&tex)
            .map(|e| e.image.clone())
            .ok_or_else(|| EngineError::other(format!("unknown texture {tex:?}")))
    }

    fn free(&mut self, tex: TexId) {
        if self.entries.remove(&tex).is_some() {
            self.freed_total += 1;
        }
    }

    fn native_handle(&self, _tex: TexId) -> Option<u64> {
        None
    }

    fn describe(&self, tex: TexId) -> Option<(u32, u32, bool)> {
        self.entries
            .get(&tex)
            .map(|e| (e.image.width(), e.image.height(), e.cube))
    }
}

/// Synchronous, filename-keyed cache of uploaded stock textures.
///
/// Entries are write-once and live for the process lifetime; this is a
/// separate concern from per-stage output caching.
#[derive(Debug, Default)]
pub struct TextureCache {
    entries: HashMap<String, TexId>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached texture for `filename`, decoding and uploading on
    /// first use.
    pub fn get_texture(
        &mut self,
        store: &mut dyn TextureStore,
        filename: &str,
    ) -> Result<TexId, EngineError> {
        if let Some(id) = self.entries.get(filename) {
            return Ok(*id);
        }
        let image = codec::read_image(filename)?;
        let tex = store.alloc_2d(image.width(), image.height(), image.format(), false)?;
        store.upload(tex, &image, None)?;
        self.entries.insert(filename.to_string(), tex);
        Ok(tex)
    }

    /// Frees every cached texture and forgets the entries.
    pub fn clear(&mut self, store: &mut dyn TextureStore) {
        for (_, tex) in self.entries.drain() {
            store.free(tex);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_store_tracks_live_allocations() {
        let mut store = CpuStore::new();
        let a = store.alloc_2d(4, 4, PixelFormat::Rgba8, false).unwrap();
        let b = store.alloc_cube(8, PixelFormat::Rgbm).unwrap();
        assert_eq!(store.live_count(), 2);
        store.free(a);
        store.free(b);
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.allocated_total(), store.freed_total());
    }

    #[test]
    fn resize_reports_new_dimensions() {
        let mut store = CpuStore::new();
        let t = store.alloc_2d(4, 4, PixelFormat::Rgba8, false).unwrap();
        store.resize(t, 16, 8).unwrap();
        let img = store.readback(t).unwrap();
        assert_eq!((img.width(), img.height()), (16, 8));
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn describe_reports_dimensions_and_topology() {
        let mut store = CpuStore::new();
        let flat = store.alloc_2d(8, 4, PixelFormat::Rgba8, false).unwrap();
        let cube = store.alloc_cube(16, PixelFormat::Rgba8).unwrap();
        assert_eq!(store.describe(flat), Some((8, 4, false)));
        assert_eq!(store.describe(cube), Some((16, 16, true)));
        store.free(flat);
        assert_eq!(store.describe(flat), None);
    }

    #[test]
    fn resize_of_unknown_texture_leaves_accounting_untouched() {
        let mut store = CpuStore::new();
        let t = store.alloc_2d(4, 4, PixelFormat::Rgba8, false).unwrap();
        store.free(t);
        assert!(store.resize(t, 8, 8).is_err());
        assert_eq!(store.allocated_total(), 1);
        assert_eq!(store.freed_total(), 1);
    }

    #[test]
    fn cube_face_upload_lands_in_the_right_slice() {
        let mut store = CpuStore::new();
        let t = store.alloc_cube(2, PixelFormat::Rgba8).unwrap();
        let mut face = Image::new(2, 2, PixelFormat::Rgba8);
        face.bytes_mut().fill(7);
        store.upload(t, &face, Some(3)).unwrap();
        let all = store.readback(t).unwrap();
        let off = all.face_mip_offset(3, 0);
        assert!(all.bytes()[off..off + 16].iter().all(|&b| b == 7));
        assert!(all.bytes()[..off].iter().all(|&b| b == 0));
    }

    #[test]
    fn cube_face_upload_to_2d_is_rejected() {
        let mut store = CpuStore::new();
        let t = store.alloc_2d(2, 2, PixelFormat::Rgba8, false).unwrap();
        let face = Image::new(2, 2, PixelFormat::Rgba8);
        assert!(store.upload(t, &face, Some(0)).is_err());
    }
}

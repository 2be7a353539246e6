//! Surfaces, textures, flats and colormaps.
//!
//! Each resource owns its DMA storage through [`Synced`], which holds a device reference for as
//! long as the storage lives and, on drop, frees it through [`Device::release_synced`]: lock,
//! drain, free, unlock, drop the reference.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hdoom_dma::{DmaBlock, PagedBuffer};
use hdoom_protocol::{
    COLORMAP_MAX_COUNT, COLORMAP_SIZE, FLAT_SIZE, SURFACE_MAX_DIM, TEXTURE_MAX_HEIGHT,
    TEXTURE_MAX_SIZE,
};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::user::UserSlice;

/// Storage that may only be freed once the device is idle.
pub(crate) struct Synced<B> {
    device: Arc<Device>,
    storage: Option<B>,
}

impl<B> Synced<B> {
    fn new(device: &Arc<Device>, storage: B) -> Result<Self> {
        device.get()?;
        Ok(Self {
            device: Arc::clone(device),
            storage: Some(storage),
        })
    }
}

impl<B> Deref for Synced<B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.storage
            .as_ref()
            .expect("storage is only taken when the resource is dropped")
    }
}

impl<B> Drop for Synced<B> {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.device.release_synced(storage);
        }
    }
}

impl<B: fmt::Debug> fmt::Debug for Synced<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synced")
            .field("device", &self.device.minor())
            .field("storage", &self.storage)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Surface,
    Texture,
    Flat,
    ColorMaps,
}

/// Common view of every resource kind.
pub trait DeviceResource {
    const KIND: ResourceKind;

    fn device(&self) -> &Arc<Device>;

    fn belongs_to(&self, device: &Device) -> bool {
        std::ptr::eq(Arc::as_ptr(self.device()), device)
    }
}

/// Render target and copy source.
#[derive(Debug)]
pub struct Surface {
    width: u32,
    height: u32,
    /// Interlock epoch of the last batch that wrote this surface.
    stamp: AtomicU64,
    pub(crate) buffer: Synced<PagedBuffer>,
}

impl Surface {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Size of the pixel data in bytes.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub(crate) fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Relaxed)
    }

    pub(crate) fn set_stamp(&self, epoch: u64) {
        self.stamp.store(epoch, Ordering::Relaxed);
    }
}

impl DeviceResource for Surface {
    const KIND: ResourceKind = ResourceKind::Surface;

    fn device(&self) -> &Arc<Device> {
        &self.buffer.device
    }
}

#[derive(Debug)]
pub struct Texture {
    size: u32,
    height: u32,
    pub(crate) buffer: Synced<PagedBuffer>,
}

impl Texture {
    /// Size rounded up to 256 bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Wrap height in texels, 0 for no wrapping.
    pub fn height(&self) -> u32 {
        self.height
    }
}

impl DeviceResource for Texture {
    const KIND: ResourceKind = ResourceKind::Texture;

    fn device(&self) -> &Arc<Device> {
        &self.buffer.device
    }
}

/// A 64x64 texel floor/ceiling texture in a single page.
#[derive(Debug)]
pub struct Flat {
    pub(crate) page: Synced<DmaBlock>,
}

impl Flat {
    pub(crate) fn addr(&self) -> u32 {
        self.page.addr()
    }
}

impl DeviceResource for Flat {
    const KIND: ResourceKind = ResourceKind::Flat;

    fn device(&self) -> &Arc<Device> {
        &self.page.device
    }
}

/// An array of 256-entry palette remapping tables.
#[derive(Debug)]
pub struct ColorMaps {
    maps: Synced<Vec<DmaBlock>>,
}

impl ColorMaps {
    pub fn count(&self) -> usize {
        self.maps.len()
    }

    pub(crate) fn addr(&self, index: u8) -> Result<u32> {
        self.maps
            .get(usize::from(index))
            .map(DmaBlock::addr)
            .ok_or(Error::InvalidArgument("colormap index out of range"))
    }
}

impl DeviceResource for ColorMaps {
    const KIND: ResourceKind = ResourceKind::ColorMaps;

    fn device(&self) -> &Arc<Device> {
        &self.maps.device
    }
}

/// Caller-visible handle to any resource.
#[derive(Clone, Debug)]
pub enum Resource {
    Surface(Arc<Surface>),
    Texture(Arc<Texture>),
    Flat(Arc<Flat>),
    ColorMaps(Arc<ColorMaps>),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Surface(_) => ResourceKind::Surface,
            Resource::Texture(_) => ResourceKind::Texture,
            Resource::Flat(_) => ResourceKind::Flat,
            Resource::ColorMaps(_) => ResourceKind::ColorMaps,
        }
    }

    pub fn as_surface(&self) -> Option<&Arc<Surface>> {
        match self {
            Resource::Surface(s) => Some(s),
            _ => None,
        }
    }

    /// Resolves a copy source for `dst`: a surface of the same device with the same dimensions.
    pub(crate) fn source_for(&self, dst: &Surface) -> Result<&Surface> {
        let Resource::Surface(src) = self else {
            return Err(Error::InvalidArgument("copy source is not a surface"));
        };
        let src = same_device(src.as_ref(), dst.device())?;
        if src.width != dst.width || src.height != dst.height {
            return Err(Error::InvalidArgument("copy source dimensions differ"));
        }
        Ok(src)
    }

    pub(crate) fn texture(&self, device: &Device) -> Result<&Texture> {
        match self {
            Resource::Texture(t) => same_device(t.as_ref(), device),
            _ => Err(Error::InvalidArgument("handle is not a texture")),
        }
    }

    pub(crate) fn flat(&self, device: &Device) -> Result<&Flat> {
        match self {
            Resource::Flat(f) => same_device(f.as_ref(), device),
            _ => Err(Error::InvalidArgument("handle is not a flat")),
        }
    }

    pub(crate) fn colormaps(&self, device: &Device) -> Result<&ColorMaps> {
        match self {
            Resource::ColorMaps(c) => same_device(c.as_ref(), device),
            _ => Err(Error::InvalidArgument("handle is not a colormap array")),
        }
    }
}

fn same_device<'a, R: DeviceResource>(res: &'a R, device: &Device) -> Result<&'a R> {
    if res.belongs_to(device) {
        Ok(res)
    } else {
        Err(Error::InvalidArgument("handle belongs to another device"))
    }
}

impl From<Arc<Surface>> for Resource {
    fn from(s: Arc<Surface>) -> Self {
        Resource::Surface(s)
    }
}

impl From<Arc<Texture>> for Resource {
    fn from(t: Arc<Texture>) -> Self {
        Resource::Texture(t)
    }
}

impl From<Arc<Flat>> for Resource {
    fn from(f: Arc<Flat>) -> Self {
        Resource::Flat(f)
    }
}

impl From<Arc<ColorMaps>> for Resource {
    fn from(c: Arc<ColorMaps>) -> Self {
        Resource::ColorMaps(c)
    }
}

impl Device {
    pub fn create_surface(self: &Arc<Self>, width: u32, height: u32) -> Result<Arc<Surface>> {
        self.ensure_attached()?;
        if width == 0 || height == 0 || width % 64 != 0 {
            return Err(Error::InvalidArgument(
                "surface dimensions must be non-zero, width a multiple of 64",
            ));
        }
        if width > SURFACE_MAX_DIM || height > SURFACE_MAX_DIM {
            return Err(Error::Overflow("surface dimensions"));
        }
        let buffer = PagedBuffer::new(&self.page_pool, width as usize * height as usize)?;
        Ok(Arc::new(Surface {
            width,
            height,
            stamp: AtomicU64::new(0),
            buffer: Synced::new(self, buffer)?,
        }))
    }

    /// Creates a texture from the first `size` bytes of `data`.
    pub fn create_texture(
        self: &Arc<Self>,
        size: u32,
        height: u32,
        data: UserSlice<'_, u8>,
    ) -> Result<Arc<Texture>> {
        self.ensure_attached()?;
        if size == 0 {
            return Err(Error::InvalidArgument("texture size is zero"));
        }
        if size > TEXTURE_MAX_SIZE || height > TEXTURE_MAX_HEIGHT {
            return Err(Error::Overflow("texture dimensions"));
        }
        let rounded = size.next_multiple_of(256);
        let buffer = PagedBuffer::new(&self.page_pool, rounded as usize)?;
        let mut bytes = vec![0u8; size as usize];
        data.read_bytes(0, &mut bytes)?;
        buffer.write(0, &bytes)?;
        Ok(Arc::new(Texture {
            size: rounded,
            height,
            buffer: Synced::new(self, buffer)?,
        }))
    }

    pub fn create_flat(self: &Arc<Self>, data: UserSlice<'_, u8>) -> Result<Arc<Flat>> {
        self.ensure_attached()?;
        let page = self.page_pool.alloc()?;
        let mut bytes = vec![0u8; FLAT_SIZE];
        data.read_bytes(0, &mut bytes)?;
        page.write(0, &bytes)?;
        Ok(Arc::new(Flat {
            page: Synced::new(self, page)?,
        }))
    }

    /// Creates `count` colormaps from `count * 256` bytes of `data`.
    pub fn create_colormaps(
        self: &Arc<Self>,
        count: u32,
        data: UserSlice<'_, u8>,
    ) -> Result<Arc<ColorMaps>> {
        self.ensure_attached()?;
        if count == 0 {
            return Err(Error::InvalidArgument("colormap count is zero"));
        }
        if count > COLORMAP_MAX_COUNT {
            return Err(Error::Overflow("colormap count"));
        }
        let maps = (0..count)
            .map(|_| self.map_pool.alloc())
            .collect::<Result<Vec<_>, _>>()?;
        let mut bytes = [0u8; COLORMAP_SIZE];
        for (i, map) in maps.iter().enumerate() {
            data.read_bytes(i * COLORMAP_SIZE, &mut bytes)?;
            map.write(0, &bytes)?;
        }
        Ok(Arc::new(ColorMaps {
            maps: Synced::new(self, maps)?,
        }))
    }
}

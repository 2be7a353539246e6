//! Sub-command layouts of the drawing requests.

use hdoom_protocol::DrawParams;

use crate::resource::Resource;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillRect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub color: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyRect {
    pub dst_x: u16,
    pub dst_y: u16,
    pub src_x: u16,
    pub src_y: u16,
    pub width: u16,
    pub height: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Line {
    pub ax: u16,
    pub ay: u16,
    pub bx: u16,
    pub by: u16,
    pub color: u8,
}

/// One vertical strip. `ustart`/`ustep` are 16.16 fixed point texture rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Column {
    pub x: u16,
    pub y1: u16,
    pub y2: u16,
    pub ustart: u32,
    pub ustep: u32,
    pub texture_offset: u32,
    pub colormap_idx: u8,
}

/// One horizontal strip sampled from a flat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub x1: u16,
    pub x2: u16,
    pub y: u16,
    pub ustart: u32,
    pub vstart: u32,
    pub ustep: u32,
    pub vstep: u32,
    pub colormap_idx: u8,
}

/// Resources and flags shared by every column of a batch.
///
/// Which handles are required depends on `flags`: a texture unless `FUZZ` is set, translation
/// maps with `TRANSLATE`, colormaps with `COLORMAP` or `FUZZ`. `FUZZ` disables the other two.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColumnParams<'a> {
    pub flags: DrawParams,
    pub texture: Option<&'a Resource>,
    pub translations: Option<&'a Resource>,
    pub translation_idx: u8,
    pub colormaps: Option<&'a Resource>,
}

#[derive(Clone, Copy, Debug)]
pub struct SpanParams<'a> {
    pub flags: DrawParams,
    pub flat: &'a Resource,
    pub translations: Option<&'a Resource>,
    pub translation_idx: u8,
    pub colormaps: Option<&'a Resource>,
}

impl<'a> SpanParams<'a> {
    pub fn new(flat: &'a Resource) -> Self {
        Self {
            flags: DrawParams::empty(),
            flat,
            translations: None,
            translation_idx: 0,
            colormaps: None,
        }
    }
}

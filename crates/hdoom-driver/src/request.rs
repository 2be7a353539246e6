//! Control-request dispatch.

use std::sync::Arc;

use crate::abi::{Column, ColumnParams, CopyRect, FillRect, Line, Span, SpanParams};
use crate::device::Device;
use crate::error::Result;
use crate::resource::{Resource, Surface};
use crate::user::UserSlice;

/// Requests issued against the device itself.
#[derive(Clone, Copy, Debug)]
pub enum DeviceRequest<'a> {
    CreateSurface {
        width: u32,
        height: u32,
    },
    CreateTexture {
        size: u32,
        height: u32,
        data: UserSlice<'a, u8>,
    },
    CreateFlat {
        data: UserSlice<'a, u8>,
    },
    CreateColorMaps {
        count: u32,
        data: UserSlice<'a, u8>,
    },
}

impl DeviceRequest<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceRequest::CreateSurface { .. } => "create_surface",
            DeviceRequest::CreateTexture { .. } => "create_texture",
            DeviceRequest::CreateFlat { .. } => "create_flat",
            DeviceRequest::CreateColorMaps { .. } => "create_colormaps",
        }
    }
}

/// Drawing requests issued against a destination surface.
#[derive(Clone, Copy, Debug)]
pub enum SurfaceRequest<'a> {
    FillRects(UserSlice<'a, FillRect>),
    CopyRects {
        src: &'a Resource,
        rects: UserSlice<'a, CopyRect>,
    },
    DrawLines(UserSlice<'a, Line>),
    DrawBackground {
        flat: &'a Resource,
    },
    DrawColumns {
        params: ColumnParams<'a>,
        columns: UserSlice<'a, Column>,
    },
    DrawSpans {
        params: SpanParams<'a>,
        spans: UserSlice<'a, Span>,
    },
}

impl SurfaceRequest<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            SurfaceRequest::FillRects(_) => "fill_rects",
            SurfaceRequest::CopyRects { .. } => "copy_rects",
            SurfaceRequest::DrawLines(_) => "draw_lines",
            SurfaceRequest::DrawBackground { .. } => "draw_background",
            SurfaceRequest::DrawColumns { .. } => "draw_columns",
            SurfaceRequest::DrawSpans { .. } => "draw_spans",
        }
    }
}

impl Device {
    pub fn request(self: &Arc<Self>, req: DeviceRequest<'_>) -> Result<Resource> {
        tracing::trace!(minor = self.minor(), op = req.name(), "device request");
        Ok(match req {
            DeviceRequest::CreateSurface { width, height } => {
                self.create_surface(width, height)?.into()
            }
            DeviceRequest::CreateTexture { size, height, data } => {
                self.create_texture(size, height, data)?.into()
            }
            DeviceRequest::CreateFlat { data } => self.create_flat(data)?.into(),
            DeviceRequest::CreateColorMaps { count, data } => {
                self.create_colormaps(count, data)?.into()
            }
        })
    }
}

impl Surface {
    /// Runs one drawing request; returns the number of accepted sub-commands.
    pub fn request(&self, req: SurfaceRequest<'_>) -> Result<usize> {
        tracing::trace!(op = req.name(), "surface request");
        match req {
            SurfaceRequest::FillRects(rects) => self.fill_rects(rects),
            SurfaceRequest::CopyRects { src, rects } => self.copy_rects(src, rects),
            SurfaceRequest::DrawLines(lines) => self.draw_lines(lines),
            SurfaceRequest::DrawBackground { flat } => self.draw_background(flat),
            SurfaceRequest::DrawColumns { params, columns } => self.draw_columns(&params, columns),
            SurfaceRequest::DrawSpans { params, spans } => self.draw_spans(&params, spans),
        }
    }
}

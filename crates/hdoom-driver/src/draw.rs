//! The six drawing batches.
//!
//! Every batch takes the device lock, binds the destination surface, emits its setup commands
//! and then translates sub-commands one by one. The first invalid or unreadable sub-command ends
//! the batch; whatever was queued before it stays queued and the call reports how many
//! sub-commands made it. A batch that fails on its very first sub-command reports the error.

use hdoom_protocol::{Cmd, DrawParams, FLAT_COORD_MASK, TEX_COORD_MASK, TEX_OFFSET_MASK};

use crate::abi::{Column, ColumnParams, CopyRect, FillRect, Line, Span, SpanParams};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::interlock;
use crate::queue::CommandQueue;
use crate::resource::{DeviceResource, Resource, Surface};
use crate::user::UserSlice;

fn run_batch<T: Copy>(
    queue: &mut CommandQueue,
    items: UserSlice<'_, T>,
    mut step: impl FnMut(&mut CommandQueue, T) -> Result<()>,
) -> Result<usize> {
    let mut accepted = 0;
    for index in 0..items.len() {
        let outcome = items
            .get(index)
            .map_err(Error::from)
            .and_then(|item| step(queue, item));
        if let Err(err) = outcome {
            if accepted == 0 {
                return Err(err);
            }
            tracing::debug!(accepted, total = items.len(), %err, "batch stopped early");
            return Ok(accepted);
        }
        accepted += 1;
    }
    Ok(accepted)
}

fn require<'a>(handle: Option<&'a Resource>, what: &'static str) -> Result<&'a Resource> {
    handle.ok_or(Error::InvalidArgument(what))
}

fn translation_addr(handle: Option<&Resource>, index: u8, device: &Device) -> Result<u32> {
    require(handle, "translation needs a colormap array")?
        .colormaps(device)?
        .addr(index)
}

/// Emits `COLORMAP_ADDR` only when the map differs from the previous sub-command's.
#[derive(Default)]
struct MapTracker {
    current: Option<u8>,
}

impl MapTracker {
    fn bind(&mut self, queue: &mut CommandQueue, index: u8, addr: u32) {
        if self.current != Some(index) {
            queue.emit(Cmd::ColormapAddr { addr });
            self.current = Some(index);
        }
    }
}

fn xy_a(x: u16, y: u16) -> Cmd {
    Cmd::XyA {
        x: x.into(),
        y: y.into(),
    }
}

fn xy_b(x: u16, y: u16) -> Cmd {
    Cmd::XyB {
        x: x.into(),
        y: y.into(),
    }
}

impl Surface {
    fn bind_target(&self, queue: &mut CommandQueue) {
        queue.emit(Cmd::SurfDstPt {
            addr: self.buffer.page_table(),
        });
        queue.emit(Cmd::SurfDims {
            width: self.width(),
            height: self.height(),
        });
    }

    fn contains_rect(&self, x: u16, y: u16, width: u16, height: u16) -> bool {
        u32::from(x) + u32::from(width) <= self.width()
            && u32::from(y) + u32::from(height) <= self.height()
    }

    fn contains_point(&self, x: u16, y: u16) -> bool {
        u32::from(x) < self.width() && u32::from(y) < self.height()
    }

    pub fn fill_rects(&self, rects: UserSlice<'_, FillRect>) -> Result<usize> {
        let mut queue = self.device().lock_queue()?;
        self.bind_target(&mut queue);
        let result = run_batch(&mut queue, rects, |q, r| {
            if r.width == 0 || r.height == 0 {
                return Ok(());
            }
            if !self.contains_rect(r.x, r.y, r.width, r.height) {
                return Err(Error::InvalidArgument("fill rectangle outside surface"));
            }
            q.emit(xy_a(r.x, r.y));
            q.emit(Cmd::FillColor(r.color));
            q.emit(Cmd::FillRect {
                width: r.width.into(),
                height: r.height.into(),
            });
            Ok(())
        });
        interlock::record_write(&queue, self);
        result
    }

    /// Copies rectangles from `src`, which must be a surface of the same device and size.
    pub fn copy_rects(&self, src: &Resource, rects: UserSlice<'_, CopyRect>) -> Result<usize> {
        let mut queue = self.device().lock_queue()?;
        let src = src.source_for(self)?;
        interlock::order_read(&mut queue, src);
        self.bind_target(&mut queue);
        queue.emit(Cmd::SurfSrcPt {
            addr: src.buffer.page_table(),
        });
        let result = run_batch(&mut queue, rects, |q, r| {
            if r.width == 0 || r.height == 0 {
                return Ok(());
            }
            if !self.contains_rect(r.dst_x, r.dst_y, r.width, r.height) {
                return Err(Error::InvalidArgument("copy destination outside surface"));
            }
            if !src.contains_rect(r.src_x, r.src_y, r.width, r.height) {
                return Err(Error::InvalidArgument("copy source outside surface"));
            }
            q.emit(xy_a(r.dst_x, r.dst_y));
            q.emit(xy_b(r.src_x, r.src_y));
            q.emit(Cmd::CopyRect {
                width: r.width.into(),
                height: r.height.into(),
            });
            Ok(())
        });
        interlock::record_write(&queue, self);
        result
    }

    pub fn draw_lines(&self, lines: UserSlice<'_, Line>) -> Result<usize> {
        let mut queue = self.device().lock_queue()?;
        self.bind_target(&mut queue);
        let result = run_batch(&mut queue, lines, |q, l| {
            let ((ax, ay), (bx, by)) = if l.ay > l.by {
                ((l.bx, l.by), (l.ax, l.ay))
            } else {
                ((l.ax, l.ay), (l.bx, l.by))
            };
            if !self.contains_point(ax, ay) || !self.contains_point(bx, by) {
                return Err(Error::InvalidArgument("line endpoint outside surface"));
            }
            q.emit(xy_a(ax, ay));
            q.emit(xy_b(bx, by));
            q.emit(Cmd::FillColor(l.color));
            q.emit(Cmd::DrawLine);
            Ok(())
        });
        interlock::record_write(&queue, self);
        result
    }

    /// Tiles `flat` over the whole surface. Returns 0 on success.
    pub fn draw_background(&self, flat: &Resource) -> Result<usize> {
        let mut queue = self.device().lock_queue()?;
        let flat = flat.flat(self.device())?;
        self.bind_target(&mut queue);
        queue.emit(Cmd::FlatAddr { addr: flat.addr() });
        queue.emit(Cmd::DrawBackground);
        interlock::record_write(&queue, self);
        Ok(0)
    }

    pub fn draw_columns(
        &self,
        params: &ColumnParams<'_>,
        columns: UserSlice<'_, Column>,
    ) -> Result<usize> {
        let device = self.device();
        let mut queue = device.lock_queue()?;

        let fuzz = params.flags.contains(DrawParams::FUZZ);
        let flags = if fuzz { DrawParams::FUZZ } else { params.flags };
        let texture = if fuzz {
            None
        } else {
            let handle = require(params.texture, "columns need a texture")?;
            Some(handle.texture(device)?)
        };
        let translation = if flags.contains(DrawParams::TRANSLATE) {
            let index = params.translation_idx;
            Some(translation_addr(params.translations, index, device)?)
        } else {
            None
        };
        let colormaps = if fuzz || flags.contains(DrawParams::COLORMAP) {
            let handle = require(params.colormaps, "missing colormap array")?;
            Some(handle.colormaps(device)?)
        } else {
            None
        };

        self.bind_target(&mut queue);
        queue.emit(Cmd::DrawParams(flags));
        if let Some(texture) = texture {
            queue.emit(Cmd::TexturePt {
                addr: texture.buffer.page_table(),
            });
            queue.emit(Cmd::TextureDims {
                size: texture.size(),
                height: texture.height(),
            });
        }
        if let Some(addr) = translation {
            queue.emit(Cmd::TranslationAddr { addr });
        }

        let mut maps = MapTracker::default();
        let result = run_batch(&mut queue, columns, |q, c| {
            let (y1, y2) = (c.y1.min(c.y2), c.y1.max(c.y2));
            if !self.contains_point(c.x, y2) {
                return Err(Error::InvalidArgument("column outside surface"));
            }
            if !fuzz {
                if (c.ustart | c.ustep) & !TEX_COORD_MASK != 0 {
                    return Err(Error::InvalidArgument("reserved texture coordinate bits"));
                }
                if c.texture_offset & !TEX_OFFSET_MASK != 0 {
                    return Err(Error::InvalidArgument("texture offset out of range"));
                }
            }
            let map = colormaps.map(|cm| cm.addr(c.colormap_idx)).transpose()?;

            q.emit(xy_a(c.x, y1));
            q.emit(xy_b(c.x, y2));
            if !fuzz {
                q.emit(Cmd::UStart(c.ustart));
                q.emit(Cmd::UStep(c.ustep));
            }
            if let Some(addr) = map {
                maps.bind(q, c.colormap_idx, addr);
            }
            q.emit(Cmd::DrawColumn {
                offset: c.texture_offset & TEX_OFFSET_MASK,
            });
            Ok(())
        });
        interlock::record_write(&queue, self);
        result
    }

    pub fn draw_spans(&self, params: &SpanParams<'_>, spans: UserSlice<'_, Span>) -> Result<usize> {
        let device = self.device();
        let mut queue = device.lock_queue()?;

        let flags = params.flags & (DrawParams::TRANSLATE | DrawParams::COLORMAP);
        let flat = params.flat.flat(device)?;
        let translation = if flags.contains(DrawParams::TRANSLATE) {
            let index = params.translation_idx;
            Some(translation_addr(params.translations, index, device)?)
        } else {
            None
        };
        let colormaps = if flags.contains(DrawParams::COLORMAP) {
            let handle = require(params.colormaps, "missing colormap array")?;
            Some(handle.colormaps(device)?)
        } else {
            None
        };

        self.bind_target(&mut queue);
        queue.emit(Cmd::FlatAddr { addr: flat.addr() });
        queue.emit(Cmd::DrawParams(flags));
        if let Some(addr) = translation {
            queue.emit(Cmd::TranslationAddr { addr });
        }

        let mut maps = MapTracker::default();
        let result = run_batch(&mut queue, spans, |q, s| {
            let (x1, x2) = (s.x1.min(s.x2), s.x1.max(s.x2));
            if !self.contains_point(x2, s.y) {
                return Err(Error::InvalidArgument("span outside surface"));
            }
            let map = colormaps.map(|cm| cm.addr(s.colormap_idx)).transpose()?;

            // Flat coordinates wrap at 64 texels; anything above 6.16 is dropped.
            q.emit(Cmd::UStart(s.ustart & FLAT_COORD_MASK));
            q.emit(Cmd::VStart(s.vstart & FLAT_COORD_MASK));
            q.emit(Cmd::UStep(s.ustep & FLAT_COORD_MASK));
            q.emit(Cmd::VStep(s.vstep & FLAT_COORD_MASK));
            q.emit(xy_a(x1, s.y));
            q.emit(xy_b(x2, s.y));
            if let Some(addr) = map {
                maps.bind(q, s.colormap_idx, addr);
            }
            q.emit(Cmd::DrawSpan);
            Ok(())
        });
        interlock::record_write(&queue, self);
        result
    }
}

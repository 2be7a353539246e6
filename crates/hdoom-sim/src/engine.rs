//! Draw pipeline of the model: decoded commands in, surface writes out.

use std::collections::HashSet;

use hdoom_dma::DmaBus;
use hdoom_protocol::{
    Cmd, DrawParams, FeErrorCode, Intr, COLORMAP_SIZE, FLAT_COORD_MASK, FLAT_DIM, FLAT_SIZE,
    PAGE_SHIFT, PAGE_SIZE, PTE_PHYS_MASK, PTE_VALID, TEX_COORD_MASK,
};

const FUZZ_OFFSETS: [i32; 50] = [
    1, -1, 1, -1, 1, 1, -1, 1, 1, -1, 1, 1, 1, -1, 1, 1, 1, -1, -1, -1, -1, 1, -1, -1, 1, 1, 1, 1,
    -1, 1, -1, 1, 1, -1, -1, 1, 1, -1, -1, -1, -1, 1, 1, 1, 1, -1, 1, 1, -1, 1,
];

/// Counters exposed to tests through `SimDevice::stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub commands: u64,
    pub draws: u64,
    pub interlocks: u64,
    pub sync_pings: u64,
    pub async_pings: u64,
    pub fences: u64,
    /// Surfaces bound as copy source while a write to them was still unordered.
    pub hazards: u64,
    pub faults: u64,
}

/// Side effect of a command that lands in the register file rather than in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Signal {
    PingSync,
    PingAsync,
    Fence(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fault {
    Intr(Intr),
    Frontend(FeErrorCode),
}

impl From<Intr> for Fault {
    fn from(bits: Intr) -> Self {
        Fault::Intr(bits)
    }
}

type ExecResult<T> = Result<T, Fault>;

#[derive(Clone, Copy)]
enum Side {
    Dst,
    Src,
}

impl Side {
    fn page_fault(self) -> Intr {
        match self {
            Side::Dst => Intr::PAGE_FAULT_SURF_DST,
            Side::Src => Intr::PAGE_FAULT_SURF_SRC,
        }
    }

    fn overflow(self) -> Intr {
        match self {
            Side::Dst => Intr::SURF_DST_OVERFLOW,
            Side::Src => Intr::SURF_SRC_OVERFLOW,
        }
    }
}

pub(crate) struct Engine {
    dst_pt: u32,
    src_pt: u32,
    texture_pt: u32,
    flat_addr: u32,
    colormap: [u8; COLORMAP_SIZE],
    translation: [u8; COLORMAP_SIZE],
    width: u32,
    height: u32,
    tex_size: u32,
    tex_height: u32,
    color: u8,
    params: DrawParams,
    a: (u32, u32),
    b: (u32, u32),
    ustart: u32,
    vstart: u32,
    ustep: u32,
    vstep: u32,
    fuzz_pos: usize,
    /// Destination tables written since the last INTERLOCK.
    unordered: HashSet<u32>,
    pub(crate) stats: SimStats,
}

impl Engine {
    pub(crate) fn new() -> Self {
        Self {
            dst_pt: 0,
            src_pt: 0,
            texture_pt: 0,
            flat_addr: 0,
            colormap: identity_map(),
            translation: identity_map(),
            width: 0,
            height: 0,
            tex_size: 0,
            tex_height: 0,
            color: 0,
            params: DrawParams::empty(),
            a: (0, 0),
            b: (0, 0),
            ustart: 0,
            vstart: 0,
            ustep: 0,
            vstep: 0,
            fuzz_pos: 0,
            unordered: HashSet::new(),
            stats: SimStats::default(),
        }
    }

    /// Drops all pipeline state; counters survive.
    pub(crate) fn reset(&mut self) {
        let stats = self.stats;
        *self = Self::new();
        self.stats = stats;
    }

    pub(crate) fn execute(&mut self, cmd: Cmd, mem: &dyn DmaBus) -> ExecResult<Option<Signal>> {
        self.stats.commands += 1;
        match cmd {
            Cmd::SurfDstPt { addr } => self.dst_pt = addr,
            Cmd::SurfSrcPt { addr } => {
                if self.unordered.contains(&addr) {
                    self.stats.hazards += 1;
                    tracing::warn!(pt = addr, "source surface read before interlock");
                }
                self.src_pt = addr;
            }
            Cmd::TexturePt { addr } => self.texture_pt = addr,
            Cmd::FlatAddr { addr } => self.flat_addr = addr,
            Cmd::ColormapAddr { addr } => self.colormap = load_map(mem, addr)?,
            Cmd::TranslationAddr { addr } => self.translation = load_map(mem, addr)?,
            Cmd::SurfDims { width, height } => {
                self.width = width;
                self.height = height;
            }
            Cmd::TextureDims { size, height } => {
                self.tex_size = size;
                self.tex_height = height;
            }
            Cmd::FillColor(color) => self.color = color,
            Cmd::DrawParams(params) => self.params = params,
            Cmd::XyA { x, y } => self.a = (x, y),
            Cmd::XyB { x, y } => self.b = (x, y),
            Cmd::UStart(v) => self.ustart = v,
            Cmd::VStart(v) => self.vstart = v,
            Cmd::UStep(v) => self.ustep = v,
            Cmd::VStep(v) => self.vstep = v,
            Cmd::FillRect { width, height } => self.fill_rect(mem, width, height)?,
            Cmd::CopyRect { width, height } => self.copy_rect(mem, width, height)?,
            Cmd::DrawLine => self.draw_line(mem)?,
            Cmd::DrawBackground => self.draw_background(mem)?,
            Cmd::DrawColumn { offset } => self.draw_column(mem, offset)?,
            Cmd::DrawSpan => self.draw_span(mem)?,
            Cmd::Interlock => {
                self.stats.interlocks += 1;
                self.unordered.clear();
            }
            Cmd::Fence(v) => {
                self.stats.fences += 1;
                return Ok(Some(Signal::Fence(v)));
            }
            Cmd::PingSync => {
                self.stats.sync_pings += 1;
                return Ok(Some(Signal::PingSync));
            }
            Cmd::PingAsync => {
                self.stats.async_pings += 1;
                return Ok(Some(Signal::PingAsync));
            }
        }
        Ok(None)
    }

    fn begin_draw(&mut self) -> ExecResult<()> {
        if self.width == 0 {
            return Err(Fault::Frontend(FeErrorCode::SurfWidthZero));
        }
        self.stats.draws += 1;
        self.unordered.insert(self.dst_pt);
        Ok(())
    }

    fn check_rect(
        &self,
        side: Side,
        (x, y): (u32, u32),
        width: u32,
        height: u32,
    ) -> ExecResult<()> {
        if x + width > self.width || y + height > self.height {
            return Err(side.overflow().into());
        }
        Ok(())
    }

    fn table(&self, side: Side) -> u32 {
        match side {
            Side::Dst => self.dst_pt,
            Side::Src => self.src_pt,
        }
    }

    /// Reads or writes one row-contiguous run of pixels starting at `(x, y)`.
    fn surface_run(
        &self,
        mem: &dyn DmaBus,
        side: Side,
        (x, y): (u32, u32),
        len: usize,
        mut f: impl FnMut(&dyn DmaBus, u32, std::ops::Range<usize>) -> hdoom_dma::DmaResult<()>,
    ) -> ExecResult<()> {
        let mut va = (y * self.width + x) as usize;
        let mut done = 0;
        while done < len {
            let offset = va % PAGE_SIZE;
            let n = (PAGE_SIZE - offset).min(len - done);
            let pa = translate(mem, self.table(side), va, side.page_fault())?;
            f(mem, pa, done..done + n).map_err(|_| Fault::Intr(side.page_fault()))?;
            done += n;
            va += n;
        }
        Ok(())
    }

    fn write_run(&self, mem: &dyn DmaBus, at: (u32, u32), data: &[u8]) -> ExecResult<()> {
        self.surface_run(mem, Side::Dst, at, data.len(), |mem, pa, range| {
            mem.write_from(pa, &data[range])
        })
    }

    fn read_run(
        &self,
        mem: &dyn DmaBus,
        side: Side,
        at: (u32, u32),
        out: &mut [u8],
    ) -> ExecResult<()> {
        let len = out.len();
        self.surface_run(mem, side, at, len, |mem, pa, range| {
            mem.read_into(pa, &mut out[range])
        })
    }

    fn read_pixel(&self, mem: &dyn DmaBus, at: (u32, u32)) -> ExecResult<u8> {
        let mut px = [0u8];
        self.read_run(mem, Side::Dst, at, &mut px)?;
        Ok(px[0])
    }

    fn fill_rect(&mut self, mem: &dyn DmaBus, width: u32, height: u32) -> ExecResult<()> {
        self.begin_draw()?;
        self.check_rect(Side::Dst, self.a, width, height)?;
        let row = vec![self.color; width as usize];
        let (x, y) = self.a;
        for dy in 0..height {
            self.write_run(mem, (x, y + dy), &row)?;
        }
        Ok(())
    }

    fn copy_rect(&mut self, mem: &dyn DmaBus, width: u32, height: u32) -> ExecResult<()> {
        self.begin_draw()?;
        self.check_rect(Side::Dst, self.a, width, height)?;
        self.check_rect(Side::Src, self.b, width, height)?;
        let w = width as usize;
        let mut block = vec![0u8; w * height as usize];
        let (sx, sy) = self.b;
        for (dy, row) in (0..height).zip(block.chunks_mut(w.max(1))) {
            self.read_run(mem, Side::Src, (sx, sy + dy), row)?;
        }
        let (x, y) = self.a;
        for (dy, row) in (0..height).zip(block.chunks(w.max(1))) {
            self.write_run(mem, (x, y + dy), row)?;
        }
        Ok(())
    }

    fn draw_line(&mut self, mem: &dyn DmaBus) -> ExecResult<()> {
        self.begin_draw()?;
        self.check_rect(Side::Dst, self.a, 1, 1)?;
        self.check_rect(Side::Dst, self.b, 1, 1)?;
        let (mut x, mut y) = (i64::from(self.a.0), i64::from(self.a.1));
        let (x1, y1) = (i64::from(self.b.0), i64::from(self.b.1));
        let dx = (x1 - x).abs();
        let dy = -(y1 - y).abs();
        let sx = if x < x1 { 1 } else { -1 };
        let sy = if y < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let color = [self.color];
        loop {
            self.write_run(mem, (x as u32, y as u32), &color)?;
            if x == x1 && y == y1 {
                return Ok(());
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn load_flat(&self, mem: &dyn DmaBus) -> ExecResult<Vec<u8>> {
        let mut flat = vec![0u8; FLAT_SIZE];
        mem.read_into(self.flat_addr, &mut flat)
            .map_err(|_| Fault::Intr(Intr::PAGE_FAULT_TEXTURE))?;
        Ok(flat)
    }

    fn draw_background(&mut self, mem: &dyn DmaBus) -> ExecResult<()> {
        self.begin_draw()?;
        let flat = self.load_flat(mem)?;
        let dim = FLAT_DIM as usize;
        let mut row = vec![0u8; self.width as usize];
        for y in 0..self.height {
            let base = (y as usize % dim) * dim;
            for (x, px) in row.iter_mut().enumerate() {
                *px = flat[base + x % dim];
            }
            self.write_run(mem, (0, y), &row)?;
        }
        Ok(())
    }

    fn shade(&self, texel: u8) -> u8 {
        let mut texel = texel;
        if self.params.contains(DrawParams::TRANSLATE) {
            texel = self.translation[usize::from(texel)];
        }
        if self.params.contains(DrawParams::COLORMAP) {
            texel = self.colormap[usize::from(texel)];
        }
        texel
    }

    fn texel(&self, mem: &dyn DmaBus, offset: u32, coord: u32) -> ExecResult<u8> {
        let mut row = (coord & TEX_COORD_MASK) >> 16;
        if self.tex_height != 0 {
            row %= self.tex_height;
        }
        let va = offset + row;
        if va >= self.tex_size {
            return Ok(0);
        }
        let pa = translate(mem, self.texture_pt, va as usize, Intr::PAGE_FAULT_TEXTURE)?;
        mem.read_u8(pa)
            .map_err(|_| Fault::Intr(Intr::PAGE_FAULT_TEXTURE))
    }

    fn draw_column(&mut self, mem: &dyn DmaBus, offset: u32) -> ExecResult<()> {
        self.begin_draw()?;
        let (x, y1) = self.a;
        let y2 = self.b.1;
        if y1 > y2 {
            return Ok(());
        }
        self.check_rect(Side::Dst, (x, y1), 1, y2 - y1 + 1)?;
        let fuzz = self.params.contains(DrawParams::FUZZ);
        let mut coord = self.ustart;
        for y in y1..=y2 {
            let value = if fuzz {
                let off = FUZZ_OFFSETS[self.fuzz_pos];
                self.fuzz_pos = (self.fuzz_pos + 1) % FUZZ_OFFSETS.len();
                let sy = (i64::from(y) + i64::from(off)).clamp(0, i64::from(self.height) - 1);
                let px = self.read_pixel(mem, (x, sy as u32))?;
                self.colormap[usize::from(px)]
            } else {
                let texel = self.texel(mem, offset, coord)?;
                coord = coord.wrapping_add(self.ustep) & TEX_COORD_MASK;
                self.shade(texel)
            };
            self.write_run(mem, (x, y), &[value])?;
        }
        Ok(())
    }

    fn draw_span(&mut self, mem: &dyn DmaBus) -> ExecResult<()> {
        self.begin_draw()?;
        let (x1, y) = self.a;
        let x2 = self.b.0;
        if x1 > x2 {
            return Ok(());
        }
        self.check_rect(Side::Dst, (x1, y), x2 - x1 + 1, 1)?;
        let flat = self.load_flat(mem)?;
        let (mut u, mut v) = (self.ustart, self.vstart);
        let mut row = Vec::with_capacity((x2 - x1 + 1) as usize);
        for _ in x1..=x2 {
            let idx = ((v >> 16) & 63) * FLAT_DIM + ((u >> 16) & 63);
            row.push(self.shade(flat[idx as usize]));
            u = u.wrapping_add(self.ustep) & FLAT_COORD_MASK;
            v = v.wrapping_add(self.vstep) & FLAT_COORD_MASK;
        }
        self.write_run(mem, (x1, y), &row)
    }
}

fn identity_map() -> [u8; COLORMAP_SIZE] {
    std::array::from_fn(|i| i as u8)
}

fn load_map(mem: &dyn DmaBus, addr: u32) -> ExecResult<[u8; COLORMAP_SIZE]> {
    let mut map = [0u8; COLORMAP_SIZE];
    mem.read_into(addr, &mut map)
        .map_err(|_| Fault::Intr(Intr::PAGE_FAULT_TEXTURE))?;
    Ok(map)
}

/// Walks a one-level page table.
fn translate(mem: &dyn DmaBus, table: u32, va: usize, fault: Intr) -> ExecResult<u32> {
    let entry_addr = table + ((va >> PAGE_SHIFT) as u32) * 4;
    let pte = mem.read_u32_le(entry_addr).map_err(|_| Fault::Intr(fault))?;
    if pte & PTE_VALID == 0 {
        return Err(fault.into());
    }
    Ok((pte & PTE_PHYS_MASK) | (va % PAGE_SIZE) as u32)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hdoom_dma::PhysMemory;
    use pretty_assertions::assert_eq;

    use super::*;

    struct Rig {
        mem: Arc<PhysMemory>,
        engine: Engine,
        table: u32,
        pages: Vec<u32>,
    }

    /// A 64x64 surface: one data page plus its table.
    fn rig() -> Rig {
        let mem = Arc::new(PhysMemory::new(8));
        let table = mem.alloc_frame().unwrap();
        let page = mem.alloc_frame().unwrap();
        mem.write_u32_le(table, page | PTE_VALID).unwrap();
        let mut engine = Engine::new();
        for cmd in [
            Cmd::SurfDstPt { addr: table },
            Cmd::SurfSrcPt { addr: table },
            Cmd::SurfDims {
                width: 64,
                height: 64,
            },
        ] {
            engine.execute(cmd, mem.as_ref()).unwrap();
        }
        Rig {
            mem,
            engine,
            table,
            pages: vec![page],
        }
    }

    impl Rig {
        fn run(&mut self, cmds: &[Cmd]) -> ExecResult<Vec<Signal>> {
            let mut out = Vec::new();
            for &cmd in cmds {
                if let Some(sig) = self.engine.execute(cmd, self.mem.as_ref())? {
                    out.push(sig);
                }
            }
            Ok(out)
        }

        fn pixel(&self, x: u32, y: u32) -> u8 {
            self.mem.read_u8(self.pages[0] + y * 64 + x).unwrap()
        }
    }

    #[test]
    fn fill_and_copy() {
        let mut rig = rig();
        let table = rig.table;
        rig.run(&[
            Cmd::FillColor(7),
            Cmd::XyA { x: 2, y: 3 },
            Cmd::FillRect {
                width: 4,
                height: 2,
            },
            Cmd::SurfSrcPt { addr: table },
            Cmd::XyA { x: 10, y: 10 },
            Cmd::XyB { x: 2, y: 3 },
            Cmd::CopyRect {
                width: 4,
                height: 2,
            },
        ])
        .unwrap();
        assert_eq!(rig.pixel(2, 3), 7);
        assert_eq!(rig.pixel(5, 4), 7);
        assert_eq!(rig.pixel(6, 4), 0);
        assert_eq!(rig.pixel(13, 11), 7);
        assert_eq!(rig.engine.stats.hazards, 1);
    }

    #[test]
    fn interlock_clears_hazard_tracking() {
        let mut rig = rig();
        let table = rig.table;
        rig.run(&[
            Cmd::XyA { x: 0, y: 0 },
            Cmd::FillRect {
                width: 1,
                height: 1,
            },
            Cmd::Interlock,
            Cmd::SurfSrcPt { addr: table },
        ])
        .unwrap();
        assert_eq!(rig.engine.stats.hazards, 0);
        assert_eq!(rig.engine.stats.interlocks, 1);
    }

    #[test]
    fn line_covers_both_endpoints() {
        let mut rig = rig();
        rig.run(&[
            Cmd::FillColor(3),
            Cmd::XyA { x: 0, y: 0 },
            Cmd::XyB { x: 5, y: 2 },
            Cmd::DrawLine,
        ])
        .unwrap();
        assert_eq!(rig.pixel(0, 0), 3);
        assert_eq!(rig.pixel(5, 2), 3);
        assert_eq!(rig.pixel(0, 2), 0);
    }

    #[test]
    fn out_of_surface_raises_overflow() {
        let mut rig = rig();
        let err = rig
            .run(&[
                Cmd::XyA { x: 60, y: 0 },
                Cmd::FillRect {
                    width: 8,
                    height: 1,
                },
            ])
            .unwrap_err();
        assert_eq!(err, Fault::Intr(Intr::SURF_DST_OVERFLOW));
    }

    #[test]
    fn invalid_entry_raises_page_fault() {
        let mut rig = rig();
        rig.mem.write_u32_le(rig.table, 0).unwrap();
        let err = rig
            .run(&[
                Cmd::XyA { x: 0, y: 0 },
                Cmd::FillRect {
                    width: 1,
                    height: 1,
                },
            ])
            .unwrap_err();
        assert_eq!(err, Fault::Intr(Intr::PAGE_FAULT_SURF_DST));
    }

    #[test]
    fn zero_width_is_a_frontend_error() {
        let mut rig = rig();
        let err = rig
            .run(&[
                Cmd::SurfDims {
                    width: 0,
                    height: 8,
                },
                Cmd::FillRect {
                    width: 1,
                    height: 1,
                },
            ])
            .unwrap_err();
        assert_eq!(err, Fault::Frontend(FeErrorCode::SurfWidthZero));
    }

    #[test]
    fn span_samples_flat_through_colormap() {
        let mut rig = rig();
        let flat = rig.mem.alloc_frame().unwrap();
        let cmap = rig.mem.alloc_frame().unwrap();
        let texels: Vec<u8> = (0..FLAT_SIZE).map(|i| (i % 64) as u8).collect();
        rig.mem.write_from(flat, &texels).unwrap();
        let map: Vec<u8> = (0..=255u8).map(|v| v.wrapping_add(100)).collect();
        rig.mem.write_from(cmap, &map).unwrap();
        rig.run(&[
            Cmd::FlatAddr { addr: flat },
            Cmd::ColormapAddr { addr: cmap },
            Cmd::DrawParams(DrawParams::COLORMAP),
            Cmd::UStart(0),
            Cmd::VStart(0),
            Cmd::UStep(1 << 16),
            Cmd::VStep(0),
            Cmd::XyA { x: 0, y: 5 },
            Cmd::XyB { x: 3, y: 5 },
            Cmd::DrawSpan,
        ])
        .unwrap();
        let row: Vec<u8> = (0..4).map(|x| rig.pixel(x, 5)).collect();
        assert_eq!(row, vec![100, 101, 102, 103]);
    }

    #[test]
    fn column_wraps_texture_height() {
        let mut rig = rig();
        let tex_table = rig.mem.alloc_frame().unwrap();
        let tex_page = rig.mem.alloc_frame().unwrap();
        rig.mem.write_u32_le(tex_table, tex_page | PTE_VALID).unwrap();
        rig.mem.write_from(tex_page, &[10, 20, 30]).unwrap();
        rig.run(&[
            Cmd::TexturePt { addr: tex_table },
            Cmd::TextureDims {
                size: 256,
                height: 3,
            },
            Cmd::DrawParams(DrawParams::empty()),
            Cmd::XyA { x: 1, y: 0 },
            Cmd::XyB { x: 1, y: 4 },
            Cmd::UStart(0),
            Cmd::UStep(1 << 16),
            Cmd::DrawColumn { offset: 0 },
        ])
        .unwrap();
        let col: Vec<u8> = (0..5).map(|y| rig.pixel(1, y)).collect();
        assert_eq!(col, vec![10, 20, 30, 10, 20]);
    }

    #[test]
    fn pings_and_fences_surface_as_signals() {
        let mut rig = rig();
        let sigs = rig
            .run(&[Cmd::PingAsync, Cmd::Fence(9), Cmd::PingSync])
            .unwrap();
        assert_eq!(
            sigs,
            vec![Signal::PingAsync, Signal::Fence(9), Signal::PingSync]
        );
    }
}

use std::sync::{Mutex, PoisonError};

use hdoom_protocol::PAGE_SIZE;

use crate::{DmaError, DmaResult};

/// First physical address handed out. Keeps address 0 (and the low megabyte) unmapped so a
/// zeroed page-table entry or pointer never aliases real memory.
pub const PHYS_BASE: u32 = 0x0010_0000;

/// Physical address space as seen by the device.
pub trait DmaBus: Send + Sync {
    fn read_into(&self, paddr: u32, dst: &mut [u8]) -> DmaResult<()>;

    fn write_from(&self, paddr: u32, src: &[u8]) -> DmaResult<()>;

    fn read_u8(&self, paddr: u32) -> DmaResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(paddr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u32_le(&self, paddr: u32) -> DmaResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(paddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u32_le(&self, paddr: u32, value: u32) -> DmaResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }
}

struct PhysInner {
    frames: Vec<Option<Box<[u8]>>>,
    free: Vec<usize>,
    in_use: usize,
    budget: Option<usize>,
}

/// Frame allocator plus backing store for a simulated 32-bit physical address space.
///
/// Frames are backed lazily: only allocated frames own host memory, and accesses that touch an
/// unallocated frame fail with [`DmaError::Unmapped`].
pub struct PhysMemory {
    inner: Mutex<PhysInner>,
}

impl PhysMemory {
    /// Creates an address space of `frames` 4 KiB frames starting at [`PHYS_BASE`].
    pub fn new(frames: usize) -> Self {
        let max_frames = (u32::MAX - PHYS_BASE) as usize / PAGE_SIZE;
        let frames = frames.min(max_frames);
        Self {
            inner: Mutex::new(PhysInner {
                frames: (0..frames).map(|_| None).collect(),
                free: (0..frames).rev().collect(),
                in_use: 0,
                budget: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PhysInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates one zeroed frame and returns its physical address.
    pub fn alloc_frame(&self) -> DmaResult<u32> {
        let mut inner = self.lock();
        match inner.budget {
            Some(0) => return Err(DmaError::OutOfMemory),
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        let idx = inner.free.pop().ok_or(DmaError::OutOfMemory)?;
        inner.frames[idx] = Some(vec![0u8; PAGE_SIZE].into_boxed_slice());
        inner.in_use += 1;
        Ok(frame_addr(idx))
    }

    pub fn free_frame(&self, paddr: u32) {
        let mut inner = self.lock();
        let Some(idx) = frame_index(paddr, inner.frames.len()) else {
            tracing::warn!(paddr, "freeing frame outside physical memory");
            return;
        };
        if inner.frames[idx].take().is_none() {
            tracing::warn!(paddr, "double free of physical frame");
            return;
        }
        inner.in_use -= 1;
        inner.free.push(idx);
    }

    pub fn frames_in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Limits how many further frame allocations may succeed. `None` removes the limit.
    pub fn set_alloc_budget(&self, budget: Option<usize>) {
        self.lock().budget = budget;
    }

    fn access(
        &self,
        paddr: u32,
        len: usize,
        mut f: impl FnMut(&mut [u8], usize, usize),
    ) -> DmaResult<()> {
        let mut inner = self.lock();
        let nframes = inner.frames.len();
        let unmapped = DmaError::Unmapped { paddr, len };
        let mut done = 0usize;
        while done < len {
            let addr = (paddr as usize)
                .checked_add(done)
                .ok_or_else(|| unmapped.clone())?;
            let idx = u32::try_from(addr)
                .ok()
                .and_then(|a| frame_index(a, nframes))
                .ok_or_else(|| unmapped.clone())?;
            let off = addr % PAGE_SIZE;
            let n = (PAGE_SIZE - off).min(len - done);
            let frame = inner.frames[idx].as_deref_mut().ok_or_else(|| unmapped.clone())?;
            f(&mut frame[off..off + n], done, n);
            done += n;
        }
        Ok(())
    }
}

impl DmaBus for PhysMemory {
    fn read_into(&self, paddr: u32, dst: &mut [u8]) -> DmaResult<()> {
        let len = dst.len();
        self.access(paddr, len, |frame, at, n| {
            dst[at..at + n].copy_from_slice(frame);
        })
    }

    fn write_from(&self, paddr: u32, src: &[u8]) -> DmaResult<()> {
        self.access(paddr, src.len(), |frame, at, n| {
            frame.copy_from_slice(&src[at..at + n]);
        })
    }
}

fn frame_addr(idx: usize) -> u32 {
    PHYS_BASE + (idx * PAGE_SIZE) as u32
}

fn frame_index(paddr: u32, nframes: usize) -> Option<usize> {
    let idx = (paddr.checked_sub(PHYS_BASE)? as usize) / PAGE_SIZE;
    (idx < nframes).then_some(idx)
}

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hdoom_protocol::PAGE_SIZE;

use crate::{check_range, DmaBus, DmaError, DmaResult, PhysMemory};

struct PoolState {
    free: Vec<u32>,
    /// Blocks handed out per backing frame.
    frames: HashMap<u32, usize>,
}

struct PoolInner {
    name: &'static str,
    mem: Arc<PhysMemory>,
    block_size: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, addr: u32) {
        let frame = frame_of(addr);
        let mut state = self.lock();
        let remaining = match state.frames.get_mut(&frame) {
            Some(used) => {
                *used -= 1;
                *used
            }
            None => {
                tracing::warn!(pool = self.name, addr, "release of unknown DMA block");
                return;
            }
        };
        if remaining > 0 {
            state.free.push(addr);
            return;
        }
        state.frames.remove(&frame);
        state.free.retain(|&a| frame_of(a) != frame);
        drop(state);
        self.mem.free_frame(frame);
    }
}

/// Pool of fixed-size DMA blocks, each aligned to its own size.
#[derive(Clone)]
pub struct DmaPool {
    inner: Arc<PoolInner>,
}

impl DmaPool {
    /// `block_size` must be a power of two no larger than a page.
    pub fn new(name: &'static str, mem: Arc<PhysMemory>, block_size: usize) -> DmaResult<Self> {
        if !block_size.is_power_of_two() || block_size > PAGE_SIZE {
            return Err(DmaError::InvalidBlockSize(block_size));
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                mem,
                block_size,
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    frames: HashMap::new(),
                }),
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    pub fn memory(&self) -> &Arc<PhysMemory> {
        &self.inner.mem
    }

    /// Allocates one zeroed block.
    pub fn alloc(&self) -> DmaResult<DmaBlock> {
        let inner = &self.inner;
        let mut state = inner.lock();
        let addr = match state.free.pop() {
            Some(addr) => addr,
            None => {
                let frame = inner.mem.alloc_frame()?;
                let size = inner.block_size as u32;
                state
                    .free
                    .extend((1..PAGE_SIZE as u32 / size).rev().map(|i| frame + i * size));
                state.frames.insert(frame, 0);
                frame
            }
        };
        *state.frames.entry(frame_of(addr)).or_insert(0) += 1;
        drop(state);

        let block = DmaBlock {
            pool: Arc::clone(inner),
            addr,
        };
        // Recycled blocks still hold their previous contents.
        inner.mem.write_from(addr, &vec![0u8; inner.block_size])?;
        Ok(block)
    }

    /// Number of blocks currently handed out.
    pub fn in_use(&self) -> usize {
        self.inner.lock().frames.values().sum()
    }
}

impl fmt::Debug for DmaPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaPool")
            .field("name", &self.inner.name)
            .field("block_size", &self.inner.block_size)
            .finish_non_exhaustive()
    }
}

/// One block from a [`DmaPool`]; returned to the pool on drop.
pub struct DmaBlock {
    pool: Arc<PoolInner>,
    addr: u32,
}

impl DmaBlock {
    /// Physical (bus) address of the block.
    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.pool.block_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, offset: usize, dst: &mut [u8]) -> DmaResult<()> {
        check_range(offset, dst.len(), self.len())?;
        self.pool.mem.read_into(self.addr + offset as u32, dst)
    }

    pub fn write(&self, offset: usize, src: &[u8]) -> DmaResult<()> {
        check_range(offset, src.len(), self.len())?;
        self.pool.mem.write_from(self.addr + offset as u32, src)
    }
}

impl Drop for DmaBlock {
    fn drop(&mut self) {
        self.pool.release(self.addr);
    }
}

impl fmt::Debug for DmaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBlock")
            .field("pool", &self.pool.name)
            .field("addr", &format_args!("{:#x}", self.addr))
            .finish()
    }
}

fn frame_of(addr: u32) -> u32 {
    addr & !(PAGE_SIZE as u32 - 1)
}

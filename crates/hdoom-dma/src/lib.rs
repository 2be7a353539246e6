//! Device-visible memory for the HardDoom driver.
//!
//! [`PhysMemory`] stands in for the DMA-coherent allocator of the host: a 32-bit physical
//! address space handed out in 4 KiB frames. [`DmaPool`] carves fixed-size blocks out of those
//! frames and [`PagedBuffer`] strings pages together behind a hardware-readable page table.
#![forbid(unsafe_code)]

mod paged;
mod phys;
mod pool;

pub use paged::{PageLayout, PagedBuffer};
pub use phys::{DmaBus, PhysMemory, PHYS_BASE};
pub use pool::{DmaBlock, DmaPool};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("out of DMA memory")]
    OutOfMemory,
    #[error("physical access to unmapped memory: paddr=0x{paddr:x} len={len}")]
    Unmapped { paddr: u32, len: usize },
    #[error("access out of bounds: offset={offset} len={len} size={size}")]
    OutOfBounds { offset: usize, len: usize, size: usize },
    #[error("invalid DMA block size {0}")]
    InvalidBlockSize(usize),
}

pub type DmaResult<T> = Result<T, DmaError>;

pub(crate) fn check_range(offset: usize, len: usize, size: usize) -> DmaResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(DmaError::OutOfBounds { offset, len, size }),
    }
}

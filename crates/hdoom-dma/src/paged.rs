//! Scatter-gather buffers with a device-readable page table.
//!
//! A buffer of `len` bytes is backed by `ceil(len / PAGE_SIZE)` data pages. The page table (one
//! little-endian `u32` entry per data page, `phys | PTE_VALID`) is stored in the slack after the
//! data on the last page when it fits there, otherwise on one extra page of its own. Its address
//! is what the device gets in `SURF_*_PT` / `TEXTURE_PT` commands.

use hdoom_protocol::{BLOCK_SIZE, PAGE_SIZE, PTE_VALID};

use crate::{check_range, DmaBlock, DmaError, DmaPool, DmaResult};

const PTE_SIZE: usize = 4;

/// Where pages and the page table of a buffer of a given length go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLayout {
    /// Length rounded up to [`BLOCK_SIZE`].
    pub len: usize,
    pub data_pages: usize,
    /// Page holding the table; equal to `data_pages` when the table needs an extra page.
    pub table_page: usize,
    pub table_offset: usize,
}

impl PageLayout {
    pub fn for_len(len: usize) -> Self {
        let len = len.next_multiple_of(BLOCK_SIZE);
        let data_pages = len.div_ceil(PAGE_SIZE);
        let slack = data_pages * PAGE_SIZE - len;
        if data_pages > 0 && slack >= data_pages * PTE_SIZE {
            Self {
                len,
                data_pages,
                table_page: data_pages - 1,
                table_offset: len % PAGE_SIZE,
            }
        } else {
            Self {
                len,
                data_pages,
                table_page: data_pages,
                table_offset: 0,
            }
        }
    }

    /// Total pages to allocate, table page included.
    pub fn page_count(&self) -> usize {
        self.data_pages.max(self.table_page + 1)
    }
}

/// A page-tabled DMA buffer. Owned by exactly one resource; pages go back to the pool on drop.
#[derive(Debug)]
pub struct PagedBuffer {
    layout: PageLayout,
    pages: Vec<DmaBlock>,
    page_table: u32,
}

impl PagedBuffer {
    /// Allocates and zeroes every page, then writes the table. Either the whole buffer is built
    /// or every page allocated so far is released again.
    pub fn new(pool: &DmaPool, len: usize) -> DmaResult<Self> {
        if pool.block_size() != PAGE_SIZE {
            return Err(DmaError::InvalidBlockSize(pool.block_size()));
        }
        let layout = PageLayout::for_len(len);
        let pages = (0..layout.page_count())
            .map(|_| pool.alloc())
            .collect::<DmaResult<Vec<_>>>()?;

        let table: Vec<u8> = pages[..layout.data_pages]
            .iter()
            .flat_map(|page| (page.addr() | PTE_VALID).to_le_bytes())
            .collect();
        let table_page = &pages[layout.table_page];
        table_page.write(layout.table_offset, &table)?;
        let page_table = table_page.addr() + layout.table_offset as u32;

        tracing::trace!(
            len = layout.len,
            pages = pages.len(),
            page_table = format_args!("{page_table:#x}"),
            "paged buffer allocated"
        );
        Ok(Self {
            layout,
            pages,
            page_table,
        })
    }

    /// Rounded length in bytes.
    pub fn len(&self) -> usize {
        self.layout.len
    }

    pub fn is_empty(&self) -> bool {
        self.layout.len == 0
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    /// Physical address of the page table.
    pub fn page_table(&self) -> u32 {
        self.page_table
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&DmaBlock> {
        self.pages.get(index)
    }

    pub fn pages(&self) -> &[DmaBlock] {
        &self.pages
    }

    /// Copies bytes starting at `offset` out of the buffer, crossing pages as needed.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> DmaResult<()> {
        check_range(offset, dst.len(), self.layout.len)?;
        let mut done = 0;
        while done < dst.len() {
            let pos = offset + done;
            let in_page = pos % PAGE_SIZE;
            let n = (PAGE_SIZE - in_page).min(dst.len() - done);
            self.pages[pos / PAGE_SIZE].read(in_page, &mut dst[done..done + n])?;
            done += n;
        }
        Ok(())
    }

    pub fn write(&self, offset: usize, src: &[u8]) -> DmaResult<()> {
        check_range(offset, src.len(), self.layout.len)?;
        let mut done = 0;
        while done < src.len() {
            let pos = offset + done;
            let in_page = pos % PAGE_SIZE;
            let n = (PAGE_SIZE - in_page).min(src.len() - done);
            self.pages[pos / PAGE_SIZE].write(in_page, &src[done..done + n])?;
            done += n;
        }
        Ok(())
    }
}

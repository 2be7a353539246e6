use std::sync::Arc;

use hdoom_dma::{DmaBus, DmaPool, PageLayout, PagedBuffer, PhysMemory};
use hdoom_protocol::{PAGE_SIZE, PTE_PHYS_MASK, PTE_VALID};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn page_pool(frames: usize) -> (Arc<PhysMemory>, DmaPool) {
    let mem = Arc::new(PhysMemory::new(frames));
    let pool = DmaPool::new("pages", mem.clone(), PAGE_SIZE).unwrap();
    (mem, pool)
}

fn table_entries(mem: &PhysMemory, buf: &PagedBuffer) -> Vec<u32> {
    let table = buf.page_table();
    (0..buf.layout().data_pages)
        .map(|i| mem.read_u32_le(table + 4 * i as u32).unwrap())
        .collect()
}

#[test]
fn table_maps_every_data_page_in_order() {
    let (mem, pool) = page_pool(16);
    let buf = PagedBuffer::new(&pool, 3 * PAGE_SIZE + 100).unwrap();
    assert_eq!(buf.page_count(), 4);
    let expected: Vec<u32> = buf.pages()[..4]
        .iter()
        .map(|p| p.addr() | PTE_VALID)
        .collect();
    assert_eq!(table_entries(&mem, &buf), expected);
}

#[test]
fn host_access_crosses_pages() {
    let (mem, pool) = page_pool(16);
    let buf = PagedBuffer::new(&pool, 2 * PAGE_SIZE).unwrap();
    let data: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
    buf.write(PAGE_SIZE - 100, &data).unwrap();

    let mut back = vec![0u8; 200];
    buf.read(PAGE_SIZE - 100, &mut back).unwrap();
    assert_eq!(back, data);

    let second = buf.page(1).unwrap();
    assert_eq!(mem.read_u8(second.addr()).unwrap(), 100);
    assert!(buf.read(2 * PAGE_SIZE - 1, &mut [0u8; 2]).is_err());
}

#[test]
fn dropping_the_buffer_returns_all_pages() {
    let (mem, pool) = page_pool(16);
    let buf = PagedBuffer::new(&pool, 5 * PAGE_SIZE).unwrap();
    assert_eq!(mem.frames_in_use(), 6);
    drop(buf);
    assert_eq!(mem.frames_in_use(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn page_count_matches_layout_rule(len in 0usize..=(1 << 22)) {
        let (mem, pool) = page_pool(1100);
        let buf = PagedBuffer::new(&pool, len).unwrap();

        let rounded = len.div_ceil(64) * 64;
        let data_pages = rounded.div_ceil(PAGE_SIZE);
        let fits = data_pages > 0 && data_pages * PAGE_SIZE - rounded >= data_pages * 4;
        let expected = if fits { data_pages } else { data_pages + 1 };
        prop_assert_eq!(buf.page_count(), expected);
        prop_assert_eq!(buf.layout(), PageLayout::for_len(len));

        for (i, entry) in table_entries(&mem, &buf).into_iter().enumerate() {
            prop_assert_eq!(entry & PTE_VALID, PTE_VALID);
            prop_assert_eq!(entry & PTE_PHYS_MASK, buf.page(i).unwrap().addr());
        }
    }
}

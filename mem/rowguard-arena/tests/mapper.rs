use rowguard_addresses::BackingOffset;
use rowguard_arena::mapper::map_offsets;
use rowguard_arena::{BackingError, BackingSource, BackingStore, MapError, MemfdSource};

#[test]
fn chunks_are_mapped_in_the_given_order() {
    let page = rustix::param::page_size();
    let mut store = match MemfdSource::new().acquire(4 * page) {
        Ok(store) => store,
        // No locked memory available here.
        Err(BackingError::Lock { .. }) => return,
        Err(err) => panic!("{err}"),
    };
    for i in 0..4 {
        store.fill(BackingOffset::from(i * page), page, i as u8 + 1).unwrap();
    }

    let offsets: Vec<_> = (0..4).rev().map(|i| BackingOffset::from(i * page)).collect();
    let align = 2 * 1024 * 1024;
    let region = map_offsets(None, align, &store, &offsets, page).unwrap();
    assert!(region.base().is_aligned(align));
    assert_eq!(region.len(), 4 * page);

    // SAFETY: the region is mapped read/write and spans four pages.
    let firsts: Vec<u8> = (0..4).map(|i| unsafe { *region.as_ptr().add(i * page) }).collect();
    assert_eq!(firsts, [4, 3, 2, 1]);

    // Writes through the new mapping land in the backing store.
    // SAFETY: as above.
    unsafe { *region.as_ptr() = 0x42 };
    let seen = unsafe { *(store.base() + 3 * page as u64).as_mut_ptr::<u8>() };
    assert_eq!(seen, 0x42);

    region.unmap().unwrap();
    store.release().unwrap();
}

#[test]
fn failed_chunk_reports_its_index() {
    let page = rustix::param::page_size();
    let store = match MemfdSource::new().acquire(page) {
        Ok(store) => store,
        Err(BackingError::Lock { .. }) => return,
        Err(err) => panic!("{err}"),
    };
    // A misaligned file offset is rejected by the kernel.
    let offsets = [BackingOffset::new(0), BackingOffset::new(1)];
    let err = map_offsets(None, 0, &store, &offsets, page).unwrap_err();
    assert!(matches!(err, MapError::MapChunk { index: 1, .. }));
}

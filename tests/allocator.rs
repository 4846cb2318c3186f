use std::ptr;

use fenceheap::{
    ALIGNMENT, AllocError, FitPolicy, Heap, HeapConfig, InsertOrder, MAX_ALLOCATION_SIZE,
    METADATA_SIZE,
};
use proptest::prelude::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_consistent(heap: &Heap) {
    if let Err(err) = heap.check_integrity() {
        panic!("heap corrupted: {err}");
    }
}

fn counts(heap: &Heap) -> (usize, usize) {
    (heap.count_all_blocks(), heap.count_free_blocks())
}

#[test]
fn allocations_are_word_aligned() {
    init_logger();
    let mut heap = Heap::new();

    for size in [1, 1, 3, 17, 4096, 5000] {
        let ptr = heap.allocate(size).unwrap();
        assert_eq!(0, ptr.as_ptr() as usize % ALIGNMENT);
    }
}

#[test]
fn arrays_do_not_overlap() {
    init_logger();
    let mut heap = Heap::new();
    const LEN: usize = 10;

    let first = heap.allocate(LEN * size_of::<i32>()).unwrap().cast::<i32>();
    for i in 0..LEN {
        unsafe { first.as_ptr().add(i).write(i as i32) };
    }

    let second = heap.allocate(LEN * size_of::<i32>()).unwrap().cast::<i32>();
    for i in 0..LEN {
        unsafe { second.as_ptr().add(i).write(-1) };
    }

    let sum: i32 = (0..LEN).map(|i| unsafe { first.as_ptr().add(i).read() }).sum();
    assert_eq!((LEN * (LEN - 1) / 2) as i32, sum);
}

#[test]
fn zero_and_too_large_return_errors() {
    init_logger();
    let mut heap = Heap::new();

    assert_eq!(Err(AllocError::ZeroSize), heap.allocate(0));
    assert!(matches!(
        heap.allocate(MAX_ALLOCATION_SIZE + 1),
        Err(AllocError::TooLarge { .. })
    ));
}

#[test]
fn maximum_allocation_succeeds() {
    init_logger();
    let mut heap = Heap::new();

    let ptr = heap.allocate(MAX_ALLOCATION_SIZE).unwrap();
    unsafe {
        ptr.as_ptr().write(1);
        ptr.as_ptr().add(MAX_ALLOCATION_SIZE - 1).write(2);
    }

    let block = heap.block_from_pointer(ptr.as_ptr()).unwrap();
    assert!(heap.block_size(block) >= MAX_ALLOCATION_SIZE + METADATA_SIZE);
    assert_consistent(&heap);

    unsafe { heap.release(ptr.as_ptr()) };
    assert_consistent(&heap);
}

#[test]
fn releasing_a_foreign_pointer_is_harmless() {
    init_logger();
    let mut heap = Heap::new();
    let ours = heap.allocate(16).unwrap();

    let mut foreign = Box::new(23450i32);
    unsafe { heap.release(&mut *foreign as *mut i32 as *mut u8) };
    assert_eq!(23450, *foreign);

    let before = counts(&heap);
    let again = heap.allocate(16).unwrap();
    unsafe {
        heap.release(again.as_ptr());
        heap.release(ours.as_ptr());
    }
    assert_consistent(&heap);
    assert_eq!(1, heap.count_all_blocks());
    assert_eq!((before.0 - 1, before.1), counts(&heap));
}

#[test]
fn single_allocation_splits_the_first_region() {
    init_logger();
    let mut heap = Heap::new();

    let _ptr = heap.allocate(size_of::<usize>()).unwrap();

    assert!(heap.count_all_blocks() >= 2);
    assert!(heap.count_free_blocks() >= 1);
}

#[test]
fn metadata_survives_writing_the_whole_payload() {
    init_logger();
    let mut heap = Heap::new();

    let ptr = heap.allocate(21).unwrap();
    unsafe { ptr::write_bytes(ptr.as_ptr(), 0xFF, 21) };

    let block = heap.block_from_pointer(ptr.as_ptr()).unwrap();
    assert!(heap.block_size(block) >= 21 + METADATA_SIZE);
    assert_consistent(&heap);
}

#[test]
fn allocated_block_is_marked() {
    init_logger();
    let mut heap = Heap::new();

    let ptr = heap.allocate(size_of::<u64>()).unwrap();
    let block = heap.block_from_pointer(ptr.as_ptr()).unwrap();

    assert!(!heap.is_free(block));
}

#[test]
fn adjacent_releases_coalesce() {
    init_logger();
    let mut heap = Heap::new();

    let a = heap.allocate(100).unwrap().as_ptr();
    let b = heap.allocate(100).unwrap().as_ptr();
    let _guard = heap.allocate(100).unwrap();

    let block_a = heap.block_from_pointer(a).unwrap();
    let block_b = heap.block_from_pointer(b).unwrap();
    let expected = heap.block_size(block_a) + heap.block_size(block_b);

    // b was carved right below a.
    assert_eq!(Some(block_a), heap.next_block(block_b));

    unsafe {
        heap.release(a);
        heap.release(b);
    }

    let merged = heap.block_from_pointer(b).unwrap();
    assert!(heap.is_free(merged));
    assert_eq!(expected, heap.block_size(merged));
    assert_eq!(None, heap.next_block(merged));
    assert_consistent(&heap);
}

#[test]
fn released_memory_is_reused() {
    init_logger();
    let mut heap = Heap::new();

    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(64).unwrap();
    unsafe { heap.release(a.as_ptr()) };

    let c = heap.allocate(64).unwrap();
    assert_eq!(a, c);
    assert_ne!(b, c);
}

#[test]
fn stats_add_up() {
    init_logger();
    let mut heap = Heap::with_config(HeapConfig::new().chunk_size(1 << 16));

    let ptrs: Vec<_> = (1..20).map(|i| heap.allocate(i * 24).unwrap()).collect();
    for ptr in ptrs.iter().step_by(3) {
        unsafe { heap.release(ptr.as_ptr()) };
    }

    let stats = heap.stats();
    let region_bytes: usize = stats.free_bytes + stats.allocated_bytes;

    assert_eq!(1, stats.regions);
    assert_eq!(heap.count_all_blocks(), stats.blocks);
    assert_eq!(heap.free_blocks().count(), stats.free_blocks);
    assert_eq!((1 << 16) - 2 * METADATA_SIZE, region_bytes);
    assert!(stats.largest_free <= stats.free_bytes);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn allocate_then_release_restores_the_heap(size in 1usize..=(1 << 20)) {
        let mut heap = Heap::new();
        // Initialize with something small so the layout before is non trivial.
        let _keep = heap.allocate(8).unwrap();
        let before = counts(&heap);

        let ptr = heap.allocate(size).unwrap();
        prop_assert_eq!(0, ptr.as_ptr() as usize % ALIGNMENT);
        unsafe { heap.release(ptr.as_ptr()) };

        prop_assert_eq!(before, counts(&heap));
        prop_assert!(heap.check_integrity().is_ok());
    }

    #[test]
    fn random_workload_keeps_invariants(
        ops in prop::collection::vec((0usize..32, 0usize..4096), 1..300),
        fit in prop_oneof![Just(FitPolicy::Best), Just(FitPolicy::First)],
        order in prop_oneof![Just(InsertOrder::Address), Just(InsertOrder::Lifo)],
    ) {
        let config = HeapConfig::new().chunk_size(1 << 16).fit(fit).order(order);
        let mut heap = Heap::with_config(config);
        let mut slots: Vec<Option<(*mut u8, usize, u8)>> = vec![None; 32];

        for (step, (index, size)) in ops.into_iter().enumerate() {
            match slots[index].take() {
                None => match heap.allocate(size) {
                    Ok(ptr) => {
                        let fill = step as u8;
                        unsafe { ptr::write_bytes(ptr.as_ptr(), fill, size) };
                        slots[index] = Some((ptr.as_ptr(), size, fill));
                    }
                    Err(err) => {
                        prop_assert_eq!(0, size);
                        prop_assert_eq!(AllocError::ZeroSize, err);
                    }
                },
                Some((ptr, size, fill)) => {
                    let bytes = unsafe { std::slice::from_raw_parts(ptr, size) };
                    prop_assert!(bytes.iter().all(|b| *b == fill));
                    unsafe { heap.release(ptr) };
                }
            }

            if let Err(err) = heap.check_integrity() {
                return Err(TestCaseError::fail(err.to_string()));
            }
        }

        for (ptr, size, fill) in slots.into_iter().flatten() {
            let bytes = unsafe { std::slice::from_raw_parts(ptr, size) };
            prop_assert!(bytes.iter().all(|b| *b == fill));
            unsafe { heap.release(ptr) };
        }

        prop_assert!(heap.check_integrity().is_ok());
        prop_assert_eq!(heap.region_count(), heap.count_all_blocks());
    }
}

proptest! {
    // Every case zero fills up to 128 MiB.
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn large_requests_up_to_the_maximum_are_served(
        size in prop_oneof![
            Just(MAX_ALLOCATION_SIZE),
            (1usize << 20)..=MAX_ALLOCATION_SIZE,
        ],
    ) {
        let config = HeapConfig::new().chunk_size(16 << 20);
        let mut heap = Heap::with_config(config);

        let ptr = heap.allocate(size).unwrap();
        prop_assert_eq!(0, ptr.as_ptr() as usize % ALIGNMENT);
        unsafe {
            ptr.as_ptr().write(0xAB);
            ptr.as_ptr().add(size - 1).write(0xCD);
        }

        let block = heap.block_from_pointer(ptr.as_ptr()).unwrap();
        prop_assert!(heap.block_size(block) >= size + 2 * METADATA_SIZE);
        prop_assert_eq!(1, heap.region_count());
        prop_assert!(heap.check_integrity().is_ok());

        unsafe { heap.release(ptr.as_ptr()) };
        prop_assert_eq!(1, heap.count_all_blocks());
        prop_assert!(heap.check_integrity().is_ok());
    }
}

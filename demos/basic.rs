use fenceheap::Heap;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    env_logger::init();

    let mut heap = Heap::new();

    let sizes = [8, 8, 16];
    let mut addrs = Vec::new();

    for size in sizes {
        let addr = heap.allocate(size).expect("allocation failed").as_ptr();
        log_alloc(addr, size);
        addrs.push(addr);
    }

    println!("{:#?}", heap.stats());

    unsafe {
        for addr in addrs {
            heap.release(addr);
        }
    }

    println!("After releasing everything: {:#?}", heap.stats());

    // Merge example: neighbours released one after the other end up as a
    // single free block.
    let a = heap.allocate(64).unwrap().as_ptr();
    let b = heap.allocate(64).unwrap().as_ptr();
    let _guard = heap.allocate(64).unwrap();
    unsafe {
        heap.release(a);
        heap.release(b);
    }

    let merged = heap.block_from_pointer(b).unwrap();
    println!(
        "A at {a:p} and B at {b:p} merged into one free block of {} bytes",
        heap.block_size(merged)
    );

    let c = heap.allocate(128).unwrap().as_ptr();
    println!("128 bytes now served at {c:p}");
}

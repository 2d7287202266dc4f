//! Basic heap walkthrough: bind, format, allocate, access, free

use nvheap::prelude::*;

fn main() {
    println!("=== NvHeap Usage ===\n");

    // A 4 KiB RAM device standing in for a dataflash part. The heap manages
    // everything past a 16 byte reserved area.
    let dev = MemDevice::<4096>::new();
    let mut heap = BlockHeap::bind(dev, 16, 4080).unwrap();
    heap.reset().unwrap();

    println!("1. Formatted heap:");
    print_stats(&mut heap);

    // Allocate a block and fill it in one call.
    let greeting = heap.alloc_with(b"hello flash").unwrap();
    println!(
        "2. Allocated {} bytes at {:#x}",
        heap.alloc_size(greeting).unwrap(),
        greeting.raw()
    );

    // Read it back through the handle.
    let mut buf = [0u8; 11];
    heap.read_data(greeting, 0, &mut buf).unwrap();
    println!("   Content: {}", core::str::from_utf8(&buf).unwrap());

    // A second allocation lands right after the first block.
    let second = heap.alloc(100).unwrap();
    println!("3. Second block at {:#x}", second.raw());
    print_stats(&mut heap);

    // Freeing the first block leaves a reusable hole at the front.
    heap.free(greeting).unwrap();
    println!("4. Freed the first block:");
    print_stats(&mut heap);

    // Freeing it again is rejected; the heap state is untouched.
    heap.free(greeting).expect_err("the hole is free already");
    println!("5. Double free rejected\n");

    // An exact-fit request takes the hole again.
    let third = heap.alloc(11).unwrap();
    println!(
        "6. An 11 byte request reuses the hole: {:#x} (same offset: {})",
        third.raw(),
        third == greeting
    );
    print_stats(&mut heap);
}

fn print_stats(heap: &mut BlockHeap<MemDevice<4096>>) {
    let stats = heap.stats().unwrap();
    println!(
        "   {} allocated block(s) holding {} bytes, {} free block(s) holding {} bytes\n",
        stats.alloc_blocks, stats.alloc_bytes, stats.free_blocks, stats.free_bytes
    );
}

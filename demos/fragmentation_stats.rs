//! Splitting, fragmentation and coalescing, observed through stats

use nvheap::prelude::*;

fn main() {
    println!("=== Fragmentation and Coalescing ===\n");

    let mut heap = BlockHeap::bind(MemDevice::<512>::new(), 8, 500).unwrap();
    heap.reset().unwrap();
    report(&mut heap, "formatted");

    // Three neighbors carved out of the single free block.
    let a = heap.alloc(64).unwrap();
    let b = heap.alloc(64).unwrap();
    let c = heap.alloc(64).unwrap();
    report(&mut heap, "allocated a, b, c");

    // Freeing the middle block fragments the heap: the hole cannot merge
    // with its allocated neighbors.
    heap.free(b).unwrap();
    report(&mut heap, "freed b (hole between a and c)");

    // A request larger than the hole must go past c even though the total
    // free space would fit it.
    let big = heap.alloc(100).unwrap();
    println!("   100 byte block went to {:#x}, past c\n", big.raw());
    report(&mut heap, "allocated 100 bytes");

    // Freeing a and then c dissolves the hole: each free merges with the
    // free neighbor, never leaving two adjacent free blocks.
    heap.free(a).unwrap();
    report(&mut heap, "freed a (merged with the hole)");
    heap.free(c).unwrap();
    report(&mut heap, "freed c (merged into the block on its left)");

    heap.free(big).unwrap();
    report(&mut heap, "freed the 100 byte block (heap is whole again)");
}

fn report(heap: &mut BlockHeap<MemDevice<512>>, step: &str) {
    let stats = heap.stats().unwrap();
    println!("   [{step}]");
    println!(
        "   alloc: {} block(s) / {} bytes   free: {} block(s) / {} bytes\n",
        stats.alloc_blocks, stats.alloc_bytes, stats.free_blocks, stats.free_bytes
    );
}

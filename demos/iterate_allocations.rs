//! Walking the live allocations of a heap
//!
//! The walk skips free blocks and holds no state between steps, so it stays
//! valid while blocks are freed in between.

use nvheap::prelude::*;

fn main() {
    println!("=== Iterating Allocations ===\n");

    let mut heap = BlockHeap::bind(MemDevice::<1024>::new(), 8, 1000).unwrap();
    heap.reset().unwrap();

    let mut records = [Addr::new(0); 5];
    for (i, slot) in records.iter_mut().enumerate() {
        *slot = heap.alloc_with(format!("record-{i}").as_bytes()).unwrap();
    }
    heap.free(records[1]).unwrap();
    heap.free(records[3]).unwrap();

    println!("1. Manual cursor walk:");
    let mut cursor = heap.alloc_first().unwrap();
    while let Some(addr) = cursor {
        println!("   block at {:#x}: {}", addr.raw(), read_record(&mut heap, addr));
        cursor = heap.alloc_next(Some(addr)).unwrap();
    }

    println!("\n2. Iterator walk:");
    let live: Vec<Addr> = heap.allocations().map(|addr| addr.unwrap()).collect();
    for addr in &live {
        let len = heap.alloc_size(*addr).unwrap();
        println!("   block at {:#x} holds {len} bytes", addr.raw());
    }
    println!("   {} live blocks\n", live.len());
}

fn read_record(heap: &mut BlockHeap<MemDevice<1024>>, addr: Addr) -> String {
    let len = heap.alloc_size(addr).unwrap() as usize;
    let mut buf = vec![0u8; len];
    heap.read_data(addr, 0, &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}
